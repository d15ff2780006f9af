//! Completion Handles
//!
//! A `CompletionCell` is the single-assignment slot behind every outstanding
//! request. The receive loop completes it exactly once; any number of readers
//! may wait on it, either by blocking a thread (`Condvar`) or by suspending a
//! task (`Notify`).

use super::types::EngineResponse;
use crate::error::ClientError;
use crate::protocol::RequestId;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Why a cell ended without a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    TimedOut(Duration),
    Closed,
    ReceiveLoopStopped,
    Undelivered(String),
    ProtocolViolation(String),
}

impl AbortReason {
    fn into_error(self, request_id: RequestId) -> ClientError {
        match self {
            AbortReason::TimedOut(timeout) => ClientError::TimedOut {
                request_id,
                timeout,
            },
            AbortReason::Closed => ClientError::Closed,
            AbortReason::ReceiveLoopStopped => ClientError::ReceiveLoopStopped(request_id),
            AbortReason::Undelivered(reason) => ClientError::Undelivered { request_id, reason },
            AbortReason::ProtocolViolation(reason) => ClientError::ProtocolViolation(reason),
        }
    }
}

#[derive(Debug)]
enum Slot {
    Pending,
    Completed(EngineResponse),
    Aborted(AbortReason),
}

#[derive(Debug)]
pub struct CompletionCell {
    request_id: RequestId,
    slot: Mutex<Slot>,
    ready: Condvar,
    notify: Notify,
}

impl CompletionCell {
    pub fn new(request_id: RequestId) -> Arc<Self> {
        Arc::new(Self {
            request_id,
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
            notify: Notify::new(),
        })
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Stores the response.
    ///
    /// # Errors
    /// `AlreadyCompleted` if a response was stored before. A reply arriving
    /// after the cell was aborted (e.g. timed out) is dropped without error.
    pub fn complete(&self, response: EngineResponse) -> Result<(), ClientError> {
        let mut slot = self.lock();
        match &*slot {
            Slot::Pending => {
                *slot = Slot::Completed(response);
                drop(slot);
                self.wake();
                Ok(())
            }
            Slot::Completed(_) => Err(ClientError::AlreadyCompleted {
                request_id: self.request_id,
            }),
            Slot::Aborted(reason) => {
                tracing::debug!(
                    "Dropping late reply for request {} ({:?})",
                    self.request_id,
                    reason
                );
                Ok(())
            }
        }
    }

    /// Ends a pending cell without a response. No-op once the cell is settled.
    pub fn abort(&self, reason: AbortReason) -> bool {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Aborted(reason);
        drop(slot);
        self.wake();
        true
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), Slot::Pending)
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.lock(), Slot::Completed(_))
    }

    /// The settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<EngineResponse, ClientError>> {
        Self::read(&self.lock(), self.request_id)
    }

    /// Blocks the calling thread until the cell settles or `timeout` passes.
    pub fn wait_blocking(&self, timeout: Duration) -> Result<EngineResponse, ClientError> {
        let slot = self.lock();
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |slot| matches!(slot, Slot::Pending))
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(outcome) = Self::read(&slot, self.request_id) {
            return outcome;
        }
        drop(slot);
        self.time_out(timeout)
    }

    /// Suspends the calling task until the cell settles or `timeout` passes.
    pub async fn wait_async(&self, timeout: Duration) -> Result<EngineResponse, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome() {
                return outcome;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.time_out(timeout);
            }
        }
    }

    fn time_out(&self, timeout: Duration) -> Result<EngineResponse, ClientError> {
        self.abort(AbortReason::TimedOut(timeout));
        // A reply may have won the race against the abort.
        self.outcome().unwrap_or(Err(ClientError::TimedOut {
            request_id: self.request_id,
            timeout,
        }))
    }

    fn read(slot: &Slot, request_id: RequestId) -> Option<Result<EngineResponse, ClientError>> {
        match slot {
            Slot::Pending => None,
            Slot::Completed(response) => Some(Ok(response.clone())),
            Slot::Aborted(reason) => Some(Err(reason.clone().into_error(request_id))),
        }
    }

    fn wake(&self) {
        self.ready.notify_all();
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle returned by the async client; `get().await` suspends the task.
#[derive(Debug, Clone)]
pub struct ResponseFuture {
    cell: Arc<CompletionCell>,
    timeout: Duration,
}

impl ResponseFuture {
    pub(crate) fn new(cell: Arc<CompletionCell>, timeout: Duration) -> Self {
        Self { cell, timeout }
    }

    pub fn request_id(&self) -> RequestId {
        self.cell.request_id()
    }

    pub fn is_done(&self) -> bool {
        !self.cell.is_pending()
    }

    pub async fn get(&self) -> Result<EngineResponse, ClientError> {
        self.cell.wait_async(self.timeout).await
    }

    pub async fn get_timeout(&self, timeout: Duration) -> Result<EngineResponse, ClientError> {
        self.cell.wait_async(timeout).await
    }

    pub(crate) fn into_blocking(self) -> BlockingFuture {
        BlockingFuture {
            cell: self.cell,
            timeout: self.timeout,
        }
    }
}

/// Handle returned by the sync client; `get()` blocks the calling thread.
#[derive(Debug, Clone)]
pub struct BlockingFuture {
    cell: Arc<CompletionCell>,
    timeout: Duration,
}

impl BlockingFuture {
    pub fn request_id(&self) -> RequestId {
        self.cell.request_id()
    }

    pub fn is_done(&self) -> bool {
        !self.cell.is_pending()
    }

    pub fn get(&self) -> Result<EngineResponse, ClientError> {
        self.cell.wait_blocking(self.timeout)
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<EngineResponse, ClientError> {
        self.cell.wait_blocking(timeout)
    }
}
