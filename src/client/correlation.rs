use super::future::{AbortReason, CompletionCell};
use super::types::EngineResponse;
use crate::error::ClientError;
use crate::protocol::RequestId;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Registrations between sweeps for cells that finished without a reply.
const SWEEP_EVERY: usize = 1024;

#[derive(Debug)]
enum Tracked {
    Waiting(Arc<CompletionCell>),
    /// A reply was delivered. Kept so a second delivery is detected.
    Completed,
    /// Timed out or aborted before its reply arrived.
    Abandoned,
}

/// Request ids issued by one session and what became of them.
///
/// Finished ids stay tracked as tombstones so a redelivered reply is
/// detected. Only the newest `retention` tombstones are kept; a reply for an
/// older id is treated like one for an unknown request.
#[derive(Debug)]
pub struct CorrelationTable {
    requests: DashMap<RequestId, Tracked>,
    /// Finished ids, oldest first.
    retired: Mutex<VecDeque<RequestId>>,
    retention: usize,
    registered: AtomicUsize,
    violation: Mutex<Option<String>>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::with_retention(100_000)
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            requests: DashMap::new(),
            retired: Mutex::new(VecDeque::new()),
            retention: retention.max(1),
            registered: AtomicUsize::new(0),
            violation: Mutex::new(None),
        }
    }

    /// Tracks a new request and returns its cell.
    pub fn register(&self, request_id: RequestId) -> Result<Arc<CompletionCell>, ClientError> {
        self.check()?;

        if self.registered.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }

        match self.requests.entry(request_id) {
            Entry::Occupied(_) => Err(ClientError::ProtocolViolation(format!(
                "request id {} was issued twice",
                request_id
            ))),
            Entry::Vacant(slot) => {
                let cell = CompletionCell::new(request_id);
                slot.insert(Tracked::Waiting(cell.clone()));
                Ok(cell)
            }
        }
    }

    /// Routes a reply to its waiting cell.
    ///
    /// # Errors
    /// `ProtocolViolation` when the request was already completed. The table
    /// is poisoned and every pending request is aborted.
    pub fn deliver(&self, response: EngineResponse) -> Result<(), ClientError> {
        let request_id = response.request_id;

        let (outcome, finished) = match self.requests.get_mut(&request_id) {
            None => {
                tracing::warn!("Dropping reply for unknown request {}", request_id);
                return Ok(());
            }
            Some(mut tracked) => {
                let waiting = match &*tracked {
                    Tracked::Waiting(cell) => Some(cell.clone()),
                    _ => None,
                };
                match waiting {
                    Some(cell) => {
                        let result = cell.complete(response);
                        *tracked = if cell.is_completed() {
                            Tracked::Completed
                        } else {
                            Tracked::Abandoned
                        };
                        (result, true)
                    }
                    None if matches!(*tracked, Tracked::Completed) => {
                        (Err(ClientError::AlreadyCompleted { request_id }), false)
                    }
                    None => {
                        tracing::warn!("Dropping late reply for abandoned request {}", request_id);
                        (Ok(()), false)
                    }
                }
            }
        };

        if finished {
            self.retire([request_id]);
        }

        outcome.map_err(|err| {
            let reason = err.to_string();
            tracing::error!("Protocol violation: {}", reason);
            self.poison(reason.clone());
            ClientError::ProtocolViolation(reason)
        })
    }

    /// Fails fast once the table has been poisoned.
    pub fn check(&self) -> Result<(), ClientError> {
        match self.lock_violation().as_ref() {
            Some(reason) => Err(ClientError::ProtocolViolation(reason.clone())),
            None => Ok(()),
        }
    }

    /// Aborts every pending request and returns how many were affected.
    pub fn abort_pending(&self, reason: AbortReason) -> usize {
        let mut aborted = 0;
        let mut finished = Vec::new();
        for mut tracked in self.requests.iter_mut() {
            let waiting = match &*tracked {
                Tracked::Waiting(cell) => Some(cell.clone()),
                _ => None,
            };
            if let Some(cell) = waiting {
                if cell.abort(reason.clone()) {
                    aborted += 1;
                }
                *tracked = Tracked::Abandoned;
                finished.push(*tracked.key());
            }
        }
        self.retire(finished);
        aborted
    }

    /// Abandons one request, e.g. after it could not be published.
    pub fn abandon(&self, request_id: &RequestId, reason: AbortReason) {
        let finished = match self.requests.get_mut(request_id) {
            Some(mut tracked) => {
                let waiting = match &*tracked {
                    Tracked::Waiting(cell) => Some(cell.clone()),
                    _ => None,
                };
                match waiting {
                    Some(cell) => {
                        cell.abort(reason);
                        *tracked = Tracked::Abandoned;
                        true
                    }
                    None => false,
                }
            }
            None => false,
        };
        if finished {
            self.retire([*request_id]);
        }
    }

    /// Moves cells that finished without a reply (timed out, undelivered)
    /// to `Abandoned` so they stop holding their cell.
    pub fn sweep(&self) -> usize {
        let mut finished = Vec::new();
        for mut tracked in self.requests.iter_mut() {
            if matches!(&*tracked, Tracked::Waiting(cell) if !cell.is_pending()) {
                *tracked = Tracked::Abandoned;
                finished.push(*tracked.key());
            }
        }
        let swept = finished.len();
        self.retire(finished);
        swept
    }

    /// Ids still waiting for a reply, sorted.
    pub fn outstanding(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|entry| matches!(entry.value(), Tracked::Waiting(cell) if cell.is_pending()))
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        ids
    }

    /// Number of request ids currently tracked, tombstones included.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn is_poisoned(&self) -> bool {
        self.lock_violation().is_some()
    }

    /// Queues finished ids and forgets the oldest tombstones past `retention`.
    ///
    /// Must not be called while holding a guard into `requests`.
    fn retire(&self, ids: impl IntoIterator<Item = RequestId>) {
        let expired: Vec<RequestId> = {
            let mut retired = self.retired.lock().unwrap_or_else(|p| p.into_inner());
            retired.extend(ids);
            let excess = retired.len().saturating_sub(self.retention);
            retired.drain(..excess).collect()
        };

        for id in expired {
            self.requests
                .remove_if(&id, |_, tracked| !matches!(tracked, Tracked::Waiting(_)));
        }
    }

    fn poison(&self, reason: String) {
        {
            let mut violation = self.lock_violation();
            if violation.is_none() {
                *violation = Some(reason.clone());
            }
        }
        self.abort_pending(AbortReason::ProtocolViolation(reason));
    }

    fn lock_violation(&self) -> MutexGuard<'_, Option<String>> {
        self.violation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
