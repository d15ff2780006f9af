//! Client Correlation Layer
//!
//! Sends keyed events to the engine and matches replies back to the callers
//! waiting for them.
//!
//! ## Core Mechanisms
//! - **Correlation**: every event gets a fresh `RequestId`; a table maps ids to
//!   single-assignment completion cells filled by the session's receive loop.
//! - **Timeouts**: `get()` fails with `ClientError::TimedOut` after the
//!   configured timeout. The in-flight request is not retracted; its late
//!   reply is dropped.
//! - **Duplicate Guard**: a second reply for a completed request poisons the
//!   session with `ClientError::ProtocolViolation`.
//! - **Flavors**: `AsyncClient` suspends the calling task, `SyncClient` blocks
//!   the calling thread. Both share `Session`.

pub mod async_client;
pub mod correlation;
pub mod future;
pub mod producer;
pub mod session;
pub mod submitter;
pub mod sync_client;
pub mod types;

pub use async_client::AsyncClient;
pub use future::{BlockingFuture, ResponseFuture};
pub use submitter::{GraphSubmitter, HttpSubmitter};
pub use sync_client::SyncClient;
pub use types::EngineResponse;

#[cfg(test)]
mod tests;
