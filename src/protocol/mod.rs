//! Wire Protocol Definitions
//!
//! Messages exchanged between clients, the coordinator and workers over the
//! topic/partition transport, plus the graph descriptors submitted to the
//! coordinator.
//!
//! Envelopes are encoded with bincode. Opaque handler values (parameters,
//! return values, state snapshots) are carried as embedded JSON strings because
//! arbitrary structured values are not self-describing under bincode.

pub mod codec;
pub mod messages;
pub mod topics;
pub mod types;

pub use codec::{decode, encode};
pub use messages::*;
pub use types::*;
