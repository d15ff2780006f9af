//! Worker Membership Module
//!
//! Tracks which workers are available for partition placement.
//!
//! ## Core Mechanisms
//! - **Registration**: Workers announce themselves on the control topic.
//! - **Failure Detection**: Missing heartbeats move a worker `Alive` -> `Suspect` -> `Dead`.
//! - **Change Notification**: Every change of the live set bumps a version observed by
//!   the coordinator, which then reschedules active graphs.

pub mod service;
pub mod types;
