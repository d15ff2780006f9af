//! Partition Scheduling Module
//!
//! Decides which worker owns each `(operator, partition)` pair of a submitted
//! graph and disseminates that decision on the assignment topic.
//!
//! ## Core Concepts
//! - **Strategy**: `Scheduler` is the pluggable algorithm; only `place` differs
//!   between strategies, publishing is shared.
//! - **Completeness**: every partition of the graph gets exactly one owner.
//! - **Fairness**: strategies receive the load other graphs already put on
//!   each worker and balance the total, not just one graph's share.
//! - **Stability**: `StickyScheduler` keeps partitions of surviving workers in
//!   place and only moves what balance requires.
//! - **Handoff**: a placement whose owner changed while the previous owner is
//!   still live names that owner, so the partition's state can follow it.

pub mod round_robin;
pub mod sticky;
pub mod strategy;
pub mod types;

pub use round_robin::RoundRobinScheduler;
pub use sticky::StickyScheduler;
pub use strategy::{Scheduler, publish_assignment};
pub use types::{Assignment, Placement, WorkerLoad};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Scheduler selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulerKind {
    RoundRobin,
    #[default]
    Sticky,
}

impl SchedulerKind {
    pub fn build(&self) -> Arc<dyn Scheduler> {
        match self {
            SchedulerKind::RoundRobin => Arc::new(RoundRobinScheduler),
            SchedulerKind::Sticky => Arc::new(StickyScheduler),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "round_robin" | "round-robin" => Ok(SchedulerKind::RoundRobin),
            "sticky" => Ok(SchedulerKind::Sticky),
            other => Err(format!(
                "unknown scheduler '{}' (expected round_robin or sticky)",
                other
            )),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::RoundRobin => f.write_str("round_robin"),
            SchedulerKind::Sticky => f.write_str("sticky"),
        }
    }
}
