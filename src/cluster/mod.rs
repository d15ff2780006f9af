//! In-process cluster assembly used by the binary and the end-to-end tests.

pub mod local;

pub use local::LocalCluster;
