//! Running-configuration backups for a fleet of network devices.
//!
//! One invocation performs one pass: every device in the inventory gets a
//! backup job, jobs run on a bounded worker pool, each successful job leaves
//! one timestamped artifact on disk, and the pass ends with a summary file
//! listing every device's outcome.

pub mod adapters;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod shutdown;
