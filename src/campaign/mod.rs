//! Per-campaign building blocks
//!
//! - [`queue`]: ordered call targets and their lifecycle
//! - [`gate`]: working-hours window predicate
//! - [`stats`]: running outcome counters
//!
//! All three are created at campaign start and owned by the dialer task.

pub mod gate;
pub mod queue;
pub mod stats;

pub use gate::{GateError, WorkingHours, WorkingHoursGate};
pub use queue::{BadNumberFilter, CampaignQueue, PriorityMode, QueueError, QueueOptions};
pub use stats::{CampaignStats, StatsAggregator};
