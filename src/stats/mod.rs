//! Statistics tracking for the external dashboard

mod tracker;

pub use tracker::{StatsSnapshot, StatsTracker, TunnelStatsSnapshot};
