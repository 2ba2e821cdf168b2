//! arpwatch-ledger: the observation ledger.
//!
//! Folds observation events into a time-windowed IP → MAC relation, expires
//! pairs that have not been seen recently, and publishes the derived
//! counters and gauges into a [`MetricsSink`].

pub mod ledger;
pub mod metrics;
pub mod watch;

pub use ledger::{Ledger, MacObservation, MetricsSnapshot, STALE_AFTER_MINUTES};
pub use metrics::{MetricsSink, PromRegistry};
pub use watch::{spawn_watch, WatchHandle, METRICS_INTERVAL};
