//! arpwatch-discover: ARP sweeper daemon.
//!
//! Cycles ARP requests across every host of a subnet, feeds the replies into
//! the observation ledger, and serves the resulting census as Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod exporter;
pub mod probe;
pub mod scheduler;
