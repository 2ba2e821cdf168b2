//! Configuration for the arpwatch daemon.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use arpwatch_ledger::METRICS_INTERVAL;
use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::error::{DiscoverError, Result};
use crate::scheduler::{SweepOptions, HEARTBEAT_INTERVAL, PROBE_TIMEOUT, RETRIES};

/// Shortest prefix the daemon will sweep. Anything wider is refused at
/// startup instead of being expanded into a host list.
pub const MIN_SWEEP_PREFIX: u8 = 8;

/// Top-level watch configuration.
///
/// Loaded from `arpwatch.toml` `[watch]` section or
/// `ARPWATCH_WATCH__` environment variables. CLI flags override both.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WatchConfig {
    /// Interface to send ARP requests on.
    #[serde(default)]
    pub interface: String,

    /// Subnet to monitor, in CIDR notation.
    #[serde(default)]
    pub cidr: String,

    /// Port the metrics endpoint listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline for a single ARP request.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Interval between sweep progress reports.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Interval between ledger metric recomputations.
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_port() -> u16 {
    2113
}

fn default_probe_timeout_ms() -> u64 {
    PROBE_TIMEOUT.as_millis() as u64
}

fn default_heartbeat_secs() -> u64 {
    HEARTBEAT_INTERVAL.as_secs()
}

fn default_metrics_interval_secs() -> u64 {
    METRICS_INTERVAL.as_secs()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            cidr: String::new(),
            port: default_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            metrics_interval_secs: default_metrics_interval_secs(),
        }
    }
}

impl WatchConfig {
    /// Reject configurations the daemon cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            return Err(DiscoverError::Config("--interface must be defined".into()));
        }
        if self.cidr.trim().is_empty() {
            return Err(DiscoverError::Config("--cidrs must be defined".into()));
        }
        // Unparseable descriptors are reported by host enumeration.
        if let Ok(net) = self.cidr.trim().parse::<Ipv4Net>() {
            if net.prefix_len() < MIN_SWEEP_PREFIX {
                return Err(DiscoverError::SubnetTooLarge {
                    cidr: self.cidr.clone(),
                    min_prefix: MIN_SWEEP_PREFIX,
                });
            }
        }
        if self.probe_timeout_ms == 0 {
            return Err(DiscoverError::Config("probe_timeout_ms must be positive".into()));
        }
        if self.heartbeat_secs == 0 || self.metrics_interval_secs == 0 {
            return Err(DiscoverError::Config("intervals must be positive".into()));
        }
        Ok(())
    }

    pub fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            retries: RETRIES,
            heartbeat: Duration::from_secs(self.heartbeat_secs),
        }
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

/// Load the `[watch]` section from `<file_prefix>.toml` (optional) and the
/// environment. A missing section yields the defaults.
pub fn load_watch_config(file_prefix: &str) -> Result<WatchConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("ARPWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| DiscoverError::Config(e.to_string()))?;

    match cfg.get::<WatchConfig>("watch") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(WatchConfig::default()),
        Err(e) => Err(DiscoverError::Config(e.to_string())),
    }
}
