//! Metrics registry for the ledger's derived counters and gauges.
//!
//! The ledger never registers metrics globally. It is handed a
//! [`MetricsSink`] at construction and pushes every update through it.
//! [`PromRegistry`] is the production sink and renders the Prometheus
//! text exposition format on demand.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const REPLIES: &str = "arpwatcher_replies";
pub const IP_ADDRESSES: &str = "arpwatcher_ip_addresses";
pub const IP_MAC_ADDRESS_CURRENT: &str = "arpwatcher_ip_mac_address_current";
pub const MAC_ADDRESS_IP_CURRENT: &str = "arpwatcher_mac_address_ip_current";
pub const MAC_ADDRESSES_UNIQUE: &str = "arpwatcher_mac_addresses_unique";

pub const LABEL_IP_ADDRESS: &str = "ip_address";
pub const LABEL_MAC_ADDRESS: &str = "mac_address";

/// Content type for the Prometheus text format.
pub const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Receiver of the ledger's metric updates.
pub trait MetricsSink: Send + Sync {
    /// Count one received reply, informative or not.
    fn inc_replies(&self);

    /// Number of IPs with at least one fresh MAC.
    fn set_active_ips(&self, count: u64);

    /// Number of fresh MACs answering for `ip`.
    fn set_macs_per_ip(&self, ip: &str, count: u64);

    /// Number of IPs `mac` currently answers for.
    fn set_ips_per_mac(&self, mac: &str, count: u64);

    /// Number of distinct fresh MACs across the subnet.
    fn set_unique_macs(&self, count: u64);
}

#[derive(Debug, Default)]
struct Gauges {
    active_ips: u64,
    unique_macs: u64,
    macs_per_ip: BTreeMap<String, u64>,
    ips_per_mac: BTreeMap<String, u64>,
}

/// In-process registry rendered in the Prometheus text format.
#[derive(Debug, Default)]
pub struct PromRegistry {
    replies: AtomicU64,
    gauges: Mutex<Gauges>,
}

impl PromRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn gauges(&self) -> MutexGuard<'_, Gauges> {
        self.gauges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }

    pub fn active_ips(&self) -> u64 {
        self.gauges().active_ips
    }

    pub fn unique_macs(&self) -> u64 {
        self.gauges().unique_macs
    }

    pub fn macs_per_ip(&self, ip: &str) -> Option<u64> {
        self.gauges().macs_per_ip.get(ip).copied()
    }

    pub fn ips_per_mac(&self, mac: &str) -> Option<u64> {
        self.gauges().ips_per_mac.get(mac).copied()
    }

    /// Render every series in the Prometheus text format.
    pub fn render(&self) -> String {
        let replies = self.replies();
        let gauges = self.gauges();
        let mut out = String::new();

        write_header(
            &mut out,
            REPLIES,
            "counter",
            "Number of resolution replies received",
        );
        let _ = writeln!(out, "{REPLIES} {replies}");

        write_header(
            &mut out,
            IP_ADDRESSES,
            "gauge",
            "Number of IP addresses with at least one current mac address",
        );
        let _ = writeln!(out, "{IP_ADDRESSES} {}", gauges.active_ips);

        write_header(
            &mut out,
            IP_MAC_ADDRESS_CURRENT,
            "gauge",
            "Number of mac addresses currently seen for an IP address",
        );
        for (ip, count) in &gauges.macs_per_ip {
            let _ = writeln!(
                out,
                "{IP_MAC_ADDRESS_CURRENT}{{{LABEL_IP_ADDRESS}=\"{}\"}} {count}",
                escape_label(ip)
            );
        }

        write_header(
            &mut out,
            MAC_ADDRESS_IP_CURRENT,
            "gauge",
            "Number of IP addresses associated with a single mac address",
        );
        for (mac, count) in &gauges.ips_per_mac {
            let _ = writeln!(
                out,
                "{MAC_ADDRESS_IP_CURRENT}{{{LABEL_MAC_ADDRESS}=\"{}\"}} {count}",
                escape_label(mac)
            );
        }

        write_header(
            &mut out,
            MAC_ADDRESSES_UNIQUE,
            "gauge",
            "Number of unique mac addresses seen",
        );
        let _ = writeln!(out, "{MAC_ADDRESSES_UNIQUE} {}", gauges.unique_macs);

        out
    }
}

impl MetricsSink for PromRegistry {
    fn inc_replies(&self) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    fn set_active_ips(&self, count: u64) {
        self.gauges().active_ips = count;
    }

    fn set_macs_per_ip(&self, ip: &str, count: u64) {
        self.gauges().macs_per_ip.insert(ip.to_string(), count);
    }

    fn set_ips_per_mac(&self, mac: &str, count: u64) {
        self.gauges().ips_per_mac.insert(mac.to_string(), count);
    }

    fn set_unique_macs(&self, count: u64) {
        self.gauges().unique_macs = count;
    }
}

fn write_header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
