//! The observation ledger: a time-windowed IP → MAC relation.
//!
//! `record` and `recompute_metrics` share one mutex. Both critical sections
//! are in-memory only; the sink they publish into must not block on I/O.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arpwatch_core::{MacAddr, ObservationEvent};
use chrono::{DateTime, TimeDelta, Utc};
use ipnet::Ipv4Net;

use crate::metrics::MetricsSink;

/// Pairs not seen for this long are expired from the active view.
pub const STALE_AFTER_MINUTES: i64 = 20;

/// Everything the ledger retains about one MAC answering for one IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacObservation {
    pub mac: MacAddr,
    pub subnet: Ipv4Net,
    /// Replies from this MAC for this IP since first seen.
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl MacObservation {
    fn first(event: &ObservationEvent, now: DateTime<Utc>) -> Self {
        Self {
            mac: event.mac,
            subnet: event.subnet,
            count: 1,
            first_seen: now,
            last_seen: now,
        }
    }
}

/// Summary of one recomputation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub active_ips: u64,
    pub unique_macs: u64,
    /// Observations moved out of the active view during this pass.
    pub expired: usize,
}

#[derive(Debug, Default)]
struct Table {
    active: HashMap<String, Vec<MacObservation>>,
    expired: Vec<MacObservation>,
}

/// IP → MAC observation ledger publishing into a [`MetricsSink`].
pub struct Ledger<M> {
    sink: Arc<M>,
    table: Mutex<Table>,
}

impl<M: MetricsSink> Ledger<M> {
    pub fn new(sink: Arc<M>) -> Self {
        Self {
            sink,
            table: Mutex::new(Table::default()),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one observation into the ledger, stamped with the current time.
    pub fn record(&self, event: &ObservationEvent) {
        self.record_at(event, Utc::now());
    }

    /// Fold one observation into the ledger as if it arrived at `now`.
    ///
    /// Every event counts as a reply. Events with a nil address or a
    /// broadcast MAC are dropped after counting.
    pub fn record_at(&self, event: &ObservationEvent, now: DateTime<Utc>) {
        {
            let mut table = self.table();
            self.sink.inc_replies();

            if event.is_informative() {
                let entries = table.active.entry(event.ip.to_string()).or_default();
                match entries.iter_mut().find(|o| o.mac == event.mac) {
                    Some(seen) => {
                        seen.count += 1;
                        seen.last_seen = now;
                    }
                    None => entries.push(MacObservation::first(event, now)),
                }
                return;
            }
        }

        tracing::trace!(ip = %event.ip, hw_addr = %event.mac, "Dropping uninformative reply");
    }

    /// Expire stale pairs and republish every derived gauge.
    pub fn recompute_metrics(&self) -> MetricsSnapshot {
        self.recompute_metrics_at(Utc::now())
    }

    /// Like [`Ledger::recompute_metrics`], evaluated at `now`.
    pub fn recompute_metrics_at(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let snapshot = self.expire_and_publish(now);

        if snapshot.expired > 0 {
            tracing::info!(
                expired = snapshot.expired,
                active_ips = snapshot.active_ips,
                unique_macs = snapshot.unique_macs,
                "Expired stale observations"
            );
        }
        snapshot
    }

    /// The locked half of a recompute. Nothing in here may log.
    fn expire_and_publish(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let cutoff = now - TimeDelta::minutes(STALE_AFTER_MINUTES);

        let mut guard = self.table();
        let Table { active, expired } = &mut *guard;

        let mut ips_by_mac: HashMap<MacAddr, BTreeSet<String>> = HashMap::new();
        let mut active_ips = 0u64;

        for (ip, entries) in active.iter_mut() {
            let (fresh, stale): (Vec<_>, Vec<_>) =
                entries.drain(..).partition(|o| o.last_seen > cutoff);

            for seen in &fresh {
                ips_by_mac.entry(seen.mac).or_default().insert(ip.clone());
            }
            expired.extend(stale);

            // An IP with nothing fresh keeps its key and reports zero.
            if !fresh.is_empty() {
                active_ips += 1;
            }
            self.sink.set_macs_per_ip(ip, fresh.len() as u64);
            *entries = fresh;
        }

        self.sink.set_active_ips(active_ips);
        for (mac, ips) in &ips_by_mac {
            self.sink.set_ips_per_mac(&mac.to_string(), ips.len() as u64);
        }
        let unique_macs = ips_by_mac.len() as u64;
        self.sink.set_unique_macs(unique_macs);

        let expired_count = expired.len();
        for gone in expired.drain(..) {
            if !ips_by_mac.contains_key(&gone.mac) {
                self.sink.set_ips_per_mac(&gone.mac.to_string(), 0);
            }
        }

        MetricsSnapshot {
            active_ips,
            unique_macs,
            expired: expired_count,
        }
    }

    /// Observations currently held for `ip`, empty if none.
    pub fn observations(&self, ip: Ipv4Addr) -> Vec<MacObservation> {
        self.table()
            .active
            .get(&ip.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Number of IP keys in the table, including IPs whose list went empty.
    pub fn ip_count(&self) -> usize {
        self.table().active.len()
    }
}
