//! Observation events passed from the sweeper to the ledger.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::types::MacAddr;

/// One successful resolution: `mac` answered for `ip` inside `subnet`.
///
/// Events are transient. The ledger folds them into its table and drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationEvent {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub subnet: Ipv4Net,
}

impl ObservationEvent {
    pub fn new(ip: Ipv4Addr, mac: MacAddr, subnet: Ipv4Net) -> Self {
        Self { ip, mac, subnet }
    }

    /// True if either address is missing (unspecified IP or all-zero MAC).
    pub fn is_nil(&self) -> bool {
        self.ip.is_unspecified() || self.mac.is_zero()
    }

    /// True if the event carries information worth recording.
    ///
    /// Broadcast replies are gratuitous announcements and say nothing about
    /// which host owns the address.
    pub fn is_informative(&self) -> bool {
        !self.is_nil() && !self.mac.is_broadcast()
    }
}
