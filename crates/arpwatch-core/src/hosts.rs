//! Host enumeration: CIDR descriptor → ordered list of scannable addresses.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{CoreError, Result};

/// The scannable hosts of one subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostList {
    /// The masked network the hosts were derived from.
    pub network: Ipv4Net,
    /// Usable host addresses in ascending numeric order.
    pub hosts: Vec<Ipv4Addr>,
}

impl HostList {
    pub fn count(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Parse `cidr` and list every usable host address in it.
///
/// The network and broadcast addresses are stripped whenever the block holds
/// two or more addresses, so a /31 yields no hosts and a /32 yields exactly
/// its single address.
pub fn enumerate_hosts(cidr: &str) -> Result<HostList> {
    let parsed: Ipv4Net = cidr
        .trim()
        .parse()
        .map_err(|e: ipnet::AddrParseError| CoreError::InvalidSubnet {
            cidr: cidr.to_string(),
            reason: e.to_string(),
        })?;

    let network = parsed.trunc();
    let first = u32::from(network.network());
    let last = u32::from(network.broadcast());

    let mut hosts: Vec<Ipv4Addr> = (first..=last).map(Ipv4Addr::from).collect();
    if hosts.len() >= 2 {
        hosts.pop();
        hosts.remove(0);
    }

    Ok(HostList { network, hosts })
}
