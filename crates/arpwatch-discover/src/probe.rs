//! Address resolution probes.
//!
//! A [`Resolver`] answers one question: which hardware address replies for
//! this IPv4 address right now? [`ArpResolver`] asks the wire with a
//! broadcast ARP request over a `pnet` datalink channel.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use arpwatch_core::MacAddr;
use pnet::datalink::{self, Channel, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr as WireMac;

use crate::error::{DiscoverError, ProbeError, Result};

const ETHERNET_HEADER_LEN: usize = 14;
const ARP_PACKET_LEN: usize = 28;

/// Upper bound on a single blocking read, so the deadline is honoured.
const READ_SLICE: Duration = Duration::from_millis(100);

/// One bounded attempt to resolve an IPv4 address to a hardware address.
pub trait Resolver: Send + Sync + 'static {
    /// `Ok(Some(mac))` on a reply, `Ok(None)` if nothing answered before
    /// `timeout`, `Err` if the attempt itself failed.
    fn resolve(
        &self,
        target: Ipv4Addr,
        timeout: Duration,
    ) -> std::result::Result<Option<MacAddr>, ProbeError>;
}

/// ARP resolver bound to one local interface.
#[derive(Debug, Clone)]
pub struct ArpResolver {
    interface: NetworkInterface,
    source_mac: WireMac,
    source_ip: Ipv4Addr,
}

impl ArpResolver {
    /// Look up `name` and check that a datalink channel can be opened on it.
    pub fn for_interface(name: &str) -> Result<Self> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| DiscoverError::InterfaceNotFound(name.to_string()))?;

        let source_ip = interface
            .ips
            .iter()
            .find_map(|net| match net.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| DiscoverError::NoInterfaceAddress(name.to_string()))?;

        let source_mac = interface
            .mac
            .ok_or_else(|| DiscoverError::NoHardwareAddress(name.to_string()))?;

        tracing::info!(
            interface = %interface.name,
            ip_addresses = ?interface.ips,
            hw_addr = %source_mac,
            "Host IP"
        );

        let resolver = Self {
            interface,
            source_mac,
            source_ip,
        };

        // Surface permission problems at startup rather than on every probe.
        resolver.open_channel(READ_SLICE)?;

        Ok(resolver)
    }

    fn open_channel(
        &self,
        read_timeout: Duration,
    ) -> std::result::Result<
        (
            Box<dyn datalink::DataLinkSender>,
            Box<dyn datalink::DataLinkReceiver>,
        ),
        ProbeError,
    > {
        let config = datalink::Config {
            read_timeout: Some(read_timeout),
            ..Default::default()
        };
        match datalink::channel(&self.interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => Ok((tx, rx)),
            Ok(_) => Err(ProbeError::UnsupportedChannel),
            Err(e) => Err(ProbeError::Channel(e)),
        }
    }
}

impl Resolver for ArpResolver {
    fn resolve(
        &self,
        target: Ipv4Addr,
        timeout: Duration,
    ) -> std::result::Result<Option<MacAddr>, ProbeError> {
        let (mut tx, mut rx) = self.open_channel(timeout.min(READ_SLICE))?;

        let frame = build_request(self.source_mac, self.source_ip, target)?;
        match tx.send_to(&frame, None) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(ProbeError::Send(e)),
            None => {
                return Err(ProbeError::Send(io::Error::other(
                    "datalink sender refused the frame",
                )))
            }
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match rx.next() {
                Ok(frame) => {
                    if let Some(mac) = parse_reply(frame, target) {
                        return Ok(Some(mac));
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => return Err(ProbeError::Receive(e)),
            }
        }

        Ok(None)
    }
}

/// Build a broadcast Ethernet frame carrying an ARP request for `target`.
fn build_request(
    source_mac: WireMac,
    source_ip: Ipv4Addr,
    target: Ipv4Addr,
) -> std::result::Result<[u8; ETHERNET_HEADER_LEN + ARP_PACKET_LEN], ProbeError> {
    let mut arp_buffer = [0u8; ARP_PACKET_LEN];
    let mut arp = MutableArpPacket::new(&mut arp_buffer).ok_or(ProbeError::Frame)?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(source_mac);
    arp.set_sender_proto_addr(source_ip);
    arp.set_target_hw_addr(WireMac::zero());
    arp.set_target_proto_addr(target);

    let mut frame = [0u8; ETHERNET_HEADER_LEN + ARP_PACKET_LEN];
    {
        let mut ethernet = MutableEthernetPacket::new(&mut frame).ok_or(ProbeError::Frame)?;
        ethernet.set_destination(WireMac::broadcast());
        ethernet.set_source(source_mac);
        ethernet.set_ethertype(EtherTypes::Arp);
        ethernet.set_payload(arp.packet_mut());
    }
    Ok(frame)
}

/// Extract the sender hardware address from an ARP reply sent by `target`.
fn parse_reply(frame: &[u8], target: Ipv4Addr) -> Option<MacAddr> {
    let ethernet = EthernetPacket::new(frame)?;
    if ethernet.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp = ArpPacket::new(ethernet.payload())?;
    if arp.get_operation() != ArpOperations::Reply || arp.get_sender_proto_addr() != target {
        return None;
    }
    Some(to_mac(arp.get_sender_hw_addr()))
}

fn to_mac(wire: WireMac) -> MacAddr {
    let WireMac(a, b, c, d, e, f) = wire;
    MacAddr::new(a, b, c, d, e, f)
}
