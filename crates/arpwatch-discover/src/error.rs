//! Error types for the arpwatch-discover crate.

use arpwatch_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Unable to determine an IPv4 address for interface {0}")]
    NoInterfaceAddress(String),

    #[error("Interface {0} has no hardware address")]
    NoHardwareAddress(String),

    #[error("Subnet {cidr} has no hosts")]
    EmptySubnet { cidr: String },

    #[error("Subnet {cidr} is too large to sweep (shortest allowed prefix is /{min_prefix})")]
    SubnetTooLarge { cidr: String, min_prefix: u8 },

    #[error("Sweeper already started")]
    AlreadyStarted,

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Config error: {0}")]
    Config(String),
}

/// Failures of a single resolution attempt. These end the current host
/// visit and nothing more.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to open datalink channel: {0}")]
    Channel(#[source] std::io::Error),

    #[error("Unsupported datalink channel type")]
    UnsupportedChannel,

    #[error("Failed to build ARP request frame")]
    Frame,

    #[error("Failed to send ARP request: {0}")]
    Send(#[source] std::io::Error),

    #[error("Failed to receive frame: {0}")]
    Receive(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
