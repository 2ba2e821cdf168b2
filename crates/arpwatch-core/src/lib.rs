//! arpwatch-core: Shared types, host enumeration, and error handling for arpwatch.
//!
//! This crate provides the foundational pieces used by the sweeper and the ledger:
//! - `MacAddr`, the hardware address type with case-insensitive identity
//! - `ObservationEvent`, the unit passed from the sweeper to the ledger
//! - Host enumeration from a CIDR descriptor
//! - Common error types

pub mod error;
pub mod events;
pub mod hosts;
pub mod types;

pub use error::CoreError;
pub use events::ObservationEvent;
pub use hosts::{enumerate_hosts, HostList};
pub use types::MacAddr;
