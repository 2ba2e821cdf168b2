use thiserror::Error;

/// Top-level error type for the arpwatch core.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid subnet {cidr:?}: {reason}")]
    InvalidSubnet { cidr: String, reason: String },

    #[error("Invalid hardware address {0:?}")]
    InvalidMac(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
