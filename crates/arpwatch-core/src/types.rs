//! Core domain types shared by the sweeper and the ledger.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// ── Hardware address ──────────────────────────────────────────────

/// A 48-bit Ethernet hardware address.
///
/// Identity is octet equality, so `AA:BB:CC:00:11:22` and
/// `aa:bb:cc:00:11:22` are the same address. Displayed as lowercase,
/// colon-separated hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-ones address carried by gratuitous replies.
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// The all-zero address, used as the "no address" value.
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self([a, b, c, d, e, f])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = CoreError;

    /// Accepts `:` or `-` separated hex octets in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMac(s.to_string());

        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_display_is_lowercase() {
        let mac = MacAddr::new(0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22);
        assert_eq!(mac.to_string(), "aa:bb:cc:00:11:22");
    }

    #[test]
    fn mac_parse_is_case_insensitive() {
        let upper: MacAddr = "AA:BB:CC:00:11:22".parse().unwrap();
        let lower: MacAddr = "aa:bb:cc:00:11:22".parse().unwrap();
        let dashed: MacAddr = "aa-bb-cc-00-11-22".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(lower, dashed);
    }

    #[test]
    fn mac_parse_rejects_garbage() {
        assert!("aa:bb:cc:00:11".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:00:11:22:33".parse::<MacAddr>().is_err());
        assert!("zz:bb:cc:00:11:22".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn broadcast_and_zero() {
        let bcast: MacAddr = "ff:ff:ff:ff:ff:ff".parse().unwrap();
        assert!(bcast.is_broadcast());
        assert!(!bcast.is_zero());
        assert!(MacAddr::default().is_zero());
    }
}
