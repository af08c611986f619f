//! Device and gateway addresses.
//!
//! Every address that reaches the registry, the metric labels or the history
//! document goes through [`canonical_address`], so `aa:bb:..` and `AA:BB:..`
//! always land on the same device.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth or Ethernet hardware address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The all-zero address, reported when no gateway address is known.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Parses `AA:BB:CC:DD:EE:FF`, also accepting `-` as separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

/// Normalize a device identifier into the form used as registry key and
/// metric label.
///
/// Anything that parses as a MAC address is rendered as uppercase
/// colon-separated hex. Other identifiers are kept verbatim but uppercased,
/// so lookups stay case-insensitive either way.
pub fn canonical_address(address: &str) -> String {
    match address.parse::<MacAddress>() {
        Ok(mac) => mac.to_string(),
        Err(_) => address.trim().to_uppercase(),
    }
}
