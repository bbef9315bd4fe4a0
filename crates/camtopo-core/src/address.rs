//! GigE address formatting and parsing
//!
//! Transports report IPv4 addresses as 32-bit integers and MAC addresses as
//! 48-bit integers. These helpers render them the way users type them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("Invalid IPv4 address: {0}")]
    Ipv4(String),
    #[error("Invalid MAC address: {0}")]
    Mac(String),
}

/// Render a 32-bit value as a big-endian dotted quad
pub fn format_ipv4(value: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        (value >> 24) & 0xFF,
        (value >> 16) & 0xFF,
        (value >> 8) & 0xFF,
        value & 0xFF
    )
}

/// Render the low 48 bits of `value` as `XX:XX:XX:XX:XX:XX`
pub fn format_mac(value: u64) -> String {
    (0..6)
        .rev()
        .map(|i| format!("{:02X}", (value >> (i * 8)) & 0xFF))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a dotted quad into its 32-bit value
pub fn parse_ipv4(s: &str) -> Result<u32, AddressParseError> {
    Ipv4Addr::from_str(s.trim())
        .map(u32::from)
        .map_err(|_| AddressParseError::Ipv4(s.to_string()))
}

/// Normalize a MAC string with `:` or `-` separators to upper-case `:` form
pub fn normalize_mac(s: &str) -> Result<String, AddressParseError> {
    s.parse::<MacAddress>().map(|mac| mac.to_string())
}

/// 48-bit MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(u64);

impl MacAddress {
    pub const ZERO: Self = Self(0);

    /// Build from an integer node value, keeping the low 48 bits
    pub fn from_u64(value: u64) -> Self {
        Self(value & 0xFFFF_FFFF_FFFF)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_mac(self.0))
    }
}

impl FromStr for MacAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(AddressParseError::Mac(s.to_string()));
        }

        let mut value = 0u64;
        for part in parts {
            if part.len() != 2 {
                return Err(AddressParseError::Mac(s.to_string()));
            }
            let byte =
                u8::from_str_radix(part, 16).map_err(|_| AddressParseError::Mac(s.to_string()))?;
            value = (value << 8) | u64::from(byte);
        }
        Ok(Self(value))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ipv4() {
        assert_eq!(format_ipv4(0xC0A8_0101), "192.168.1.1");
        assert_eq!(format_ipv4(0), "0.0.0.0");
        assert_eq!(format_ipv4(0xFFFF_FF00), "255.255.255.0");
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(0x0011_2233_4455), "00:11:22:33:44:55");
        assert_eq!(format_mac(0xAABB_CCDD_EEFF), "AA:BB:CC:DD:EE:FF");
        assert_eq!(format_mac(0x0A), "00:00:00:00:00:0A");
    }

    #[test]
    fn test_normalize_mac_separators() {
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF").unwrap(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff").unwrap(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(normalize_mac("00-11:22-33:44-55").unwrap(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_reject_malformed_mac() {
        assert!(normalize_mac("AA:BB:CC:DD:EE").is_err());
        assert!(normalize_mac("AA:BB:CC:DD:EE:GG").is_err());
        assert!(normalize_mac("AAA:BB:CC:DD:EE:F").is_err());
        assert!(normalize_mac("").is_err());
    }

    #[test]
    fn test_mac_integer_matches_text() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(mac, MacAddress::from_u64(0x0011_2233_4455));
        assert!(!mac.is_zero());
        assert!(MacAddress::from_u64(0xFFFF_0000_0000_0000).is_zero());
    }

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(parse_ipv4("192.168.1.1").unwrap(), 0xC0A8_0101);
        assert_eq!(parse_ipv4(" 10.0.0.2 ").unwrap(), 0x0A00_0002);
        assert!(parse_ipv4("192.168.1").is_err());
        assert!(parse_ipv4("300.1.1.1").is_err());
    }
}
