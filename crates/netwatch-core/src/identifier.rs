//! Hardware identifier normalization and allow/deny list entries.
//!
//! Every MAC address that enters the inventory, whether from probe output,
//! a list file, or the command line, passes through [`HardwareId::normalize`]
//! so that membership checks compare one canonical form:
//! lower-case hex, colon-delimited (`aa:bb:cc:dd:ee:ff`).

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of hex digits in a 48-bit hardware identifier.
const HEX_DIGITS: usize = 12;

/// A canonical, colon-delimited, lower-case 48-bit hardware identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareId(String);

impl HardwareId {
    /// Canonical form of the sentinel identifier.
    pub const SENTINEL: &'static str = "00:00:00:00:00:00";

    /// The reserved all-zero identifier meaning "no hardware identifier available".
    pub fn sentinel() -> Self {
        Self(Self::SENTINEL.to_string())
    }

    /// Normalize any separator style into canonical form.
    ///
    /// Non-alphanumeric characters are stripped; the remainder must be exactly
    /// twelve hex digits. `AA-BB-CC-DD-EE-FF`, `aabb.ccdd.eeff` and
    /// `AABBCCDDEEFF` all yield `aa:bb:cc:dd:ee:ff`.
    pub fn normalize(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if digits.len() != HEX_DIGITS || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        let mut canonical = String::with_capacity(17);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && i % 2 == 0 {
                canonical.push(':');
            }
            canonical.push(c.to_ascii_lowercase());
        }
        Some(Self(canonical))
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == Self::SENTINEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for HardwareId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s).ok_or_else(|| ValidationError::InvalidIdentifier(s.to_string()))
    }
}

impl TryFrom<String> for HardwareId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HardwareId> for String {
    fn from(id: HardwareId) -> Self {
        id.0
    }
}

/// Deduplication key for the inventory.
///
/// The hardware identifier, or the address when only the sentinel is known.
pub fn identity_key(hardware_id: &HardwareId, address: &IpAddr) -> String {
    if hardware_id.is_sentinel() {
        address.to_string()
    } else {
        hardware_id.to_string()
    }
}

/// One normalized entry of an allow- or deny-list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListEntry {
    Hardware(HardwareId),
    Address(IpAddr),
}

impl ListEntry {
    /// Canonical text used both on disk and for membership comparisons.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Canonical form of arbitrary list text, falling back to a trimmed,
    /// lower-cased copy for lines that are neither a MAC nor an address.
    pub fn canonical_or_raw(raw: &str) -> String {
        match raw.parse::<ListEntry>() {
            Ok(entry) => entry.canonical(),
            Err(_) => raw.trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware(id) => write!(f, "{id}"),
            Self::Address(addr) => write!(f, "{addr}"),
        }
    }
}

impl FromStr for ListEntry {
    type Err = ValidationError;

    /// Addresses are tried first: a MAC never parses as an IP address, but
    /// some IPv6 literals strip down to twelve hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(addr) = trimmed.parse::<IpAddr>() {
            return Ok(Self::Address(addr));
        }
        HardwareId::normalize(trimmed)
            .map(Self::Hardware)
            .ok_or_else(|| ValidationError::InvalidIdentifier(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_separator_styles() {
        for raw in [
            "AA-BB-CC-DD-EE-FF",
            "aabb.ccdd.eeff",
            "AABBCCDDEEFF",
            "aa:bb:cc:dd:ee:ff",
            " Aa:bB-cc.dd ee:FF ",
        ] {
            assert_eq!(
                HardwareId::normalize(raw).unwrap().as_str(),
                "aa:bb:cc:dd:ee:ff",
                "input {raw:?}"
            );
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = HardwareId::normalize("00-1A-2b-3C-4d-5E").unwrap();
        let twice = HardwareId::normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_rejects_wrong_length_or_non_hex() {
        assert!(HardwareId::normalize("").is_none());
        assert!(HardwareId::normalize("aa:bb:cc:dd:ee").is_none());
        assert!(HardwareId::normalize("aa:bb:cc:dd:ee:ff:00").is_none());
        assert!(HardwareId::normalize("zz:bb:cc:dd:ee:ff").is_none());
        assert!(HardwareId::normalize("192.168.1.1").is_none());
    }

    #[test]
    fn test_sentinel() {
        assert!(HardwareId::sentinel().is_sentinel());
        assert!(HardwareId::normalize("00-00-00-00-00-00").unwrap().is_sentinel());
        assert!(!HardwareId::normalize("00:00:00:00:00:01").unwrap().is_sentinel());
    }

    #[test]
    fn test_identity_key_falls_back_to_address() {
        let addr: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(identity_key(&HardwareId::sentinel(), &addr), "10.0.0.7");

        let mac = HardwareId::normalize("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(identity_key(&mac, &addr), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_list_entry_parse() {
        assert_eq!(
            "AA-BB-CC-DD-EE-FF".parse::<ListEntry>().unwrap().canonical(),
            "aa:bb:cc:dd:ee:ff"
        );
        assert_eq!(
            " 192.168.1.20 ".parse::<ListEntry>().unwrap(),
            ListEntry::Address("192.168.1.20".parse().unwrap())
        );
        // Strips to twelve hex digits but is an address.
        assert!(matches!(
            "aaaa:bbbb::cccc".parse::<ListEntry>().unwrap(),
            ListEntry::Address(_)
        ));
        assert!("not-an-id".parse::<ListEntry>().is_err());
    }

    #[test]
    fn test_canonical_or_raw() {
        assert_eq!(ListEntry::canonical_or_raw("AABBCCDDEEFF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(ListEntry::canonical_or_raw("  Printer-Lab "), "printer-lab");
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let id = HardwareId::normalize("AA-BB-CC-DD-EE-FF").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"aa:bb:cc:dd:ee:ff\"");

        let back: HardwareId = serde_json::from_str("\"AABBCCDDEEFF\"").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<HardwareId>("\"nope\"").is_err());
    }
}
