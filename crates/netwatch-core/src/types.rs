//! Core domain types for the netwatch device inventory.
//!
//! These types are shared by the discovery daemon and the administrative
//! tooling; the serialized form of [`DeviceRecord`] is the on-disk row
//! format of the inventory.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifier::HardwareId;

/// Default label for missing vendor or OS information.
pub const UNKNOWN: &str = "unknown";

// ── Status ────────────────────────────────────────────────────────

/// Authorization status assigned to a device when it is first inventoried.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Authorized,
    Blocked,
    #[default]
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::Blocked => "blocked",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Records ───────────────────────────────────────────────────────

/// A device as stored in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Normalized hardware identifier, or the address when none is known.
    pub identity: String,
    pub address: IpAddr,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_unknown")]
    pub os: String,
    #[serde(default = "default_unknown")]
    pub vendor: String,
    #[serde(default)]
    pub status: DeviceStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    /// A freshly discovered device, first and last seen at `seen_at`.
    pub fn new(
        identity: impl Into<String>,
        address: IpAddr,
        vendor: impl Into<String>,
        status: DeviceStatus,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: identity.into(),
            address,
            name: None,
            os: UNKNOWN.to_string(),
            vendor: vendor.into(),
            status,
            first_seen: seen_at,
            last_seen: seen_at,
        }
    }

    /// The hardware identifier, or `None` for address-keyed devices.
    pub fn hardware_id(&self) -> Option<HardwareId> {
        if self.identity.parse::<IpAddr>().is_ok() {
            return None;
        }
        HardwareId::normalize(&self.identity)
    }
}

/// A candidate device extracted from one probe's output.
///
/// The address is kept as probe text; it is validated during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub address: String,
    pub hardware_id: HardwareId,
    pub vendor: String,
}

impl ScannedDevice {
    pub fn new(address: impl Into<String>, hardware_id: HardwareId, vendor: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            hardware_id,
            vendor: vendor.into(),
        }
    }

    /// A device found by a reachability probe: no hardware identifier, no vendor.
    pub fn unidentified(address: impl Into<String>) -> Self {
        Self::new(address, HardwareId::sentinel(), UNKNOWN)
    }
}

fn default_unknown() -> String {
    UNKNOWN.to_string()
}
