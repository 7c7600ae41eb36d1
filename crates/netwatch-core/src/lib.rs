//! netwatch-core: Shared types for the netwatch device inventory.
//!
//! This crate provides the foundational types used by the discovery daemon
//! and the administrative tooling:
//! - Device records and their authorization status
//! - Hardware identifier normalization and the sentinel identifier
//! - Allow/deny list entries
//! - Validation errors

pub mod error;
pub mod identifier;
pub mod types;

pub use error::ValidationError;
pub use identifier::{identity_key, HardwareId, ListEntry};
pub use types::{DeviceRecord, DeviceStatus, ScannedDevice};
