use thiserror::Error;

/// Malformed user- or probe-supplied input. Always recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid network range: {0}")]
    InvalidRange(String),

    #[error("Invalid identifier: {0} (expected a MAC address or an IP address)")]
    InvalidIdentifier(String),
}
