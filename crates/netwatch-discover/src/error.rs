//! Error types for the netwatch-discover crate.
//!
//! Only [`StorageError`] is fatal to a cycle; probe and notification
//! failures are logged by their caller and the cycle continues.

use std::path::PathBuf;

use thiserror::Error;

/// A probing subprocess could not produce usable output for one range.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },
}

/// The inventory files could not be read or written.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Inventory file {path} is not accessible: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize inventory record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// A single delivery attempt to the messaging endpoint failed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Endpoint rejected the request with HTTP {status}: {description}")]
    Rejected { status: u16, description: String },
}

/// An alert or connection test did not succeed.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification endpoint credentials (bot_token, chat_id) are not configured")]
    MissingCredentials,

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: DeliveryError },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// The poll loop stopped because of a cycle-level failure.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Inventory storage failed: {0}")]
    Storage(#[from] StorageError),
}
