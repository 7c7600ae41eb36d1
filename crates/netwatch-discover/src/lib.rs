//! netwatch-discover: Network device discovery and new-device alerting.
//!
//! Probes configured ranges with arp-scan (local links) or an nmap ping
//! sweep (routed networks), keeps a file-backed inventory of every device
//! seen, and sends a Telegram alert the first time a device appears.

pub mod classifier;
pub mod config;
pub mod error;
pub mod inventory;
pub mod notifier;
pub mod parser;
pub mod probe;
pub mod ranges;
pub mod reconcile;
pub mod watch;
