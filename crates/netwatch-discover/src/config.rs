//! Configuration for the netwatch discovery daemon.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level watch configuration.
///
/// Loaded from the `netwatch.toml` `[watch]` section or
/// `NETWATCH__WATCH__*` environment variables, once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory holding the device table and the allow/deny lists.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Range configuration file (`CIDR` or `interface:CIDR` per line).
    #[serde(default = "default_ranges_file")]
    pub ranges_file: PathBuf,

    /// Interface used for ranges that do not name one.
    #[serde(default = "default_interface")]
    pub default_interface: String,

    /// Ranges scanned when the range file is missing or has no valid entry.
    #[serde(default = "default_fallback_ranges")]
    pub fallback_ranges: Vec<String>,

    /// Target time between the starts of consecutive cycles.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Granularity of the inter-cycle sleep; bounds shutdown latency.
    #[serde(default = "default_sleep_slice")]
    pub sleep_slice_ms: u64,

    /// Upper bound on probing a single range, fallbacks included.
    #[serde(default = "default_range_timeout")]
    pub range_timeout_secs: u64,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Probe executables and their timing flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_arp_scan_path")]
    pub arp_scan_path: String,

    #[serde(default = "default_arp_path")]
    pub arp_path: String,

    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Prefix every probe with `sudo`.
    #[serde(default)]
    pub use_sudo: bool,

    /// Process timeout for the link-layer sweep.
    #[serde(default = "default_local_timeout")]
    pub local_timeout_secs: u64,

    /// Process timeout for the ARP cache fallback.
    #[serde(default = "default_fallback_timeout")]
    pub fallback_timeout_secs: u64,

    /// Process timeout for the reachability sweep.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// Per-request timeout passed to arp-scan.
    #[serde(default = "default_arp_scan_timeout_ms")]
    pub arp_scan_timeout_ms: u64,

    #[serde(default = "default_arp_scan_retries")]
    pub arp_scan_retries: u32,

    /// TCP SYN ping ports for the reachability sweep.
    #[serde(default = "default_ping_ports")]
    pub ping_ports: String,

    /// Per-host timeout for the reachability sweep.
    #[serde(default = "default_host_timeout")]
    pub host_timeout_secs: u64,

    #[serde(default = "default_probe_retries")]
    pub max_retries: u32,
}

/// Messaging endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub bot_token: Option<String>,

    #[serde(default)]
    pub chat_id: Option<String>,

    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,

    /// Alert template; `{mac}`, `{ip}`, `{vendor}` and `{timestamp}` are substituted.
    #[serde(default = "default_alert_message")]
    pub alert_message: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Total delivery attempts per alert.
    #[serde(default = "default_notify_retries")]
    pub max_retries: u32,

    /// Base backoff; attempt `n` waits `n * retry_delay_secs` before the next one.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl WatchConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn sleep_slice(&self) -> Duration {
        Duration::from_millis(self.sleep_slice_ms.max(1))
    }

    pub fn range_timeout(&self) -> Duration {
        Duration::from_secs(self.range_timeout_secs)
    }
}

impl NotifyConfig {
    /// Bot token and destination, when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = self.bot_token.as_deref().filter(|t| !t.trim().is_empty())?;
        let chat = self.chat_id.as_deref().filter(|c| !c.trim().is_empty())?;
        Some((token, chat))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_ranges_file() -> PathBuf {
    PathBuf::from("config/networks.txt")
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_fallback_ranges() -> Vec<String> {
    vec!["192.168.1.0/24".to_string()]
}

fn default_scan_interval() -> u64 {
    300
}

fn default_sleep_slice() -> u64 {
    100
}

fn default_range_timeout() -> u64 {
    60
}

fn default_arp_scan_path() -> String {
    "arp-scan".to_string()
}

fn default_arp_path() -> String {
    "arp".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_local_timeout() -> u64 {
    5
}

fn default_fallback_timeout() -> u64 {
    5
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_arp_scan_timeout_ms() -> u64 {
    1000
}

fn default_arp_scan_retries() -> u32 {
    2
}

fn default_ping_ports() -> String {
    "21,22,80,443".to_string()
}

fn default_host_timeout() -> u64 {
    2
}

fn default_probe_retries() -> u32 {
    1
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_parse_mode() -> String {
    "HTML".to_string()
}

fn default_alert_message() -> String {
    "⚠️ ALERT: New device detected\nMAC: {mac}\nIP: {ip}\nVendor: {vendor}\nTime: {timestamp}"
        .to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_notify_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ranges_file: default_ranges_file(),
            default_interface: default_interface(),
            fallback_ranges: default_fallback_ranges(),
            scan_interval_secs: default_scan_interval(),
            sleep_slice_ms: default_sleep_slice(),
            range_timeout_secs: default_range_timeout(),
            probe: ProbeConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            arp_scan_path: default_arp_scan_path(),
            arp_path: default_arp_path(),
            nmap_path: default_nmap_path(),
            use_sudo: false,
            local_timeout_secs: default_local_timeout(),
            fallback_timeout_secs: default_fallback_timeout(),
            remote_timeout_secs: default_remote_timeout(),
            arp_scan_timeout_ms: default_arp_scan_timeout_ms(),
            arp_scan_retries: default_arp_scan_retries(),
            ping_ports: default_ping_ports(),
            host_timeout_secs: default_host_timeout(),
            max_retries: default_probe_retries(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            bot_token: None,
            chat_id: None,
            parse_mode: default_parse_mode(),
            alert_message: default_alert_message(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_notify_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Load the `[watch]` table from `<file_prefix>.toml` and `NETWATCH__` variables.
///
/// A missing file or table yields the defaults; a present but malformed
/// table is an error.
pub fn load(file_prefix: &str) -> Result<WatchConfig, config::ConfigError> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("NETWATCH")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<WatchConfig>("watch") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(WatchConfig::default()),
        Err(e) => Err(e),
    }
}
