//! Range configuration: which networks to scan and on which interface.
//!
//! File format, one entry per line:
//! ```text
//! # comment
//! 192.168.1.0/24
//! wlan0:10.0.5.0/24
//! ```
//! Invalid entries are dropped with a warning and never abort loading.

use std::fmt;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use netwatch_core::ValidationError;

use crate::classifier::parse_range;
use crate::config::WatchConfig;

/// One configured range and the interface hint used for local probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub net: IpNet,
    pub interface: String,
}

impl RangeSpec {
    pub fn new(net: IpNet, interface: impl Into<String>) -> Self {
        Self {
            net,
            interface: interface.into(),
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.interface, self.net)
    }
}

/// Parse one configuration line.
///
/// Returns `Ok(None)` for blank and comment lines. A bare range is tried
/// first so IPv6 ranges are not mistaken for `interface:range`.
pub fn parse_range_line(
    line: &str,
    default_interface: &str,
) -> Result<Option<RangeSpec>, ValidationError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if let Ok(net) = parse_range(line) {
        return Ok(Some(RangeSpec::new(net, default_interface)));
    }

    match line.split_once(':') {
        Some((iface, range)) if !iface.trim().is_empty() => {
            let net = parse_range(range).map_err(|_| ValidationError::InvalidRange(line.to_string()))?;
            Ok(Some(RangeSpec::new(net, iface.trim())))
        }
        _ => Err(ValidationError::InvalidRange(line.to_string())),
    }
}

/// Parse a whole range file body, skipping invalid lines with a warning.
pub fn parse_ranges(content: &str, default_interface: &str) -> Vec<RangeSpec> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| match parse_range_line(line, default_interface) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "Skipping invalid range entry");
                None
            }
        })
        .collect()
}

/// Source of the range list, re-read at the start of every cycle.
#[derive(Debug, Clone)]
pub struct RangeSource {
    path: PathBuf,
    default_interface: String,
    fallback: Vec<RangeSpec>,
}

impl RangeSource {
    pub fn new(path: impl Into<PathBuf>, default_interface: &str, fallback: Vec<RangeSpec>) -> Self {
        Self {
            path: path.into(),
            default_interface: default_interface.to_string(),
            fallback,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        let fallback = parse_ranges(
            &config.fallback_ranges.join("\n"),
            &config.default_interface,
        );
        Self::new(&config.ranges_file, &config.default_interface, fallback)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configured ranges, falling back when none are usable.
    pub fn load(&self) -> Vec<RangeSpec> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Range file not found, using fallback ranges"
                );
                return self.fallback.clone();
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read range file, using fallback ranges"
                );
                return self.fallback.clone();
            }
        };

        let ranges = parse_ranges(&content, &self.default_interface);
        if ranges.is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                "Range file has no valid entries, using fallback ranges"
            );
            return self.fallback.clone();
        }

        tracing::debug!(count = ranges.len(), "Loaded range configuration");
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(net: &str, iface: &str) -> RangeSpec {
        RangeSpec::new(net.parse().unwrap(), iface)
    }

    #[test]
    fn test_parse_range_line_forms() {
        assert_eq!(
            parse_range_line("eth0:192.168.1.0/24", "eth9").unwrap(),
            Some(spec("192.168.1.0/24", "eth0"))
        );
        assert_eq!(
            parse_range_line("  10.0.0.0/16  ", "eth9").unwrap(),
            Some(spec("10.0.0.0/16", "eth9"))
        );
        assert_eq!(
            parse_range_line("2001:db8::/64", "eth9").unwrap(),
            Some(spec("2001:db8::/64", "eth9"))
        );
        assert_eq!(
            parse_range_line("wlan0:2001:db8::/64", "eth9").unwrap(),
            Some(spec("2001:db8::/64", "wlan0"))
        );
        assert_eq!(parse_range_line("# lab network", "eth0").unwrap(), None);
        assert_eq!(parse_range_line("   ", "eth0").unwrap(), None);
    }

    #[test]
    fn test_parse_range_line_rejects_invalid() {
        assert!(parse_range_line("eth0:not-a-range", "eth0").is_err());
        assert!(parse_range_line(":192.168.1.0/24", "eth0").is_err());
        assert!(parse_range_line("banana", "eth0").is_err());
    }

    #[test]
    fn test_parse_ranges_skips_invalid_entries() {
        let content = "# office\neth0:192.168.1.0/24\nbogus\n\n10.0.0.0/33\nwlan0:10.0.5.0/24\n";
        let ranges = parse_ranges(content, "eth0");
        assert_eq!(
            ranges,
            vec![spec("192.168.1.0/24", "eth0"), spec("10.0.5.0/24", "wlan0")]
        );
    }

    #[test]
    fn test_load_falls_back_when_missing_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("networks.txt");
        let source = RangeSource::new(&path, "eth0", vec![spec("192.168.1.0/24", "eth0")]);
        assert_eq!(source.path(), path.as_path());

        assert_eq!(source.load(), vec![spec("192.168.1.0/24", "eth0")]);

        std::fs::write(&path, "# nothing yet\ninvalid\n").unwrap();
        assert_eq!(source.load(), vec![spec("192.168.1.0/24", "eth0")]);

        std::fs::write(&path, "eth1:172.16.0.0/24\n").unwrap();
        assert_eq!(source.load(), vec![spec("172.16.0.0/24", "eth1")]);
    }

    #[test]
    fn test_from_config_parses_fallback() {
        let config = WatchConfig::default();
        let source = RangeSource::from_config(&config);
        assert_eq!(source.fallback, vec![spec("192.168.1.0/24", "eth0")]);
    }
}
