//! Probe output parsing.
//!
//! All parsers are line-oriented and total: lines that do not match the
//! expected layout are skipped, and malformed or empty input yields an
//! empty list. Addresses are returned as text and validated later.

use std::collections::HashSet;

use netwatch_core::types::UNKNOWN;
use netwatch_core::{HardwareId, ScannedDevice};

use crate::probe::{OutputFormat, ProbeOutput};

const REPORT_PREFIX: &str = "Nmap scan report for ";

/// Dispatch to the parser matching the probe's output format.
pub fn parse_probe_output(output: &ProbeOutput) -> Vec<ScannedDevice> {
    match output.format {
        OutputFormat::LinkLayer => parse_link_layer_output(&output.text),
        OutputFormat::ArpCache => parse_arp_cache_output(&output.text),
        OutputFormat::Reachability => parse_reachability_output(&output.text),
    }
}

/// Parse arp-scan style output: `address  hardware-id  vendor label`.
///
/// The hardware identifier is six hex octets delimited by `:` or `-` in
/// any case; it is returned in canonical form.
pub fn parse_link_layer_output(text: &str) -> Vec<ScannedDevice> {
    text.lines().filter_map(parse_link_layer_line).collect()
}

fn parse_link_layer_line(line: &str) -> Option<ScannedDevice> {
    let (address, rest) = next_token(line)?;
    if !is_dotted_quad(address) {
        return None;
    }

    let (mac, rest) = next_token(rest)?;
    if !is_delimited_mac(mac) {
        return None;
    }

    let vendor = rest.trim();
    if vendor.is_empty() {
        return None;
    }

    let hardware_id = HardwareId::normalize(mac)?;
    Some(ScannedDevice::new(address, hardware_id, vendor))
}

/// Parse `arp -a` output: `host (address) at hardware-id [ether] on iface`.
pub fn parse_arp_cache_output(text: &str) -> Vec<ScannedDevice> {
    text.lines().filter_map(parse_arp_cache_line).collect()
}

fn parse_arp_cache_line(line: &str) -> Option<ScannedDevice> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let [_host, address, "at", mac, "[ether]", "on", _iface] = tokens.as_slice() else {
        return None;
    };

    let address = address.strip_prefix('(')?.strip_suffix(')')?;
    if !is_dotted_quad(address) {
        return None;
    }

    let hardware_id = HardwareId::normalize(mac)?;
    Some(ScannedDevice::new(address, hardware_id, UNKNOWN))
}

/// Parse an nmap ping sweep: one device per `Nmap scan report for` line.
///
/// Devices carry the sentinel hardware identifier. Repeated addresses are
/// collapsed, first occurrence wins.
pub fn parse_reachability_output(text: &str) -> Vec<ScannedDevice> {
    let mut seen = HashSet::new();
    text.lines()
        .filter_map(parse_report_line)
        .filter(|address| seen.insert(address.to_string()))
        .map(ScannedDevice::unidentified)
        .collect()
}

/// Extract the address from `Nmap scan report for 10.0.0.5` or
/// `Nmap scan report for name.example (10.0.0.5)`.
fn parse_report_line(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix(REPORT_PREFIX)?.trim();
    let address = match rest.rfind('(') {
        Some(open) if rest.ends_with(')') => &rest[open + 1..rest.len() - 1],
        _ => rest,
    };

    if address.is_empty() || address.contains(char::is_whitespace) {
        return None;
    }
    Some(address)
}

/// Split off the first whitespace-delimited token, keeping the remainder intact.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => Some((&s[..end], &s[end..])),
        None => Some((s, "")),
    }
}

/// Four dot-separated groups of one to three digits. Octet range is
/// checked later by address validation.
fn is_dotted_quad(s: &str) -> bool {
    let groups: Vec<&str> = s.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()))
}

/// Six hex octets separated by `:` or `-`.
fn is_delimited_mac(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 17
        && bytes.iter().enumerate().all(|(i, &b)| {
            if i % 3 == 2 {
                b == b':' || b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        })
}
