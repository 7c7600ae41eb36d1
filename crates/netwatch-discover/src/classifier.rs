//! Address and range validation, and local/remote range classification.
//!
//! A range is *local* when it lies inside a network attached to one of the
//! host's own interfaces; those ranges get a link-layer sweep, everything
//! else a routed reachability sweep.

use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use netwatch_core::ValidationError;

/// True iff `s` is a syntactically valid IPv4 or IPv6 address.
pub fn validate_address(s: &str) -> bool {
    s.trim().parse::<IpAddr>().is_ok()
}

/// True iff `s` parses as a network range. Host bits need not be zero.
pub fn validate_range(s: &str) -> bool {
    parse_range(s).is_ok()
}

/// Parse a range loosely and truncate it to its network address.
///
/// A bare address is accepted as a single-host range.
pub fn parse_range(s: &str) -> Result<IpNet, ValidationError> {
    let trimmed = s.trim();
    if let Ok(net) = trimmed.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    match trimmed.parse::<IpAddr>() {
        Ok(addr) => Ok(IpNet::from(addr)),
        Err(_) => Err(ValidationError::InvalidRange(s.to_string())),
    }
}

/// Networks attached to the probing host's interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalNetworks {
    nets: Vec<IpNet>,
}

impl LocalNetworks {
    pub fn new(nets: Vec<IpNet>) -> Self {
        Self {
            nets: nets.into_iter().map(|n| n.trunc()).collect(),
        }
    }

    /// Enumerate the host's non-loopback interface networks.
    ///
    /// Failure to enumerate is not fatal: every range is then treated as remote.
    pub fn detect() -> Self {
        let interfaces = match NetworkInterface::show() {
            Ok(ifaces) => ifaces,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Could not enumerate local interfaces, treating all ranges as remote"
                );
                return Self::default();
            }
        };

        let nets: Vec<IpNet> = interfaces
            .iter()
            .filter(|iface| iface.name != "lo")
            .flat_map(|iface| iface.addr.iter().filter_map(interface_network))
            .filter(|net| !net.addr().is_loopback())
            .collect();

        tracing::debug!(local_networks = ?nets, "Detected local networks");
        Self::new(nets)
    }

    pub fn as_slice(&self) -> &[IpNet] {
        &self.nets
    }

    /// True iff `range` equals or is a subnet of any local network.
    pub fn is_local(&self, range: &IpNet) -> bool {
        is_local_range(range, &self.nets)
    }
}

/// True iff `range` equals or is a subnet of any of `known_local`.
pub fn is_local_range(range: &IpNet, known_local: &[IpNet]) -> bool {
    let range = range.trunc();
    known_local.iter().any(|local| local.contains(&range))
}

fn interface_network(addr: &Addr) -> Option<IpNet> {
    let net = match addr {
        Addr::V4(v4) => {
            let prefix = u32::from(v4.netmask?).count_ones() as u8;
            IpNet::V4(Ipv4Net::new(v4.ip, prefix).ok()?)
        }
        Addr::V6(v6) => {
            let prefix = u128::from(v6.netmask?).count_ones() as u8;
            IpNet::V6(Ipv6Net::new(v6.ip, prefix).ok()?)
        }
    };
    Some(net.trunc())
}
