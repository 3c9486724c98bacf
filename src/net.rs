//! Byte-aligned IPv4 subnet arithmetic.
//!
//! The DHCP and NAT modules derive the network, broadcast and netmask
//! addresses from the gateway address and a prefix length. Only byte-aligned
//! prefixes (/8, /16, /24) are supported; anything else is rejected before
//! any module is configured.

use std::net::Ipv4Addr;

use crate::error::{LocalnetError, Result};

/// Number of whole masked octets for a supported prefix.
fn masked_octets(prefix: u8) -> Result<usize> {
    match prefix {
        8 | 16 | 24 => Ok(prefix as usize / 8),
        other => Err(LocalnetError::UnsupportedPrefix(other)),
    }
}

/// Network address: masked leading octets kept, trailing octets zeroed.
pub fn network_address(ip: Ipv4Addr, prefix: u8) -> Result<Ipv4Addr> {
    let keep = masked_octets(prefix)?;
    let mut octets = ip.octets();
    for octet in octets.iter_mut().skip(keep) {
        *octet = 0;
    }
    Ok(Ipv4Addr::from(octets))
}

/// Broadcast address: masked leading octets kept, trailing octets set to 255.
pub fn broadcast_address(ip: Ipv4Addr, prefix: u8) -> Result<Ipv4Addr> {
    let keep = masked_octets(prefix)?;
    let mut octets = ip.octets();
    for octet in octets.iter_mut().skip(keep) {
        *octet = 255;
    }
    Ok(Ipv4Addr::from(octets))
}

/// Dotted-quad netmask for the prefix (e.g. /24 -> 255.255.255.0).
pub fn netmask(prefix: u8) -> Result<Ipv4Addr> {
    let keep = masked_octets(prefix)?;
    let mut octets = [0u8; 4];
    for octet in octets.iter_mut().take(keep) {
        *octet = 255;
    }
    Ok(Ipv4Addr::from(octets))
}

/// CIDR spec of the subnet containing `ip`, e.g. "10.10.10.0/24".
pub fn subnet_spec(ip: Ipv4Addr, prefix: u8) -> Result<String> {
    Ok(format!("{}/{}", network_address(ip, prefix)?, prefix))
}
