//! Rule constraint functions
//!
//! This module centralizes the limits and protocol/address-family rules the
//! rule model enforces after parsing.
//!
//! # Examples
//!
//! ```
//! use fwrule::core::firewall::Protocol;
//! use fwrule::core::rule_constraints::*;
//!
//! assert!(protocol_supports_ports(Protocol::Tcp));
//! assert!(!protocol_supports_ports(Protocol::Icmp));
//! assert_eq!(protocol_target_limit(3), LEGACY_MAX_PROTOCOL_TARGETS);
//! ```

use super::firewall::Protocol;
use ipnetwork::IpNetwork;
use std::net::IpAddr;

// ═══════════════════════════════════════════════════════════════════════════
// Limits
// ═══════════════════════════════════════════════════════════════════════════

/// Maximum number of distinct targets on either side of a rule
pub const MAX_TARGETS_PER_SIDE: usize = 24;

/// Maximum number of ports or ICMP types in a rule
pub const MAX_PROTOCOL_TARGETS: usize = 24;

/// Port/type limit for callers that predate language version 4
pub const LEGACY_MAX_PROTOCOL_TARGETS: usize = 8;

/// Returns the port/type limit for a caller understanding `max_version`.
#[inline]
pub fn protocol_target_limit(max_version: u32) -> usize {
    if max_version < 4 {
        LEGACY_MAX_PROTOCOL_TARGETS
    } else {
        MAX_PROTOCOL_TARGETS
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Protocol Constraints
// ═══════════════════════════════════════════════════════════════════════════

/// Returns `true` if the protocol takes a port clause.
///
/// # Examples
///
/// ```
/// use fwrule::core::firewall::Protocol;
/// use fwrule::core::rule_constraints::protocol_supports_ports;
///
/// assert!(protocol_supports_ports(Protocol::Tcp));
/// assert!(protocol_supports_ports(Protocol::Udp));
/// assert!(!protocol_supports_ports(Protocol::Esp));
/// ```
#[inline]
pub fn protocol_supports_ports(protocol: Protocol) -> bool {
    matches!(protocol, Protocol::Tcp | Protocol::Udp)
}

/// Returns `true` if the protocol is an ICMP variant.
///
/// # Examples
///
/// ```
/// use fwrule::core::firewall::Protocol;
/// use fwrule::core::rule_constraints::protocol_is_icmp;
///
/// assert!(protocol_is_icmp(Protocol::Icmp));
/// assert!(protocol_is_icmp(Protocol::Icmp6));
/// assert!(!protocol_is_icmp(Protocol::Tcp));
/// ```
#[inline]
pub fn protocol_is_icmp(protocol: Protocol) -> bool {
    matches!(protocol, Protocol::Icmp | Protocol::Icmp6)
}

// ═══════════════════════════════════════════════════════════════════════════
// ICMP Protocol / IP Version Constraints
// ═══════════════════════════════════════════════════════════════════════════

/// Returns `true` if the address family is compatible with the protocol.
///
/// - `Protocol::Icmp` only works with IPv4 addresses
/// - `Protocol::Icmp6` only works with IPv6 addresses
/// - Every other protocol works with either family
///
/// # Examples
///
/// ```
/// use fwrule::core::firewall::Protocol;
/// use fwrule::core::rule_constraints::ip_compatible_with_protocol;
/// use std::net::IpAddr;
///
/// let ipv4: IpAddr = "192.168.1.1".parse().unwrap();
/// let ipv6: IpAddr = "fd00::1".parse().unwrap();
///
/// assert!(ip_compatible_with_protocol(&ipv4, Protocol::Icmp));
/// assert!(!ip_compatible_with_protocol(&ipv6, Protocol::Icmp));
/// assert!(ip_compatible_with_protocol(&ipv6, Protocol::Icmp6));
/// assert!(ip_compatible_with_protocol(&ipv6, Protocol::Tcp));
/// ```
#[inline]
pub fn ip_compatible_with_protocol(ip: &IpAddr, protocol: Protocol) -> bool {
    match protocol {
        Protocol::Icmp => ip.is_ipv4(),
        Protocol::Icmp6 => ip.is_ipv6(),
        _ => true,
    }
}

/// Returns `true` if the subnet's family is compatible with the protocol.
///
/// Same rules as [`ip_compatible_with_protocol`].
#[inline]
pub fn subnet_compatible_with_protocol(subnet: &IpNetwork, protocol: Protocol) -> bool {
    ip_compatible_with_protocol(&subnet.ip(), protocol)
}
