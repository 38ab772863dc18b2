//! Value validation for rule targets and payload fields
//!
//! Every check used by the parser and the rule model lives here so the two
//! stay consistent. Functions return the typed value on success and a
//! user-facing message on failure; callers attach the field name.

use ipnetwork::IpNetwork;
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Longest accepted `created_by`/`description` string, in characters
pub const MAX_STRING_LENGTH: usize = 255;

/// Highest accepted `PRIORITY` value
pub const MAX_PRIORITY: u8 = 100;

fn is_digits(text: &str, max_len: usize) -> bool {
    !text.is_empty() && text.len() <= max_len && text.bytes().all(|b| b.is_ascii_digit())
}

/// Returns `true` if `text` is a canonical lowercase 8-4-4-4-12 UUID.
///
/// # Examples
///
/// ```
/// use fwrule::validators::is_uuid;
///
/// assert!(is_uuid("b0b92cd9-1fe7-4636-8477-81d2742566c2"));
/// assert!(!is_uuid("B0B92CD9-1FE7-4636-8477-81D2742566C2"));
/// assert!(!is_uuid("b0b92cd91fe74636847781d2742566c2"));
/// ```
pub fn is_uuid(text: &str) -> bool {
    text.len() == 36
        && text.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_digit() || (b'a'..=b'f').contains(&b),
        })
}

/// Validates a VM UUID target.
///
/// # Errors
///
/// Returns `Err` unless `text` is a canonical lowercase UUID.
pub fn validate_uuid(text: &str) -> Result<Uuid, String> {
    if !is_uuid(text) {
        return Err(format!("UUID \"{text}\" is invalid"));
    }

    Uuid::parse_str(text).map_err(|_| format!("UUID \"{text}\" is invalid"))
}

/// Validates an IPv4 address target.
///
/// Rejects anything that isn't a dotted quad (including octets with leading
/// zeros), the all-zeroes address and the broadcast address.
///
/// # Examples
///
/// ```
/// use fwrule::validators::validate_ipv4_address;
///
/// assert!(validate_ipv4_address("192.168.1.1").is_ok());
/// assert!(validate_ipv4_address("0.0.0.0").is_err());
/// assert!(validate_ipv4_address("01.02.03.04").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` with the message `IPv4 address "<text>" is invalid`.
pub fn validate_ipv4_address(text: &str) -> Result<Ipv4Addr, String> {
    match text.parse::<Ipv4Addr>() {
        Ok(ip) if !ip.is_unspecified() && !ip.is_broadcast() => Ok(ip),
        _ => Err(format!("IPv4 address \"{text}\" is invalid")),
    }
}

/// Validates an IPv6 address target.
///
/// # Errors
///
/// Returns `Err` with the message `IPv6 address "<text>" is invalid`.
pub fn validate_ipv6_address(text: &str) -> Result<Ipv6Addr, String> {
    text.parse::<Ipv6Addr>()
        .map_err(|_| format!("IPv6 address \"{text}\" is invalid"))
}

/// Validates an IPv4 or IPv6 address, picking the family from the text.
///
/// # Errors
///
/// Returns `Err` if the address is invalid for its family.
pub fn validate_ip_address(text: &str) -> Result<IpAddr, String> {
    if text.contains(':') {
        validate_ipv6_address(text).map(IpAddr::V6)
    } else {
        validate_ipv4_address(text).map(IpAddr::V4)
    }
}

/// Validates a subnet in `address/prefix` form.
///
/// The address follows the same rules as single address targets. Prefix
/// lengths run from 0 to 32 for IPv4 and from 0 to 128 for IPv6. With
/// `enforce_mask`, the address must also be the network address.
///
/// # Examples
///
/// ```
/// use fwrule::validators::validate_subnet;
///
/// assert!(validate_subnet("10.8.0.0/16", false).is_ok());
/// assert!(validate_subnet("10.8.0.0/33", false).is_err());
/// assert!(validate_subnet("fd00::/64", false).is_ok());
/// assert!(validate_subnet("10.8.0.1/16", true).is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` describing which component of the subnet is wrong.
pub fn validate_subnet(text: &str, enforce_mask: bool) -> Result<IpNetwork, String> {
    let bad_address = || format!("Subnet \"{text}\" is invalid (bad address component)");
    let bad_prefix = || format!("Subnet \"{text}\" is invalid (bad prefix length)");

    let (address, prefix) = text.split_once('/').ok_or_else(bad_prefix)?;
    let address = validate_ip_address(address).map_err(|_| bad_address())?;

    let max_prefix = if address.is_ipv4() { 32 } else { 128 };
    let prefix = if is_digits(prefix, 3) {
        prefix.parse::<u8>().map_err(|_| bad_prefix())?
    } else {
        return Err(bad_prefix());
    };
    if prefix > max_prefix {
        return Err(bad_prefix());
    }

    let network = IpNetwork::new(address, prefix).map_err(|_| bad_prefix())?;
    if enforce_mask && network.network() != address {
        return Err(format!(
            "Subnet \"{text}\" is invalid (bits set to right of mask)"
        ));
    }

    Ok(network)
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err(format!("Port number \"{port}\" is invalid"))
    } else {
        Ok(port)
    }
}

/// Validates a port number written as text (1 to 5 digits, 1 to 65535).
///
/// # Examples
///
/// ```
/// use fwrule::validators::validate_port_number;
///
/// assert_eq!(validate_port_number("65535"), Ok(65535));
/// assert!(validate_port_number("65536").is_err());
/// assert!(validate_port_number("0").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` with the message `Port number "<text>" is invalid`.
pub fn validate_port_number(text: &str) -> Result<u16, String> {
    let invalid = || format!("Port number \"{text}\" is invalid");

    if !is_digits(text, 5) {
        return Err(invalid());
    }

    match text.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid()),
    }
}

/// Validates a port range.
///
/// A range whose start and end are equal is allowed.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - End port is less than the start port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if end < start {
        Err(format!(
            "The end of the range ({end}) cannot be less than the start ({start})"
        ))
    } else {
        Ok((start, end))
    }
}

/// Validates an ICMP type (0 to 255).
///
/// # Errors
///
/// Returns `Err` with the message `ICMP type "<text>" is invalid`.
pub fn validate_icmp_type(text: &str) -> Result<u8, String> {
    parse_u8(text).ok_or_else(|| format!("ICMP type \"{text}\" is invalid"))
}

/// Validates an ICMP code (0 to 255).
///
/// # Errors
///
/// Returns `Err` with the message `ICMP code "<text>" is invalid`.
pub fn validate_icmp_code(text: &str) -> Result<u8, String> {
    parse_u8(text).ok_or_else(|| format!("ICMP code \"{text}\" is invalid"))
}

fn parse_u8(text: &str) -> Option<u8> {
    if is_digits(text, 3) {
        text.parse().ok()
    } else {
        None
    }
}

/// Validates a rule priority (0 to [`MAX_PRIORITY`]).
///
/// # Errors
///
/// Returns `Err` if the priority is not a number in range.
pub fn validate_priority(text: &str) -> Result<u8, String> {
    match parse_u8(text) {
        Some(priority) if priority <= MAX_PRIORITY => Ok(priority),
        _ => Err(format!(
            "Priority \"{text}\" is invalid (must be between 0 and {MAX_PRIORITY})"
        )),
    }
}

/// Validates a boolean payload field.
///
/// Accepts JSON booleans and the strings `"true"` and `"false"`.
///
/// # Examples
///
/// ```
/// use fwrule::validators::validate_bool;
/// use serde_json::json;
///
/// assert_eq!(validate_bool("enabled", &json!(true)), Ok(true));
/// assert_eq!(validate_bool("enabled", &json!("false")), Ok(false));
/// assert!(validate_bool("enabled", &json!("yes")).is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` with the message `<name> must be true or false`.
pub fn validate_bool(name: &str, value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        _ => Err(format!("{name} must be true or false")),
    }
}

/// Validates a free-form string payload field.
///
/// # Errors
///
/// Returns `Err` if:
/// - The value is not a string
/// - The string is longer than [`MAX_STRING_LENGTH`] characters
pub fn validate_string(name: &str, value: &Value) -> Result<String, String> {
    let Value::String(text) = value else {
        return Err(format!("{name} must be a string"));
    };

    if text.chars().count() > MAX_STRING_LENGTH {
        return Err(format!(
            "{name} must be shorter than {MAX_STRING_LENGTH} characters"
        ));
    }

    Ok(text.clone())
}
