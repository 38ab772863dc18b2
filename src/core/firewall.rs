//! Firewall rule vocabulary
//!
//! Typed building blocks shared by the parser and the rule model:
//!
//! - [`Action`], [`Protocol`], [`Direction`] and [`TargetType`] name the
//!   keywords of the rule language
//! - [`Target`] is a single FROM/TO match criterion
//! - [`PortSpec`] and [`IcmpSpec`] are protocol targets
//! - [`ProtocolClause`] ties a protocol to the targets it allows
//! - [`Field`] names the persisted attributes of a rule
//!
//! Every type serializes to the JSON shape used by stored rules and parse
//! trees, e.g. a tag target is `["tag", "role"]` or `["tag", ["role", "web"]]`.
//!
//! # Example
//!
//! ```
//! use fwrule::core::firewall::{IcmpSpec, PortSpec, Protocol};
//!
//! assert_eq!(Protocol::Icmp6.as_str(), "icmp6");
//! assert_eq!(PortSpec::range(20, 40).to_string(), "20 - 40");
//! assert_eq!(IcmpSpec::with_code(8, 0).to_string(), "8:0");
//! ```

use crate::validators;
use ipnetwork::IpNetwork;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Rule action
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Action {
    /// Let matching traffic through
    Allow,
    /// Drop matching traffic
    Block,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Block => "block",
        }
    }

    /// Keyword as written in canonical rule text
    pub const fn keyword(self) -> &'static str {
        match self {
            Action::Allow => "ALLOW",
            Action::Block => "BLOCK",
        }
    }
}

/// Network protocol matched by a rule
///
/// `Copy` trait allows efficient passing by value for this small enum.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    /// Transmission Control Protocol
    Tcp,
    /// User Datagram Protocol
    Udp,
    /// Internet Control Message Protocol (IPv4)
    Icmp,
    /// Internet Control Message Protocol version 6
    Icmp6,
    /// IPsec Authentication Header
    Ah,
    /// IPsec Encapsulating Security Payload
    Esp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Icmp6 => "icmp6",
            Protocol::Ah => "ah",
            Protocol::Esp => "esp",
        }
    }
}

/// Side of a rule
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    From,
    To,
}

impl Direction {
    /// Both directions, in the order rules are validated
    pub const ALL: [Direction; 2] = [Direction::To, Direction::From];
}

/// Kind of a FROM/TO target, in canonical rendering order
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetType {
    Wildcard,
    Ip,
    Subnet,
    Tag,
    #[serde(alias = "machine")]
    Vm,
}

impl TargetType {
    /// Key used for this target type in `from`/`to` maps
    pub const fn plural(self) -> &'static str {
        match self {
            TargetType::Wildcard => "wildcards",
            TargetType::Ip => "ips",
            TargetType::Subnet => "subnets",
            TargetType::Tag => "tags",
            TargetType::Vm => "vms",
        }
    }
}

/// Persisted rule attribute
///
/// Also used to attribute validation errors to the payload field that
/// caused them.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    CreatedBy,
    Description,
    Enabled,
    Global,
    Log,
    OwnerUuid,
    Rule,
    Uuid,
    Version,
}

/// Fields returned by `Rule::serialize` when no explicit list is given
pub const FIELDS: [Field; 9] = [
    Field::CreatedBy,
    Field::Description,
    Field::Enabled,
    Field::Global,
    Field::Log,
    Field::OwnerUuid,
    Field::Rule,
    Field::Uuid,
    Field::Version,
];

/// Wildcard target
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum Wildcard {
    /// Any address
    #[serde(rename = "any")]
    #[strum(serialize = "any")]
    Any,
    /// Every VM the rule applies to (`all vms`)
    #[serde(rename = "vmall")]
    #[strum(serialize = "vmall")]
    VmAll,
}

impl Wildcard {
    /// Text form in canonical rule text
    pub const fn keyword(self) -> &'static str {
        match self {
            Wildcard::Any => "any",
            Wildcard::VmAll => "all vms",
        }
    }
}

/// Tag target: a bare tag name or a name/value pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum TagTarget {
    Name(String),
    Pair(String, String),
}

impl TagTarget {
    pub fn name(&self) -> &str {
        match self {
            TagTarget::Name(name) | TagTarget::Pair(name, _) => name,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            TagTarget::Name(_) => None,
            TagTarget::Pair(_, value) => Some(value),
        }
    }
}

/// A single FROM/TO match criterion
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawTarget")]
pub enum Target {
    Wildcard(Wildcard),
    Ip(IpAddr),
    Subnet(IpNetwork),
    Tag(TagTarget),
    Vm(Uuid),
}

impl Target {
    pub const fn target_type(&self) -> TargetType {
        match self {
            Target::Wildcard(_) => TargetType::Wildcard,
            Target::Ip(_) => TargetType::Ip,
            Target::Subnet(_) => TargetType::Subnet,
            Target::Tag(_) => TargetType::Tag,
            Target::Vm(_) => TargetType::Vm,
        }
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(self.target_type().as_ref())?;
        match self {
            Target::Wildcard(wildcard) => tuple.serialize_element(wildcard)?,
            Target::Ip(ip) => tuple.serialize_element(ip)?,
            Target::Subnet(subnet) => tuple.serialize_element(subnet)?,
            Target::Tag(tag) => tuple.serialize_element(tag)?,
            Target::Vm(vm) => tuple.serialize_element(vm)?,
        }
        tuple.end()
    }
}

/// Wire form of a [`Target`]: `[type, value]`
#[derive(Deserialize)]
struct RawTarget(TargetType, RawTargetValue);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTargetValue {
    Text(String),
    Pair(String, String),
}

impl TryFrom<RawTarget> for Target {
    type Error = String;

    fn try_from(RawTarget(kind, value): RawTarget) -> Result<Self, Self::Error> {
        match (kind, value) {
            (TargetType::Tag, RawTargetValue::Text(name)) => Ok(Target::Tag(TagTarget::Name(name))),
            (TargetType::Tag, RawTargetValue::Pair(name, value)) => {
                Ok(Target::Tag(TagTarget::Pair(name, value)))
            }
            (TargetType::Wildcard, RawTargetValue::Text(text)) => match text.as_str() {
                "any" => Ok(Target::Wildcard(Wildcard::Any)),
                "vmall" => Ok(Target::Wildcard(Wildcard::VmAll)),
                _ => Err(format!("Wildcard \"{text}\" is invalid")),
            },
            (TargetType::Ip, RawTargetValue::Text(text)) => {
                validators::validate_ip_address(&text).map(Target::Ip)
            }
            (TargetType::Subnet, RawTargetValue::Text(text)) => {
                validators::validate_subnet(&text, false).map(Target::Subnet)
            }
            (TargetType::Vm, RawTargetValue::Text(text)) => {
                validators::validate_uuid(&text).map(Target::Vm)
            }
            (kind, RawTargetValue::Pair(..)) => Err(format!("{kind} target cannot have a value pair")),
        }
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// TCP/UDP protocol target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortSpec {
    /// Every port (`PORT all`)
    All,
    Single(u16),
    Range(PortRange),
}

impl PortSpec {
    pub const fn range(start: u16, end: u16) -> Self {
        PortSpec::Range(PortRange { start, end })
    }

    /// Ordering key: ascending by range start (or bare value), then end
    pub const fn sort_key(&self) -> (u16, u16) {
        match self {
            PortSpec::All => (0, 0),
            PortSpec::Single(port) => (*port, *port),
            PortSpec::Range(range) => (range.start, range.end),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::All => f.write_str("all"),
            PortSpec::Single(port) => write!(f, "{port}"),
            PortSpec::Range(range) => range.fmt(f),
        }
    }
}

impl Serialize for PortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PortSpec::All => serializer.serialize_str("all"),
            PortSpec::Single(port) => serializer.serialize_u16(*port),
            PortSpec::Range(range) => range.serialize(serializer),
        }
    }
}

/// ICMP/ICMPv6 protocol target, `type[:code]` in stored form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpSpec {
    /// Every type (`TYPE all`)
    All,
    Type { icmp_type: u8, code: Option<u8> },
}

impl IcmpSpec {
    pub const fn new(icmp_type: u8) -> Self {
        IcmpSpec::Type {
            icmp_type,
            code: None,
        }
    }

    pub const fn with_code(icmp_type: u8, code: u8) -> Self {
        IcmpSpec::Type {
            icmp_type,
            code: Some(code),
        }
    }

    /// Ordering key: `(type << 8) + code`, a missing code counting as 0
    pub fn sort_key(&self) -> (u16, bool) {
        match self {
            IcmpSpec::All => (0, false),
            IcmpSpec::Type { icmp_type, code } => (
                (u16::from(*icmp_type) << 8) + u16::from(code.unwrap_or(0)),
                code.is_some(),
            ),
        }
    }
}

impl fmt::Display for IcmpSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpSpec::All => f.write_str("all"),
            IcmpSpec::Type {
                icmp_type,
                code: None,
            } => write!(f, "{icmp_type}"),
            IcmpSpec::Type {
                icmp_type,
                code: Some(code),
            } => write!(f, "{icmp_type}:{code}"),
        }
    }
}

impl Serialize for IcmpSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Protocol of a rule together with its targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawProtocol", try_from = "RawProtocol")]
pub enum ProtocolClause {
    Tcp(Vec<PortSpec>),
    Udp(Vec<PortSpec>),
    Icmp(Vec<IcmpSpec>),
    Icmp6(Vec<IcmpSpec>),
    Ah,
    Esp,
}

impl ProtocolClause {
    pub const fn protocol(&self) -> Protocol {
        match self {
            ProtocolClause::Tcp(_) => Protocol::Tcp,
            ProtocolClause::Udp(_) => Protocol::Udp,
            ProtocolClause::Icmp(_) => Protocol::Icmp,
            ProtocolClause::Icmp6(_) => Protocol::Icmp6,
            ProtocolClause::Ah => Protocol::Ah,
            ProtocolClause::Esp => Protocol::Esp,
        }
    }

    pub fn ports(&self) -> Option<&[PortSpec]> {
        match self {
            ProtocolClause::Tcp(ports) | ProtocolClause::Udp(ports) => Some(ports),
            _ => None,
        }
    }

    pub fn types(&self) -> Option<&[IcmpSpec]> {
        match self {
            ProtocolClause::Icmp(types) | ProtocolClause::Icmp6(types) => Some(types),
            _ => None,
        }
    }

    /// Number of protocol targets (ports or types)
    pub fn target_count(&self) -> usize {
        self.ports()
            .map(<[PortSpec]>::len)
            .or_else(|| self.types().map(<[IcmpSpec]>::len))
            .unwrap_or(0)
    }
}

/// Wire form of a [`ProtocolClause`]: `{name, targets}`
#[derive(Serialize, Deserialize)]
struct RawProtocol {
    name: Protocol,
    #[serde(default)]
    targets: Vec<RawProtocolTarget>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawProtocolTarget {
    Number(u32),
    Range(PortRange),
    Text(String),
}

impl From<ProtocolClause> for RawProtocol {
    fn from(clause: ProtocolClause) -> Self {
        let name = clause.protocol();
        let targets = match clause {
            ProtocolClause::Tcp(ports) | ProtocolClause::Udp(ports) => ports
                .into_iter()
                .map(|port| match port {
                    PortSpec::All => RawProtocolTarget::Text("all".to_string()),
                    PortSpec::Single(port) => RawProtocolTarget::Number(u32::from(port)),
                    PortSpec::Range(range) => RawProtocolTarget::Range(range),
                })
                .collect(),
            ProtocolClause::Icmp(types) | ProtocolClause::Icmp6(types) => types
                .into_iter()
                .map(|icmp| RawProtocolTarget::Text(icmp.to_string()))
                .collect(),
            ProtocolClause::Ah | ProtocolClause::Esp => Vec::new(),
        };
        RawProtocol { name, targets }
    }
}

impl TryFrom<RawProtocol> for ProtocolClause {
    type Error = String;

    fn try_from(raw: RawProtocol) -> Result<Self, Self::Error> {
        match raw.name {
            Protocol::Tcp => raw_ports(raw.targets).map(ProtocolClause::Tcp),
            Protocol::Udp => raw_ports(raw.targets).map(ProtocolClause::Udp),
            Protocol::Icmp => raw_types(raw.targets).map(ProtocolClause::Icmp),
            Protocol::Icmp6 => raw_types(raw.targets).map(ProtocolClause::Icmp6),
            Protocol::Ah | Protocol::Esp if !raw.targets.is_empty() => {
                Err(format!("protocol {} does not take targets", raw.name))
            }
            Protocol::Ah => Ok(ProtocolClause::Ah),
            Protocol::Esp => Ok(ProtocolClause::Esp),
        }
    }
}

fn raw_ports(targets: Vec<RawProtocolTarget>) -> Result<Vec<PortSpec>, String> {
    if targets.is_empty() {
        return Err("no ports specified".to_string());
    }

    let ports = targets
        .into_iter()
        .map(|target| match target {
            RawProtocolTarget::Number(port) => {
                validators::validate_port_number(&port.to_string()).map(PortSpec::Single)
            }
            RawProtocolTarget::Range(range) => {
                validators::validate_port_range(range.start, range.end)
                    .map(|(start, end)| PortSpec::range(start, end))
            }
            RawProtocolTarget::Text(text) if text.eq_ignore_ascii_case("all") => Ok(PortSpec::All),
            RawProtocolTarget::Text(text) => {
                validators::validate_port_number(&text).map(PortSpec::Single)
            }
        })
        .collect::<Result<Vec<_>, String>>()?;

    if ports.len() > 1 && ports.contains(&PortSpec::All) {
        return Err("PORT all cannot be combined with other ports".to_string());
    }
    Ok(ports)
}

fn raw_types(targets: Vec<RawProtocolTarget>) -> Result<Vec<IcmpSpec>, String> {
    if targets.is_empty() {
        return Err("no ICMP types specified".to_string());
    }

    let types = targets
        .into_iter()
        .map(|target| match target {
            RawProtocolTarget::Number(icmp_type) => {
                validators::validate_icmp_type(&icmp_type.to_string()).map(IcmpSpec::new)
            }
            RawProtocolTarget::Text(text) if text.eq_ignore_ascii_case("all") => Ok(IcmpSpec::All),
            RawProtocolTarget::Text(text) => match text.split_once(':') {
                Some((icmp_type, code)) => Ok(IcmpSpec::with_code(
                    validators::validate_icmp_type(icmp_type)?,
                    validators::validate_icmp_code(code)?,
                )),
                None => validators::validate_icmp_type(&text).map(IcmpSpec::new),
            },
            RawProtocolTarget::Range(range) => Err(format!(
                "ICMP type \"{}-{}\" is invalid",
                range.start, range.end
            )),
        })
        .collect::<Result<Vec<_>, String>>()?;

    if types.len() > 1 && types.contains(&IcmpSpec::All) {
        return Err("TYPE all cannot be combined with other types".to_string());
    }
    Ok(types)
}

/// Deduplicated, sorted targets grouped by type
///
/// Serializes with every type present, e.g.
/// `{"ips": [], "subnets": [], "tags": ["db"], "vms": [], "wildcards": ["vmall"]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetSet {
    pub ips: Vec<IpAddr>,
    pub subnets: Vec<IpNetwork>,
    pub tags: Vec<TagTarget>,
    pub vms: Vec<Uuid>,
    pub wildcards: Vec<Wildcard>,
}

/// Per tag name: whether any value matches, and which values were asked for
#[derive(Debug, Default)]
struct TagMatch {
    all: bool,
    values: BTreeSet<String>,
}

impl TargetSet {
    /// Collects targets, dropping duplicates and sorting each type.
    ///
    /// A bare `tag "n"` and `tag "n" = "v"` may both be asserted; the bare
    /// name covers every value, so only it is kept.
    pub fn from_targets<'a>(targets: impl IntoIterator<Item = &'a Target>) -> Self {
        let mut set = TargetSet::default();
        let mut tags: BTreeMap<&str, TagMatch> = BTreeMap::new();

        for target in targets {
            match target {
                Target::Wildcard(wildcard) => set.wildcards.push(*wildcard),
                Target::Ip(ip) => set.ips.push(*ip),
                Target::Subnet(subnet) => set.subnets.push(*subnet),
                Target::Vm(vm) => set.vms.push(*vm),
                Target::Tag(tag) => {
                    let entry = tags.entry(tag.name()).or_default();
                    match tag.value() {
                        Some(value) => {
                            entry.values.insert(value.to_string());
                        }
                        None => entry.all = true,
                    }
                }
            }
        }

        sort_by_text(&mut set.ips);
        sort_by_text(&mut set.subnets);
        set.vms.sort_unstable();
        set.vms.dedup();
        set.wildcards.sort_unstable();
        set.wildcards.dedup();

        for (name, matched) in tags {
            if matched.all {
                set.tags.push(TagTarget::Name(name.to_string()));
            } else {
                set.tags.extend(
                    matched
                        .values
                        .into_iter()
                        .map(|value| TagTarget::Pair(name.to_string(), value)),
                );
            }
        }

        set
    }

    pub fn len(&self) -> usize {
        self.ips.len() + self.subnets.len() + self.tags.len() + self.vms.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_wildcard(&self, wildcard: Wildcard) -> bool {
        self.wildcards.contains(&wildcard)
    }
}

fn sort_by_text<T: ToString + PartialEq>(values: &mut Vec<T>) {
    values.sort_by_cached_key(ToString::to_string);
    values.dedup();
}
