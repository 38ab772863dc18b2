//! Rule model
//!
//! [`Rule::create`] turns a payload (rule text or a parse tree plus metadata)
//! into a canonical [`Rule`]: targets deduplicated and sorted per side,
//! protocol targets ordered, limits and address families checked. Every
//! problem found along the way is returned together in [`ValidationErrors`].
//!
//! A rule renders back to canonical text with [`Rule::text`], which parses
//! to an equivalent rule.
//!
//! # Example
//!
//! ```
//! use fwrule::{Rule, RuleOptions, RulePayload};
//!
//! let payload = RulePayload::new("FROM any TO all vms ALLOW tcp PORT 443 AND PORT 80");
//! let rule = Rule::create(&payload, &RuleOptions::default()).unwrap();
//!
//! assert!(rule.all_vms());
//! assert_eq!(rule.text(), "FROM any TO all vms ALLOW tcp (PORT 80 AND PORT 443)");
//! ```

use super::error::{Error, ValidationErrors};
use super::firewall::{
    Action, FIELDS, Field, IcmpSpec, PortSpec, Protocol, ProtocolClause, TagTarget, TargetSet,
    Wildcard,
};
use super::parser::{self, ParsedRule};
use super::rule_constraints::{
    MAX_TARGETS_PER_SIDE, ip_compatible_with_protocol, protocol_is_icmp, protocol_supports_ports,
    protocol_target_limit, subnet_compatible_with_protocol,
};
use crate::config::RuleOptions;
use crate::validators;
use chrono::Utc;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Write as _};
use std::net::IpAddr;
use tracing::debug;
use uuid::Uuid;

/// Input for [`Rule::create`].
///
/// Loosely typed fields stay as JSON values so that a payload from an API
/// caller is validated field by field instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Pre-parsed tree, used instead of `rule` when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
}

impl RulePayload {
    /// Payload holding only rule text
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: Some(rule.into()),
            ..Self::default()
        }
    }

    /// Payload holding only a parse tree
    pub fn from_parsed(parsed: ParsedRule) -> Self {
        Self {
            parsed: Some(parsed),
            ..Self::default()
        }
    }
}

/// A validated, normalized firewall rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    uuid: Uuid,
    owner_uuid: Option<Uuid>,
    enabled: bool,
    log: bool,
    action: Action,
    protocol: ProtocolClause,
    priority: u8,
    from: TargetSet,
    to: TargetSet,
    all: TargetSet,
    version: String,
    created_by: Option<String>,
    description: Option<String>,
}

/// Structured view of a rule, as returned by [`Rule::raw`]
#[derive(Debug, Clone, Serialize)]
pub struct RawRule<'a> {
    pub action: Action,
    pub enabled: bool,
    pub log: bool,
    pub from: &'a TargetSet,
    pub to: &'a TargetSet,
    pub priority: u8,
    pub protocol: Protocol,
    pub uuid: Uuid,
    pub version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<&'a [PortSpec]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<&'a [IcmpSpec]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

/// Metadata fields, checked before the rule body
struct Metadata {
    uuid: Uuid,
    owner_uuid: Option<Uuid>,
    enabled: bool,
    log: bool,
    created_by: Option<String>,
    description: Option<String>,
}

impl Rule {
    /// Validates a payload and builds the canonical rule.
    ///
    /// # Errors
    ///
    /// Returns every problem found: unparseable rule text, invalid metadata
    /// fields, and rule bodies that break limits or affect no VMs.
    pub fn create(payload: &RulePayload, options: &RuleOptions) -> Result<Rule, ValidationErrors> {
        let mut errors = Vec::new();

        let parsed = match (&payload.parsed, payload.rule.as_deref()) {
            (Some(parsed), _) => match parsed.check(&options.parse_options()) {
                Ok(()) => Some(parsed.clone()),
                Err(err) => {
                    errors.push(err);
                    None
                }
            },
            (None, Some(text)) if !text.is_empty() => {
                match parser::parse(text, &options.parse_options()) {
                    Ok(parsed) => Some(parsed),
                    Err(err) => {
                        errors.push(err);
                        None
                    }
                }
            }
            (None, _) => {
                errors.push(Error::invalid(Field::Rule, "No rule specified"));
                None
            }
        };

        let metadata = check_metadata(payload, options, &mut errors);

        let Some(parsed) = parsed else {
            return Err(fail(errors));
        };

        let protocol = normalize_protocol(parsed.protocol);
        check_protocol_limit(&protocol, options.max_version, &mut errors);

        if parsed.from.is_empty() || parsed.to.is_empty() {
            errors.push(Error::invalid(
                Field::Rule,
                "rule must have at least one FROM and one TO target",
            ));
        }

        let from = TargetSet::from_targets(&parsed.from);
        let to = TargetSet::from_targets(&parsed.to);
        let all = TargetSet::from_targets(parsed.from.iter().chain(&parsed.to));

        if from.len() > MAX_TARGETS_PER_SIDE || to.len() > MAX_TARGETS_PER_SIDE {
            errors.push(Error::invalid(
                Field::Rule,
                format!("maximum of {MAX_TARGETS_PER_SIDE} targets allowed per side"),
            ));
        }

        check_address_families(&all, protocol.protocol(), &mut errors);

        if !all.has_wildcard(Wildcard::VmAll) && all.tags.is_empty() && all.vms.is_empty() {
            errors.push(Error::invalid(Field::Rule, "rule does not affect VMs"));
        }

        if !errors.is_empty() {
            return Err(fail(errors));
        }

        let rule = Rule {
            uuid: metadata.uuid,
            owner_uuid: metadata.owner_uuid,
            enabled: metadata.enabled,
            log: metadata.log,
            action: parsed.action,
            protocol,
            priority: parsed.priority.unwrap_or(0),
            from,
            to,
            all,
            version: payload
                .version
                .clone()
                .filter(|version| !version.is_empty())
                .unwrap_or_else(generate_version),
            created_by: metadata.created_by,
            description: metadata.description,
        };

        debug!(uuid = %rule.uuid, protocol = %rule.protocol.protocol(), "Created rule");
        Ok(rule)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn owner_uuid(&self) -> Option<Uuid> {
        self.owner_uuid
    }

    /// A rule without an owner applies to every owner's VMs
    pub fn is_global(&self) -> bool {
        self.owner_uuid.is_none()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn log(&self) -> bool {
        self.log
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol.protocol()
    }

    pub fn protocol_clause(&self) -> &ProtocolClause {
        &self.protocol
    }

    /// Sorted ports, for tcp and udp rules
    pub fn ports(&self) -> Option<&[PortSpec]> {
        self.protocol.ports()
    }

    /// Sorted ICMP types, for icmp and icmp6 rules
    pub fn types(&self) -> Option<&[IcmpSpec]> {
        self.protocol.types()
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn from(&self) -> &TargetSet {
        &self.from
    }

    pub fn to(&self) -> &TargetSet {
        &self.to
    }

    /// IPs from both sides
    pub fn ips(&self) -> &[IpAddr] {
        &self.all.ips
    }

    /// Subnets from both sides
    pub fn subnets(&self) -> &[IpNetwork] {
        &self.all.subnets
    }

    /// Tags from both sides
    pub fn tags(&self) -> &[TagTarget] {
        &self.all.tags
    }

    /// VMs from both sides
    pub fn vms(&self) -> &[Uuid] {
        &self.all.vms
    }

    /// Wildcards from both sides
    pub fn wildcards(&self) -> &[Wildcard] {
        &self.all.wildcards
    }

    /// Whether either side is `all vms`
    pub fn all_vms(&self) -> bool {
        self.all.has_wildcard(Wildcard::VmAll)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Canonical rule text
    pub fn text(&self) -> String {
        let mut text = format!(
            "FROM {} TO {} {} {}",
            side_text(&self.from),
            side_text(&self.to),
            self.action.keyword(),
            self.protocol().as_str()
        );

        if let Some(clause) = protocol_text(&self.protocol) {
            text.push(' ');
            text.push_str(&clause);
        }

        if self.priority > 0 {
            let _ = write!(text, " PRIORITY {}", self.priority);
        }

        text
    }

    /// Persisted form of the rule.
    ///
    /// `fields` selects which fields to include, defaulting to [`FIELDS`].
    /// `global` appears only when true; unset optional fields are left out.
    pub fn serialize(&self, fields: Option<&[Field]>) -> Map<String, Value> {
        let mut map = Map::new();

        for field in fields.unwrap_or(&FIELDS) {
            let value = match field {
                Field::CreatedBy => self.created_by.clone().map(Value::String),
                Field::Description => self.description.clone().map(Value::String),
                Field::Enabled => Some(Value::Bool(self.enabled)),
                Field::Global => self.is_global().then_some(Value::Bool(true)),
                Field::Log => Some(Value::Bool(self.log)),
                Field::OwnerUuid => self.owner_uuid.map(|owner| Value::String(owner.to_string())),
                Field::Rule => Some(Value::String(self.text())),
                Field::Uuid => Some(Value::String(self.uuid.to_string())),
                Field::Version => Some(Value::String(self.version.clone())),
            };

            if let Some(value) = value {
                map.insert(field.as_ref().to_string(), value);
            }
        }

        map
    }

    /// Structured view with per-side target sets and protocol targets
    pub fn raw(&self) -> RawRule<'_> {
        RawRule {
            action: self.action,
            enabled: self.enabled,
            log: self.log,
            from: &self.from,
            to: &self.to,
            priority: self.priority,
            protocol: self.protocol(),
            uuid: self.uuid,
            version: &self.version,
            owner_uuid: self.owner_uuid,
            ports: self.ports(),
            types: self.types(),
            created_by: self.created_by(),
            description: self.description(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}", self.uuid, self.enabled)?;
        if let Some(owner) = self.owner_uuid {
            write!(f, ",{owner}")?;
        }
        write!(f, "] {}", self.text())
    }
}

/// Validates a payload and builds the canonical rule.
///
/// Shorthand for [`Rule::create`].
///
/// # Errors
///
/// See [`Rule::create`].
pub fn create(payload: &RulePayload, options: &RuleOptions) -> Result<Rule, ValidationErrors> {
    Rule::create(payload, options)
}

/// Version string for a newly created rule: `<unix ms>.<pid>`
pub fn generate_version() -> String {
    format!(
        "{}.{:06}",
        Utc::now().timestamp_millis(),
        std::process::id()
    )
}

/// Escapes a tag name or value for use inside double quotes
pub fn escape_tag(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '(' => escaped.push_str("\\("),
            ')' => escaped.push_str("\\)"),
            '\u{8}' => escaped.push_str("\\b"),
            '\u{c}' => escaped.push_str("\\f"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if needs_unicode_escape(c) => {
                let _ = write!(escaped, "\\u{:04X}", u32::from(c));
            }
            c => escaped.push(c),
        }
    }

    escaped
}

fn needs_unicode_escape(c: char) -> bool {
    c.is_control()
        || (c.is_whitespace() && c != ' ')
        || matches!(
            c,
            '\u{180E}' | '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}'
        )
}

fn fail(errors: Vec<Error>) -> ValidationErrors {
    debug!(count = errors.len(), "Rule validation failed");
    // Callers only reach here with at least one error pushed
    ValidationErrors::from_vec(errors)
        .unwrap_or_else(|| Error::invalid(Field::Rule, "invalid rule").into())
}

fn check_metadata(payload: &RulePayload, options: &RuleOptions, errors: &mut Vec<Error>) -> Metadata {
    let uuid = match payload.uuid.as_deref() {
        Some(text) => validators::validate_uuid(text).unwrap_or_else(|_| {
            errors.push(Error::invalid(Field::Uuid, "Invalid rule UUID"));
            Uuid::nil()
        }),
        None => Uuid::new_v4(),
    };

    let owner_uuid = payload.owner_uuid.as_deref().and_then(|text| {
        validators::validate_uuid(text)
            .map_err(|_| errors.push(Error::invalid(Field::OwnerUuid, "Invalid owner UUID")))
            .ok()
    });

    let enabled = check_bool(Field::Enabled, payload.enabled.as_ref(), errors).unwrap_or(false);
    let log = check_bool(Field::Log, payload.log.as_ref(), errors).unwrap_or(false);
    let created_by = check_string(Field::CreatedBy, payload.created_by.as_ref(), errors);
    let description = check_string(Field::Description, payload.description.as_ref(), errors);

    if options.enforce_global {
        check_global(payload, errors);
    }

    Metadata {
        uuid,
        owner_uuid,
        enabled,
        log,
        created_by,
        description,
    }
}

fn check_bool(field: Field, value: Option<&Value>, errors: &mut Vec<Error>) -> Option<bool> {
    validators::validate_bool(field.as_ref(), value?)
        .map_err(|message| errors.push(Error::invalid(field, message)))
        .ok()
}

fn check_string(field: Field, value: Option<&Value>, errors: &mut Vec<Error>) -> Option<String> {
    validators::validate_string(field.as_ref(), value?)
        .map_err(|message| errors.push(Error::invalid(field, message)))
        .ok()
}

/// Exactly one of `global: true` and `owner_uuid` must be given
fn check_global(payload: &RulePayload, errors: &mut Vec<Error>) {
    let has_owner = payload.owner_uuid.is_some();

    let global = match payload.global.as_ref() {
        Some(value) => match validators::validate_bool(Field::Global.as_ref(), value) {
            Ok(global) => global,
            Err(message) => {
                errors.push(Error::invalid(Field::Global, message));
                return;
            }
        },
        None => false,
    };

    if global && has_owner {
        errors.push(Error::invalid(
            Field::Global,
            "cannot specify both global and owner_uuid",
        ));
    } else if !global && !has_owner {
        errors.push(Error::invalid(Field::OwnerUuid, "owner_uuid required"));
    }
}

fn normalize_protocol(clause: ProtocolClause) -> ProtocolClause {
    match clause {
        ProtocolClause::Tcp(ports) => ProtocolClause::Tcp(sort_ports(ports)),
        ProtocolClause::Udp(ports) => ProtocolClause::Udp(sort_ports(ports)),
        ProtocolClause::Icmp(types) => ProtocolClause::Icmp(sort_types(types)),
        ProtocolClause::Icmp6(types) => ProtocolClause::Icmp6(sort_types(types)),
        clause @ (ProtocolClause::Ah | ProtocolClause::Esp) => clause,
    }
}

fn sort_ports(mut ports: Vec<PortSpec>) -> Vec<PortSpec> {
    ports.sort_by_key(PortSpec::sort_key);
    ports.dedup();
    ports
}

fn sort_types(mut types: Vec<IcmpSpec>) -> Vec<IcmpSpec> {
    types.sort_by_key(IcmpSpec::sort_key);
    types.dedup();
    types
}

fn check_protocol_limit(clause: &ProtocolClause, max_version: u32, errors: &mut Vec<Error>) {
    let noun = match clause.protocol() {
        protocol if protocol_supports_ports(protocol) => "ports",
        protocol if protocol_is_icmp(protocol) => "types",
        _ => return,
    };
    let limit = protocol_target_limit(max_version);
    if clause.target_count() > limit {
        errors.push(Error::invalid(
            Field::Rule,
            format!("maximum of {limit} {noun} allowed"),
        ));
    }
}

fn check_address_families(targets: &TargetSet, protocol: Protocol, errors: &mut Vec<Error>) {
    for ip in &targets.ips {
        if !ip_compatible_with_protocol(ip, protocol) {
            errors.push(Error::invalid(
                Field::Rule,
                format!(
                    "{} address \"{ip}\" cannot be used with protocol {protocol}",
                    family_name(ip)
                ),
            ));
        }
    }

    for subnet in &targets.subnets {
        if !subnet_compatible_with_protocol(subnet, protocol) {
            errors.push(Error::invalid(
                Field::Rule,
                format!(
                    "{} subnet \"{subnet}\" cannot be used with protocol {protocol}",
                    family_name(&subnet.ip())
                ),
            ));
        }
    }
}

fn family_name(ip: &IpAddr) -> &'static str {
    if ip.is_ipv4() { "IPv4" } else { "IPv6" }
}

fn side_text(targets: &TargetSet) -> String {
    let texts: Vec<String> = targets
        .wildcards
        .iter()
        .map(|wildcard| wildcard.keyword().to_string())
        .chain(targets.ips.iter().map(|ip| format!("ip {ip}")))
        .chain(targets.subnets.iter().map(|subnet| format!("subnet {subnet}")))
        .chain(targets.tags.iter().map(tag_text))
        .chain(targets.vms.iter().map(|vm| format!("vm {vm}")))
        .collect();

    if texts.len() > 1 {
        format!("({})", texts.join(" OR "))
    } else {
        texts.join(" OR ")
    }
}

fn tag_text(tag: &TagTarget) -> String {
    match tag {
        TagTarget::Name(name) => format!("tag \"{}\"", escape_tag(name)),
        TagTarget::Pair(name, value) => {
            format!("tag \"{}\" = \"{}\"", escape_tag(name), escape_tag(value))
        }
    }
}

fn protocol_text(clause: &ProtocolClause) -> Option<String> {
    match clause {
        ProtocolClause::Tcp(ports) | ProtocolClause::Udp(ports) => Some(ports_text(ports)),
        ProtocolClause::Icmp(types) | ProtocolClause::Icmp6(types) => Some(types_text(types)),
        ProtocolClause::Ah | ProtocolClause::Esp => None,
    }
}

fn ports_text(ports: &[PortSpec]) -> String {
    if ports.iter().any(|port| matches!(port, PortSpec::Range(_))) {
        let list: Vec<String> = ports.iter().map(ToString::to_string).collect();
        return format!("PORTS {}", list.join(", "));
    }

    let clauses: Vec<String> = ports.iter().map(|port| format!("PORT {port}")).collect();
    and_list(&clauses)
}

fn types_text(types: &[IcmpSpec]) -> String {
    let clauses: Vec<String> = types
        .iter()
        .map(|spec| match spec {
            IcmpSpec::All => "TYPE all".to_string(),
            IcmpSpec::Type {
                icmp_type,
                code: None,
            } => format!("TYPE {icmp_type}"),
            IcmpSpec::Type {
                icmp_type,
                code: Some(code),
            } => format!("TYPE {icmp_type} CODE {code}"),
        })
        .collect();
    and_list(&clauses)
}

fn and_list(clauses: &[String]) -> String {
    if clauses.len() > 1 {
        format!("({})", clauses.join(" AND "))
    } else {
        clauses.join(" AND ")
    }
}
