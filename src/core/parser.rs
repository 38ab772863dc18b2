//! Recursive descent parser for rule text
//!
//! ```text
//! rule        := FROM targets TO targets action protocol [PRIORITY n] EOF
//! targets     := any | all vms | "(" (any | all vms) ")" | "(" target (OR target)* ")" | target
//! target      := ip ADDR | subnet ADDR/NN | tag NAME [= VALUE] | vm UUID
//! action      := ALLOW | BLOCK
//! protocol    := (tcp | udp) ports | (icmp | icmp6) types | ah | esp
//! ports       := PORT all | PORT n (AND PORT n)* | "(" PORT ... ")" | PORTS n [- n] (, n [- n])*
//! types       := TYPE all | TYPE t [CODE c] (AND TYPE t [CODE c])* | "(" TYPE ... ")"
//! ```
//!
//! Parsing aborts on the first lexical, grammar or value error. Targets are
//! returned in source order; deduplication and sorting happen in the rule
//! model.

use crate::core::error::{Error, Result};
use crate::core::firewall::{
    Action, Field, IcmpSpec, PortSpec, ProtocolClause, TagTarget, Target, Wildcard,
};
use crate::core::lexer::{Lexeme, Lexer, Token};
use crate::validators;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::debug;

/// Newest version of the rule language.
///
/// - 1: initial language
/// - 2: `PORTS` lists and port ranges
/// - 3: IPv6 targets, `icmp6`, `TYPE all`
/// - 4: `ah`/`esp`, `PRIORITY`, 24 protocol targets instead of 8
pub const CURRENT_VERSION: u32 = 4;

/// Options that change what the parser accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Newest language version the caller understands
    pub max_version: u32,
    /// Reject subnets with bits set to the right of the prefix
    pub enforce_subnet_mask: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_version: CURRENT_VERSION,
            enforce_subnet_mask: false,
        }
    }
}

/// Structural form of a rule, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRule {
    pub from: Vec<Target>,
    pub to: Vec<Target>,
    pub action: Action,
    pub protocol: ProtocolClause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

/// Parses rule text.
///
/// # Examples
///
/// ```
/// use fwrule::core::firewall::{Action, PortSpec, ProtocolClause};
/// use fwrule::core::parser::{parse, ParseOptions};
///
/// let parsed = parse("FROM any TO all vms ALLOW tcp PORT 80", &ParseOptions::default()).unwrap();
/// assert_eq!(parsed.action, Action::Allow);
/// assert_eq!(parsed.protocol, ProtocolClause::Tcp(vec![PortSpec::Single(80)]));
/// ```
///
/// # Errors
///
/// Returns the first lexical, grammar or value error found.
pub fn parse(text: &str, options: &ParseOptions) -> Result<ParsedRule> {
    let mut parser = Parser::new(text, *options)?;
    if parser.current.token == Token::Eof {
        return Err(Error::EmptyRule);
    }

    let parsed = parser.rule()?;
    debug!(
        from = parsed.from.len(),
        to = parsed.to.len(),
        protocol = %parsed.protocol.protocol(),
        "parsed rule"
    );
    Ok(parsed)
}

const TARGET_LIST_START: &[&str] = &["(", "all", "any", "ip", "subnet", "tag", "vm"];
const TARGET_START: &[&str] = &["ip", "subnet", "tag", "vm"];
const PAREN_TARGET_START: &[&str] = &["all", "any", "ip", "subnet", "tag", "vm"];
const PROTOCOLS: &[&str] = &["tcp", "udp", "icmp", "icmp6", "ah", "esp"];
const RULE_END: &[&str] = &["PRIORITY", "EOF"];
const AND_OR_RULE_END: &[&str] = &["AND", "PRIORITY", "EOF"];
const COMMA_OR_RULE_END: &[&str] = &[",", "PRIORITY", "EOF"];

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Lexeme<'a>,
    options: ParseOptions,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, options: ParseOptions) -> Result<Self> {
        let mut lexer = Lexer::new(text);
        let current = lexer.next_lexeme()?;
        Ok(Self {
            lexer,
            current,
            options,
        })
    }

    /// Consumes the current lexeme and returns it
    fn bump(&mut self) -> Result<Lexeme<'a>> {
        let next = self.lexer.next_lexeme()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn at(&self, token: &Token) -> bool {
        self.current.token == *token
    }

    fn unexpected(&self, expected: &[&'static str]) -> Error {
        Error::UnexpectedToken {
            position: self.current.position,
            text: self.current.text.to_string(),
            expected: expected.to_vec(),
            found: self.current.token.name(),
        }
    }

    fn expect(&mut self, token: &Token) -> Result<Lexeme<'a>> {
        if self.at(token) {
            self.bump()
        } else {
            Err(self.unexpected(&[token.name()]))
        }
    }

    fn require_version(&self, version: u32, feature: &str) -> Result<()> {
        require_version(&self.options, version, feature)
    }

    fn rule(&mut self) -> Result<ParsedRule> {
        self.expect(&Token::From)?;
        let from = self.target_list()?;
        self.expect(&Token::To)?;
        let to = self.target_list()?;

        let action = match self.current.token {
            Token::Allow => Action::Allow,
            Token::Block => Action::Block,
            _ => return Err(self.unexpected(&["ALLOW", "BLOCK"])),
        };
        self.bump()?;

        let (protocol, followers) = self.protocol_clause()?;

        let priority = if self.at(&Token::Priority) {
            self.require_version(4, "priority")?;
            self.bump()?;
            if !matches!(self.current.token, Token::PortNum(_)) {
                return Err(self.unexpected(&["number"]));
            }
            let lexeme = self.bump()?;
            Some(validators::validate_priority(lexeme.text).map_err(invalid)?)
        } else {
            None
        };

        if !self.at(&Token::Eof) {
            let expected: &[&'static str] = if priority.is_some() {
                &["EOF"]
            } else {
                followers
            };
            return Err(self.unexpected(expected));
        }

        Ok(ParsedRule {
            from,
            to,
            action,
            protocol,
            priority,
        })
    }

    fn target_list(&mut self) -> Result<Vec<Target>> {
        match self.current.token {
            Token::Any | Token::All => Ok(vec![self.wildcard()?]),
            Token::LParen => {
                self.bump()?;
                let targets = match self.current.token {
                    Token::Any | Token::All => vec![self.wildcard()?],
                    Token::Ip | Token::Subnet | Token::Tag | Token::Vm => self.target_or_list()?,
                    _ => return Err(self.unexpected(PAREN_TARGET_START)),
                };
                self.expect(&Token::RParen)?;
                Ok(targets)
            }
            Token::Ip | Token::Subnet | Token::Tag | Token::Vm => Ok(vec![self.target()?]),
            _ => Err(self.unexpected(TARGET_LIST_START)),
        }
    }

    fn wildcard(&mut self) -> Result<Target> {
        if self.at(&Token::Any) {
            self.bump()?;
            return Ok(Target::Wildcard(Wildcard::Any));
        }

        self.expect(&Token::All)?;
        self.expect(&Token::Vms)?;
        Ok(Target::Wildcard(Wildcard::VmAll))
    }

    /// `target (OR target)*`, stopping before the closing paren
    fn target_or_list(&mut self) -> Result<Vec<Target>> {
        let mut targets = vec![self.target()?];
        loop {
            match self.current.token {
                Token::Or => {
                    self.bump()?;
                    targets.push(self.target()?);
                }
                Token::RParen => return Ok(targets),
                _ => return Err(self.unexpected(&[")", "OR"])),
            }
        }
    }

    fn target(&mut self) -> Result<Target> {
        match self.current.token {
            Token::Ip => {
                self.bump()?;
                self.ip_target()
            }
            Token::Subnet => {
                self.bump()?;
                self.subnet_target()
            }
            Token::Tag => {
                self.bump()?;
                self.tag_target()
            }
            Token::Vm => {
                self.bump()?;
                self.vm_target()
            }
            _ => Err(self.unexpected(TARGET_START)),
        }
    }

    fn ip_target(&mut self) -> Result<Target> {
        match self.current.token {
            Token::Ipv4 => {
                let lexeme = self.bump()?;
                validators::validate_ipv4_address(lexeme.text)
                    .map(|ip| Target::Ip(IpAddr::V4(ip)))
                    .map_err(invalid)
            }
            Token::Ipv6 => {
                self.require_version(3, "IPv6")?;
                let lexeme = self.bump()?;
                validators::validate_ipv6_address(lexeme.text)
                    .map(|ip| Target::Ip(IpAddr::V6(ip)))
                    .map_err(invalid)
            }
            _ => Err(self.unexpected(&["IPv4 address", "IPv6 address"])),
        }
    }

    fn subnet_target(&mut self) -> Result<Target> {
        let address = match self.current.token {
            Token::Ipv4 => self.bump()?,
            Token::Ipv6 => {
                self.require_version(3, "IPv6")?;
                self.bump()?
            }
            _ => return Err(self.unexpected(&["IPv4 address", "IPv6 address"])),
        };

        if !self.at(&Token::CidrSuffix) {
            return Err(self.unexpected(&["prefix length"]));
        }
        let suffix = self.bump()?;

        let subnet = format!("{}{}", address.text, suffix.text);
        validators::validate_subnet(&subnet, self.options.enforce_subnet_mask)
            .map(Target::Subnet)
            .map_err(invalid)
    }

    fn tag_target(&mut self) -> Result<Target> {
        let name = self.tag_text()?;
        if !self.at(&Token::Equals) {
            return Ok(Target::Tag(TagTarget::Name(name)));
        }

        self.bump()?;
        let value = self.tag_text()?;
        Ok(Target::Tag(TagTarget::Pair(name, value)))
    }

    fn tag_text(&mut self) -> Result<String> {
        match &self.current.token {
            Token::Quoted(text) => {
                let text = text.clone();
                self.bump()?;
                Ok(text)
            }
            Token::Word | Token::PortNum(_) | Token::Uuid => Ok(self.bump()?.text.to_string()),
            _ => Err(self.unexpected(&["string", "word"])),
        }
    }

    fn vm_target(&mut self) -> Result<Target> {
        match self.current.token {
            Token::Uuid | Token::Word | Token::PortNum(_) => {
                let lexeme = self.bump()?;
                validators::validate_uuid(lexeme.text)
                    .map(Target::Vm)
                    .map_err(invalid)
            }
            _ => Err(self.unexpected(&["UUID"])),
        }
    }

    fn protocol_clause(&mut self) -> Result<(ProtocolClause, &'static [&'static str])> {
        match self.current.token {
            Token::Tcp => {
                self.bump()?;
                let (ports, followers) = self.port_list()?;
                Ok((ProtocolClause::Tcp(ports), followers))
            }
            Token::Udp => {
                self.bump()?;
                let (ports, followers) = self.port_list()?;
                Ok((ProtocolClause::Udp(ports), followers))
            }
            Token::Icmp => {
                self.bump()?;
                let (types, followers) = self.type_list()?;
                Ok((ProtocolClause::Icmp(types), followers))
            }
            Token::Icmp6 => {
                self.require_version(3, "icmp6")?;
                self.bump()?;
                let (types, followers) = self.type_list()?;
                Ok((ProtocolClause::Icmp6(types), followers))
            }
            Token::Ah => {
                self.require_version(4, "IPsec")?;
                self.bump()?;
                Ok((ProtocolClause::Ah, RULE_END))
            }
            Token::Esp => {
                self.require_version(4, "IPsec")?;
                self.bump()?;
                Ok((ProtocolClause::Esp, RULE_END))
            }
            _ => Err(self.unexpected(PROTOCOLS)),
        }
    }

    fn port_list(&mut self) -> Result<(Vec<PortSpec>, &'static [&'static str])> {
        match self.current.token {
            Token::Port => {
                self.bump()?;
                if self.at(&Token::All) {
                    self.bump()?;
                    return Ok((vec![PortSpec::All], RULE_END));
                }

                let mut ports = vec![self.port(&["all", "number"])?];
                while self.at(&Token::And) {
                    self.bump()?;
                    self.expect(&Token::Port)?;
                    ports.push(self.port(&["number"])?);
                }
                Ok((ports, AND_OR_RULE_END))
            }
            Token::LParen => {
                self.bump()?;
                self.expect(&Token::Port)?;
                if self.at(&Token::All) {
                    self.bump()?;
                    self.expect(&Token::RParen)?;
                    return Ok((vec![PortSpec::All], RULE_END));
                }

                let mut ports = vec![self.port(&["all", "number"])?];
                loop {
                    match self.current.token {
                        Token::And => {
                            self.bump()?;
                            self.expect(&Token::Port)?;
                            ports.push(self.port(&["number"])?);
                        }
                        Token::RParen => {
                            self.bump()?;
                            return Ok((ports, RULE_END));
                        }
                        _ => return Err(self.unexpected(&[")", "AND"])),
                    }
                }
            }
            Token::Ports => {
                self.require_version(2, "port ranges")?;
                self.bump()?;
                let mut ports = vec![self.port_item()?];
                while self.at(&Token::Comma) {
                    self.bump()?;
                    ports.push(self.port_item()?);
                }
                Ok((ports, COMMA_OR_RULE_END))
            }
            _ => Err(self.unexpected(&["(", "PORT", "PORTS"])),
        }
    }

    fn port(&mut self, expected: &[&'static str]) -> Result<PortSpec> {
        if !matches!(self.current.token, Token::PortNum(_)) {
            return Err(self.unexpected(expected));
        }

        let lexeme = self.bump()?;
        validators::validate_port_number(lexeme.text)
            .map(PortSpec::Single)
            .map_err(invalid)
    }

    /// An entry of a `PORTS` list: `n`, `a - b` or `a-b`
    fn port_item(&mut self) -> Result<PortSpec> {
        match self.current.token {
            Token::PortNum(_) => {
                let start = self.bump()?;
                let start = validators::validate_port_number(start.text).map_err(invalid)?;
                if !self.at(&Token::Dash) {
                    return Ok(PortSpec::Single(start));
                }

                self.bump()?;
                if !matches!(self.current.token, Token::PortNum(_)) {
                    return Err(self.unexpected(&["number"]));
                }
                let end = self.bump()?;
                let end = validators::validate_port_number(end.text).map_err(invalid)?;
                port_range(start, end)
            }
            Token::Word if self.current.text.contains('-') => {
                let lexeme = self.bump()?;
                let (start, end) = lexeme.text.split_once('-').unwrap_or((lexeme.text, ""));
                let start = validators::validate_port_number(start).map_err(invalid)?;
                let end = validators::validate_port_number(end).map_err(invalid)?;
                port_range(start, end)
            }
            _ => Err(self.unexpected(&["number"])),
        }
    }

    fn type_list(&mut self) -> Result<(Vec<IcmpSpec>, &'static [&'static str])> {
        match self.current.token {
            Token::Type => {
                self.bump()?;
                if self.at(&Token::All) {
                    self.require_version(3, "TYPE all")?;
                    self.bump()?;
                    return Ok((vec![IcmpSpec::All], RULE_END));
                }

                let mut types = vec![self.icmp_type(&["all", "number"])?];
                while self.at(&Token::And) {
                    self.bump()?;
                    self.expect(&Token::Type)?;
                    types.push(self.icmp_type(&["number"])?);
                }
                Ok((types, AND_OR_RULE_END))
            }
            Token::LParen => {
                self.bump()?;
                self.expect(&Token::Type)?;
                if self.at(&Token::All) {
                    self.require_version(3, "TYPE all")?;
                    self.bump()?;
                    self.expect(&Token::RParen)?;
                    return Ok((vec![IcmpSpec::All], RULE_END));
                }

                let mut types = vec![self.icmp_type(&["all", "number"])?];
                loop {
                    match self.current.token {
                        Token::And => {
                            self.bump()?;
                            self.expect(&Token::Type)?;
                            types.push(self.icmp_type(&["number"])?);
                        }
                        Token::RParen => {
                            self.bump()?;
                            return Ok((types, RULE_END));
                        }
                        _ => return Err(self.unexpected(&[")", "AND", "CODE"])),
                    }
                }
            }
            _ => Err(self.unexpected(&["(", "TYPE"])),
        }
    }

    /// `t [CODE c]`
    fn icmp_type(&mut self, expected: &[&'static str]) -> Result<IcmpSpec> {
        if !matches!(self.current.token, Token::PortNum(_)) {
            return Err(self.unexpected(expected));
        }
        let lexeme = self.bump()?;
        let icmp_type = validators::validate_icmp_type(lexeme.text).map_err(invalid)?;

        if !self.at(&Token::Code) {
            return Ok(IcmpSpec::new(icmp_type));
        }

        self.bump()?;
        if !matches!(self.current.token, Token::PortNum(_)) {
            return Err(self.unexpected(&["number"]));
        }
        let lexeme = self.bump()?;
        let code = validators::validate_icmp_code(lexeme.text).map_err(invalid)?;
        Ok(IcmpSpec::with_code(icmp_type, code))
    }
}

impl ParsedRule {
    /// Checks a tree that did not come from [`parse`] against the same
    /// options the parser enforces: language version, subnet masks and the
    /// priority range.
    ///
    /// # Examples
    ///
    /// ```
    /// use fwrule::core::parser::{parse, ParseOptions};
    ///
    /// let parsed = parse("FROM ip fd00::1 TO all vms ALLOW tcp PORT 80", &ParseOptions::default()).unwrap();
    /// let legacy = ParseOptions { max_version: 2, ..ParseOptions::default() };
    /// assert!(parsed.check(&ParseOptions::default()).is_ok());
    /// assert!(parsed.check(&legacy).is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the first problem found, with the message `parse` would give.
    pub fn check(&self, options: &ParseOptions) -> Result<()> {
        for target in self.from.iter().chain(&self.to) {
            match target {
                Target::Ip(ip) if ip.is_ipv6() => require_version(options, 3, "IPv6")?,
                Target::Subnet(subnet) => {
                    if subnet.is_ipv6() {
                        require_version(options, 3, "IPv6")?;
                    }
                    validators::validate_subnet(&subnet.to_string(), options.enforce_subnet_mask)
                        .map_err(invalid)?;
                }
                _ => {}
            }
        }

        match &self.protocol {
            ProtocolClause::Tcp(ports) | ProtocolClause::Udp(ports) => {
                if ports.iter().any(|port| matches!(port, PortSpec::Range(_))) {
                    require_version(options, 2, "port ranges")?;
                }
            }
            ProtocolClause::Icmp(types) | ProtocolClause::Icmp6(types) => {
                if matches!(self.protocol, ProtocolClause::Icmp6(_)) {
                    require_version(options, 3, "icmp6")?;
                }
                if types.contains(&IcmpSpec::All) {
                    require_version(options, 3, "TYPE all")?;
                }
            }
            ProtocolClause::Ah | ProtocolClause::Esp => require_version(options, 4, "IPsec")?,
        }

        if let Some(priority) = self.priority {
            require_version(options, 4, "priority")?;
            validators::validate_priority(&priority.to_string()).map_err(invalid)?;
        }

        Ok(())
    }
}

fn require_version(options: &ParseOptions, version: u32, feature: &str) -> Result<()> {
    if options.max_version < version {
        return Err(invalid(format!(
            "The rule uses a feature ({feature}) newer than this API allows"
        )));
    }
    Ok(())
}

fn port_range(start: u16, end: u16) -> Result<PortSpec> {
    validators::validate_port_range(start, end)
        .map(|(start, end)| PortSpec::range(start, end))
        .map_err(invalid)
}

fn invalid(message: String) -> Error {
    Error::invalid(Field::Rule, message)
}
