//! Tokenizer for rule text
//!
//! A `logos` DFA does the raw matching. [`Lexer`] wraps it to resolve bare
//! words into UUIDs, port numbers or free text, to decode quoted strings,
//! and to turn unmatched input into positioned errors.

use crate::core::error::{Error, Result};
use crate::core::firewall::Field;
use crate::validators;
use logos::Logos;
use tracing::trace;

/// Number of characters of unmatched input quoted in lexer errors
const ERROR_CONTEXT_CHARS: usize = 20;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"\s+")]
enum RawToken {
    #[token("from", ignore(case))]
    From,
    #[token("to", ignore(case))]
    To,
    #[token("allow", ignore(case))]
    Allow,
    #[token("block", ignore(case))]
    Block,
    #[token("and", ignore(case))]
    And,
    #[token("or", ignore(case))]
    Or,
    #[token("all", ignore(case))]
    All,
    #[token("any", ignore(case))]
    Any,
    #[token("vms", ignore(case))]
    Vms,
    #[token("ip", ignore(case))]
    Ip,
    #[token("subnet", ignore(case))]
    Subnet,
    #[token("tag", ignore(case))]
    Tag,
    #[token("vm", ignore(case))]
    #[token("machine", ignore(case))]
    Vm,
    #[token("tcp", ignore(case))]
    Tcp,
    #[token("udp", ignore(case))]
    Udp,
    #[token("icmp", ignore(case))]
    Icmp,
    #[token("icmp6", ignore(case))]
    Icmp6,
    #[token("ah", ignore(case))]
    Ah,
    #[token("esp", ignore(case))]
    Esp,
    #[token("port", ignore(case))]
    Port,
    #[token("ports", ignore(case))]
    Ports,
    #[token("type", ignore(case))]
    Type,
    #[token("code", ignore(case))]
    Code,
    #[token("priority", ignore(case))]
    Priority,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[regex(r"[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+")]
    Ipv4,
    #[regex(r"[0-9a-fA-F]*:[0-9a-fA-F:.]*")]
    Ipv6,
    #[regex(r"/[0-9]+")]
    CidrSuffix,
    #[regex(r#""([^"\\]|\\.)*""#)]
    Quoted,
    #[regex(r"[-a-zA-Z0-9_]+")]
    Word,
}

/// Token handed to the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    From,
    To,
    Allow,
    Block,
    And,
    Or,
    All,
    Any,
    Vms,
    Ip,
    Subnet,
    Tag,
    Vm,
    Tcp,
    Udp,
    Icmp,
    Icmp6,
    Ah,
    Esp,
    Port,
    Ports,
    Type,
    Code,
    Priority,
    LParen,
    RParen,
    Comma,
    Equals,
    /// A lone `-` between the ends of a port range
    Dash,
    Ipv4,
    Ipv6,
    /// `/NN` after a subnet address
    CidrSuffix,
    /// 1 to 5 digits, at most 65535
    PortNum(u16),
    /// Canonical lowercase UUID
    Uuid,
    /// Any other bare word
    Word,
    /// Decoded contents of a quoted string
    Quoted(String),
    Eof,
}

impl Token {
    /// Name used for this token in grammar errors
    pub const fn name(&self) -> &'static str {
        match self {
            Token::From => "FROM",
            Token::To => "TO",
            Token::Allow => "ALLOW",
            Token::Block => "BLOCK",
            Token::And => "AND",
            Token::Or => "OR",
            Token::All => "all",
            Token::Any => "any",
            Token::Vms => "vms",
            Token::Ip => "ip",
            Token::Subnet => "subnet",
            Token::Tag => "tag",
            Token::Vm => "vm",
            Token::Tcp => "tcp",
            Token::Udp => "udp",
            Token::Icmp => "icmp",
            Token::Icmp6 => "icmp6",
            Token::Ah => "ah",
            Token::Esp => "esp",
            Token::Port => "PORT",
            Token::Ports => "PORTS",
            Token::Type => "TYPE",
            Token::Code => "CODE",
            Token::Priority => "PRIORITY",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Equals => "=",
            Token::Dash => "-",
            Token::Ipv4 => "IPv4 address",
            Token::Ipv6 => "IPv6 address",
            Token::CidrSuffix => "prefix length",
            Token::PortNum(_) => "number",
            Token::Uuid => "UUID",
            Token::Word => "word",
            Token::Quoted(_) => "string",
            Token::Eof => "EOF",
        }
    }
}

/// A token with the text it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme<'a> {
    pub token: Token,
    /// Source text, quotes included for strings
    pub text: &'a str,
    /// Offset of the first character, counted in characters
    pub position: usize,
}

/// Streaming tokenizer over a rule's text
pub struct Lexer<'a> {
    inner: logos::Lexer<'a, RawToken>,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            inner: RawToken::lexer(source),
            source,
        }
    }

    /// Returns the next lexeme, or [`Token::Eof`] once input is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `Err` for unmatched input, unterminated or badly escaped
    /// strings, and numbers too large to be a port.
    pub fn next_lexeme(&mut self) -> Result<Lexeme<'a>> {
        let Some(raw) = self.inner.next() else {
            return Ok(Lexeme {
                token: Token::Eof,
                text: "",
                position: self.char_offset(self.source.len()),
            });
        };

        let span = self.inner.span();
        let text = self.inner.slice();
        let position = self.char_offset(span.start);

        let Ok(raw) = raw else {
            return Err(self.unmatched(span.start, position));
        };

        let token = match raw {
            RawToken::From => Token::From,
            RawToken::To => Token::To,
            RawToken::Allow => Token::Allow,
            RawToken::Block => Token::Block,
            RawToken::And => Token::And,
            RawToken::Or => Token::Or,
            RawToken::All => Token::All,
            RawToken::Any => Token::Any,
            RawToken::Vms => Token::Vms,
            RawToken::Ip => Token::Ip,
            RawToken::Subnet => Token::Subnet,
            RawToken::Tag => Token::Tag,
            RawToken::Vm => Token::Vm,
            RawToken::Tcp => Token::Tcp,
            RawToken::Udp => Token::Udp,
            RawToken::Icmp => Token::Icmp,
            RawToken::Icmp6 => Token::Icmp6,
            RawToken::Ah => Token::Ah,
            RawToken::Esp => Token::Esp,
            RawToken::Port => Token::Port,
            RawToken::Ports => Token::Ports,
            RawToken::Type => Token::Type,
            RawToken::Code => Token::Code,
            RawToken::Priority => Token::Priority,
            RawToken::LParen => Token::LParen,
            RawToken::RParen => Token::RParen,
            RawToken::Comma => Token::Comma,
            RawToken::Equals => Token::Equals,
            RawToken::Ipv4 => Token::Ipv4,
            RawToken::Ipv6 => Token::Ipv6,
            RawToken::CidrSuffix => Token::CidrSuffix,
            RawToken::Quoted => Token::Quoted(unescape(&text[1..text.len() - 1], position)?),
            RawToken::Word => classify_word(text)?,
        };

        trace!(token = token.name(), text, position, "lexeme");
        Ok(Lexeme {
            token,
            text,
            position,
        })
    }

    fn char_offset(&self, byte_offset: usize) -> usize {
        self.source[..byte_offset].chars().count()
    }

    fn unmatched(&self, byte_offset: usize, position: usize) -> Error {
        let rest = &self.source[byte_offset..];
        if rest.starts_with('"') {
            Error::UnterminatedString { position }
        } else {
            Error::UnexpectedText {
                position,
                upcoming: rest.chars().take(ERROR_CONTEXT_CHARS).collect(),
            }
        }
    }
}

/// Tokenizes a whole rule, stopping before [`Token::Eof`].
///
/// # Errors
///
/// Returns the first lexical error in `source`.
pub fn tokenize(source: &str) -> Result<Vec<Lexeme<'_>>> {
    let mut lexer = Lexer::new(source);
    let mut lexemes = Vec::new();
    loop {
        let lexeme = lexer.next_lexeme()?;
        if lexeme.token == Token::Eof {
            return Ok(lexemes);
        }
        lexemes.push(lexeme);
    }
}

/// Resolves a bare word into a UUID, a port number or free text
fn classify_word(text: &str) -> Result<Token> {
    if text == "-" {
        return Ok(Token::Dash);
    }

    if validators::is_uuid(text) {
        return Ok(Token::Uuid);
    }

    if text.len() <= 5 && text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse::<u16>().map(Token::PortNum).map_err(|_| {
            Error::invalid(Field::Rule, format!("Port number \"{text}\" is invalid"))
        });
    }

    Ok(Token::Word)
}

/// Decodes the body of a quoted string
fn unescape(body: &str, position: usize) -> Result<String> {
    let invalid = |sequence: String| Error::InvalidEscape { position, sequence };

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let Some(escaped) = chars.next() else {
            return Err(invalid("\\".to_string()));
        };

        match escaped {
            '"' | '\\' | '/' | '(' | ')' => out.push(escaped),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = if hex.len() == 4 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                } else {
                    None
                };
                out.push(decoded.ok_or_else(|| invalid(format!("\\u{hex}")))?);
            }
            other => return Err(invalid(format!("\\{other}"))),
        }
    }

    Ok(out)
}
