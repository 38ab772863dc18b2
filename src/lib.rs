//! fwrule - SmartOS firewall rule language
//!
//! Parses, validates and normalizes rules such as
//! `FROM (ip 10.0.0.1 OR tag role = "web") TO all vms ALLOW tcp PORT 80`.
//!
//! # Architecture
//!
//! - [`core`] - Lexer, parser, rule model and vocabulary types
//! - [`validators`] - Value checks shared by the parser and rule model
//! - [`config`] - Engine options and their JSON file form
//!
//! # Example
//!
//! ```
//! use fwrule::{RuleOptions, RulePayload, create};
//!
//! let rule = create(
//!     &RulePayload::new("FROM tag web TO any ALLOW udp PORT 53"),
//!     &RuleOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(rule.text(), r#"FROM tag "web" TO any ALLOW udp PORT 53"#);
//! ```

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod core;
pub mod validators;

// Re-export commonly used types
pub use config::{RuleOptions, load_options};
pub use core::error::{Error, Result, ValidationErrors};
pub use core::firewall::{Action, FIELDS, Field, Protocol};
pub use core::parser::{CURRENT_VERSION, ParseOptions, ParsedRule, parse};
pub use core::rule::{Rule, RulePayload, create};
