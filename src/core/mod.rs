//! Rule language core
//!
//! This module turns rule text into validated, canonical rules. It provides:
//!
//! - [`lexer`]: Tokenizer for rule text
//! - [`parser`]: Grammar, version gates and the parse tree
//! - [`firewall`]: Vocabulary and value types shared by parser and model
//! - [`rule`]: The normalized rule model and its text/JSON renderings
//! - [`rule_constraints`]: Limits and protocol/address-family rules
//! - [`error`]: Error types for parsing and validation

pub mod error;
pub mod firewall;
pub mod lexer;
pub mod parser;
pub mod rule;
pub mod rule_constraints;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;
