//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::config::RuleOptions;
use crate::core::error::ValidationErrors;
use crate::core::rule::{Rule, RulePayload};
use serde_json::json;

pub const TEST_VM: &str = "b0b92cd9-1fe7-4636-8477-81d2742566c2";
pub const TEST_VM2: &str = "8d7a2e4c-0b1f-4f6e-9c3a-5d2e1f0a9b8c";
pub const TEST_OWNER: &str = "930896af-bf8c-48d4-885c-6573a94b1853";

/// Builds a rule from text with default options, panicking on failure.
///
/// This is the canonical helper for rules that are expected to be valid.
pub fn create_test_rule(text: &str) -> Rule {
    match Rule::create(&RulePayload::new(text), &RuleOptions::default()) {
        Ok(rule) => rule,
        Err(errors) => panic!("rule {text:?} failed: {:?}", error_messages(&errors)),
    }
}

/// Builds an enabled rule owned by [`TEST_OWNER`].
pub fn create_owned_test_rule(text: &str) -> Rule {
    let payload = RulePayload {
        owner_uuid: Some(TEST_OWNER.to_string()),
        enabled: Some(json!(true)),
        ..RulePayload::new(text)
    };
    Rule::create(&payload, &RuleOptions::default()).unwrap()
}

/// Options for a caller that understands language versions up to `max_version`
pub fn options_for_version(max_version: u32) -> RuleOptions {
    RuleOptions {
        max_version,
        ..RuleOptions::default()
    }
}

/// Messages of every error, in the order they were found
pub fn error_messages(errors: &ValidationErrors) -> Vec<String> {
    errors.iter().map(ToString::to_string).collect()
}

/// Builds a rule from text and returns its error messages, panicking if it
/// is valid.
pub fn create_error_messages(text: &str, options: &RuleOptions) -> Vec<String> {
    match Rule::create(&RulePayload::new(text), options) {
        Ok(rule) => panic!("rule {text:?} unexpectedly valid: {}", rule.text()),
        Err(errors) => error_messages(&errors),
    }
}
