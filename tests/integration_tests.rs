//! Integration tests for fwrule
//!
//! These tests drive the public API end to end: rule text or payload in,
//! canonical rule, serialized payload and structured view out.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use fwrule::core::firewall::{FIELDS, Field, IcmpSpec, PortSpec, Protocol, TagTarget};
use fwrule::{
    CURRENT_VERSION, ParseOptions, Rule, RuleOptions, RulePayload, ValidationErrors, create, parse,
};
use serde_json::{Value, json};
use std::io::Write;
use uuid::Uuid;

const VM1: &str = "b0b92cd9-1fe7-4636-8477-81d2742566c2";
const VM2: &str = "0c3f4e5d-6a7b-4c8d-9e0f-1a2b3c4d5e6f";
const OWNER: &str = "930896af-bf8c-48d4-885c-6573a94b1853";

fn create_rule(text: &str) -> Result<Rule, ValidationErrors> {
    create(&RulePayload::new(text), &RuleOptions::default())
}

fn messages(errors: &ValidationErrors) -> Vec<String> {
    errors.iter().map(ToString::to_string).collect()
}

#[test]
fn test_round_trip_normalization() {
    let rules = [
        "FROM (ip 1.2.3.4 OR tag role = \"web\") TO all vms ALLOW tcp PORT 80 AND PORT 443 PRIORITY 10",
        "FROM any TO (tag a OR tag b = c OR vm b0b92cd9-1fe7-4636-8477-81d2742566c2) BLOCK udp PORTS 1-100, 53",
        "FROM subnet 10.0.0.0/8 TO tag \"db\" ALLOW icmp (TYPE 8 CODE 0 AND TYPE 0)",
        "FROM (ip fd00::1 OR subnet fd00::/64) TO all vms ALLOW icmp6 TYPE all",
        "FROM all vms TO any ALLOW ah PRIORITY 1",
    ];

    for text in rules {
        let rule = create_rule(text).unwrap();
        let again = create_rule(&rule.text()).unwrap();

        assert_eq!(again.from(), rule.from(), "{text}");
        assert_eq!(again.to(), rule.to(), "{text}");
        assert_eq!(again.protocol_clause(), rule.protocol_clause(), "{text}");
        assert_eq!(again.priority(), rule.priority(), "{text}");
        assert_eq!(again.text(), rule.text(), "{text}");
    }
}

#[test]
fn test_duplicate_target_deduplicated() {
    let rule = create_rule("FROM (ip 1.2.3.4 OR ip 1.2.3.4) TO all vms ALLOW tcp PORT 80").unwrap();
    assert_eq!(rule.from().ips, vec!["1.2.3.4".parse::<std::net::IpAddr>().unwrap()]);
}

#[test]
fn test_target_count_boundary() {
    let side = |count: usize| -> String {
        let tags: Vec<String> = (0..count).map(|i| format!("tag t{i}")).collect();
        format!("({})", tags.join(" OR "))
    };

    assert!(create_rule(&format!("FROM {} TO any ALLOW tcp PORT 80", side(24))).is_ok());

    let errors = create_rule(&format!("FROM {} TO any ALLOW tcp PORT 80", side(25))).unwrap_err();
    assert_eq!(messages(&errors), vec!["maximum of 24 targets allowed per side"]);
}

#[test]
fn test_protocol_family_consistency() {
    assert!(create_rule("FROM ip fd00::5 TO all vms ALLOW icmp TYPE 8").is_err());
    assert!(create_rule("FROM subnet fd00::/64 TO all vms ALLOW icmp TYPE 8").is_err());
    assert!(create_rule("FROM ip 10.0.0.5 TO all vms ALLOW icmp6 TYPE 128").is_err());
    assert!(create_rule("FROM subnet 10.0.0.0/24 TO all vms ALLOW icmp6 TYPE 128").is_err());

    assert!(create_rule("FROM ip 10.0.0.5 TO all vms ALLOW icmp TYPE 8").is_ok());
    assert!(create_rule("FROM ip fd00::5 TO all vms ALLOW icmp6 TYPE 128").is_ok());
}

#[test]
fn test_no_vm_effect_rejected() {
    let errors = create_rule("FROM ip 1.2.3.4 TO ip 5.6.7.8 ALLOW tcp PORT 80").unwrap_err();
    assert_eq!(errors.to_string(), "rule does not affect VMs");
}

#[test]
fn test_port_ordering() {
    let rule = create_rule("FROM any TO all vms ALLOW tcp PORT 443 AND PORT 80").unwrap();
    assert_eq!(
        rule.ports(),
        Some(&[PortSpec::Single(80), PortSpec::Single(443)][..])
    );
    assert_eq!(
        serde_json::to_value(rule.raw()).unwrap()["ports"],
        json!([80, 443])
    );
}

#[test]
fn test_uuid_default_and_validation() {
    let rule = create_rule("FROM any TO all vms ALLOW tcp PORT 80").unwrap();
    assert_eq!(rule.uuid().get_version_num(), 4);
    assert!(fwrule::validators::is_uuid(&rule.uuid().to_string()));

    let payload = RulePayload {
        uuid: Some("not-a-uuid".into()),
        ..RulePayload::new("FROM any TO all vms ALLOW tcp PORT 80")
    };
    let errors = create(&payload, &RuleOptions::default()).unwrap_err();
    assert_eq!(messages(&errors), vec!["Invalid rule UUID"]);
}

#[test]
fn test_invalid_uuid_is_not_a_parse_error() {
    let payload = RulePayload {
        uuid: Some("invalid".into()),
        ..RulePayload::new("FROM tag foo TO ip 8.8.8.8 ALLOW udp port 53")
    };
    let errors = create(&payload, &RuleOptions::default()).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.first().field(), Some(Field::Uuid));
    assert_eq!(errors.to_string(), "Invalid rule UUID");
}

#[test]
fn test_ipv4_prefix_limit() {
    let errors = create_rule("FROM tag foo TO subnet 10.8.0.0/33 ALLOW udp port 53").unwrap_err();
    assert_eq!(errors.first().field(), Some(Field::Rule));
    assert!(errors.to_string().contains("bad prefix length"));
}

#[test]
fn test_every_target_type() {
    let rule = create_rule(&format!(
        "FROM (ip 192.168.1.1 OR machine {VM1} OR tag t1 OR subnet 192.168.2.0/24) \
         TO (ip 10.2.0.3 OR machine {VM2} OR tag t2 OR subnet 10.2.1.0/24) ALLOW tcp port 80"
    ))
    .unwrap();

    for side in [rule.from(), rule.to()] {
        assert_eq!(side.ips.len(), 1);
        assert_eq!(side.subnets.len(), 1);
        assert_eq!(side.tags.len(), 1);
        assert_eq!(side.vms.len(), 1);
        assert!(side.wildcards.is_empty());
    }
    assert_eq!(rule.to().vms, vec![Uuid::parse_str(VM2).unwrap()]);
    assert_eq!(rule.from().tags, vec![TagTarget::Name("t1".into())]);
    assert_eq!(rule.ports(), Some(&[PortSpec::Single(80)][..]));
    assert_eq!(rule.protocol(), Protocol::Tcp);
}

#[test]
fn test_payload_json_end_to_end() {
    let payload: RulePayload = serde_json::from_value(json!({
        "rule": "FROM any TO tag \"web\" ALLOW tcp (PORT 8080 AND PORT 80)",
        "uuid": VM1,
        "owner_uuid": OWNER,
        "enabled": "true",
        "log": false,
        "version": "1383205115597.067782",
        "created_by": "fwadm",
        "description": "web servers",
    }))
    .unwrap();
    let options = RuleOptions {
        enforce_global: true,
        ..RuleOptions::default()
    };

    let rule = create(&payload, &options).unwrap();
    assert_eq!(
        Value::Object(rule.serialize(Some(&FIELDS))),
        json!({
            "created_by": "fwadm",
            "description": "web servers",
            "enabled": true,
            "log": false,
            "owner_uuid": OWNER,
            "rule": "FROM any TO tag \"web\" ALLOW tcp (PORT 80 AND PORT 8080)",
            "uuid": VM1,
            "version": "1383205115597.067782",
        })
    );
    assert_eq!(
        rule.to_string(),
        format!(
            "[{VM1},true,{OWNER}] FROM any TO tag \"web\" ALLOW tcp (PORT 80 AND PORT 8080)"
        )
    );
}

#[test]
fn test_all_field_errors_reported_together() {
    let payload: RulePayload = serde_json::from_value(json!({
        "uuid": "x",
        "owner_uuid": "y",
        "enabled": "on",
        "created_by": "a".repeat(300),
        "global": true,
    }))
    .unwrap();
    let options = RuleOptions {
        enforce_global: true,
        ..RuleOptions::default()
    };

    let errors = create(&payload, &options).unwrap_err();
    assert_eq!(
        messages(&errors),
        vec![
            "No rule specified",
            "Invalid rule UUID",
            "Invalid owner UUID",
            "enabled must be true or false",
            "created_by must be shorter than 255 characters",
            "cannot specify both global and owner_uuid",
        ]
    );
    assert_eq!(errors.to_string(), "first of 6 errors: No rule specified");
}

#[test]
fn test_parse_tree_shape() {
    let parsed = parse(
        "FROM (ip 10.0.0.1 OR tag a = b) TO all vms ALLOW icmp TYPE 3 CODE 4 PRIORITY 2",
        &ParseOptions::default(),
    )
    .unwrap();

    assert_eq!(
        serde_json::to_value(&parsed).unwrap(),
        json!({
            "from": [["ip", "10.0.0.1"], ["tag", ["a", "b"]]],
            "to": [["wildcard", "vmall"]],
            "action": "allow",
            "protocol": {"name": "icmp", "targets": ["3:4"]},
            "priority": 2,
        })
    );
    assert_eq!(parsed.protocol.types(), Some(&[IcmpSpec::with_code(3, 4)][..]));
}

#[test]
fn test_parse_errors() {
    let err = parse("FROM any TO all vms ALLOW tcp", &ParseOptions::default()).unwrap_err();
    assert!(err.to_string().starts_with("Error at character 29: ''"));
    assert_eq!(err.field(), Some(Field::Rule));

    let legacy = ParseOptions {
        max_version: 1,
        ..ParseOptions::default()
    };
    let err = parse("FROM any TO all vms ALLOW tcp PORTS 1-10", &legacy).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The rule uses a feature (port ranges) newer than this API allows"
    );
    assert_eq!(CURRENT_VERSION, 4);
}

#[test]
fn test_options_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"max_version": 3}}"#).unwrap();
    let options = fwrule::load_options(file.path()).unwrap();

    let errors = create(&RulePayload::new("FROM any TO all vms ALLOW esp"), &options).unwrap_err();
    assert_eq!(
        messages(&errors),
        vec!["The rule uses a feature (IPsec) newer than this API allows"]
    );
    assert!(create(&RulePayload::new("FROM any TO all vms ALLOW icmp6 TYPE all"), &options).is_ok());
}
