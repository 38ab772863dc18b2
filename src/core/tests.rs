#[cfg(test)]
mod tests_impl {
    use crate::config::RuleOptions;
    use crate::core::firewall::{Action, Field, PortSpec, Protocol, TagTarget};
    use crate::core::parser::{ParseOptions, parse};
    use crate::core::rule::{Rule, RulePayload};
    use crate::core::test_helpers::{
        TEST_OWNER, TEST_VM, TEST_VM2, create_error_messages, create_owned_test_rule,
        create_test_rule, options_for_version,
    };
    use serde_json::{Value, json};

    #[test]
    fn test_every_target_type_on_both_sides() {
        let rule = create_test_rule(&format!(
            "FROM (ip 192.168.1.1 OR machine {TEST_VM} OR tag t1 OR subnet 192.168.2.0/24) \
             TO (ip 10.2.0.3 OR machine {TEST_VM2} OR tag t2 OR subnet 10.2.1.0/24) \
             ALLOW tcp port 80"
        ));

        let raw = serde_json::to_value(rule.raw()).unwrap();
        assert_eq!(
            raw["from"],
            json!({
                "ips": ["192.168.1.1"],
                "subnets": ["192.168.2.0/24"],
                "tags": ["t1"],
                "vms": [TEST_VM],
                "wildcards": [],
            })
        );
        assert_eq!(
            raw["to"],
            json!({
                "ips": ["10.2.0.3"],
                "subnets": ["10.2.1.0/24"],
                "tags": ["t2"],
                "vms": [TEST_VM2],
                "wildcards": [],
            })
        );
        assert_eq!(raw["ports"], json!([80]));

        assert_eq!(rule.ips().len(), 2);
        assert_eq!(rule.vms().len(), 2);
        assert_eq!(
            rule.tags(),
            &[TagTarget::Name("t1".into()), TagTarget::Name("t2".into())]
        );
        assert!(!rule.all_vms());
    }

    #[test]
    fn test_duplicate_targets_collapse() {
        let rule = create_test_rule("FROM (ip 1.2.3.4 OR ip 1.2.3.4) TO all vms ALLOW tcp PORT 80");
        assert_eq!(rule.from().ips.len(), 1);
        assert_eq!(rule.text(), "FROM ip 1.2.3.4 TO all vms ALLOW tcp PORT 80");
    }

    #[test]
    fn test_rule_wide_sets_merge_sides() {
        let rule = create_test_rule(&format!(
            "FROM (tag web OR vm {TEST_VM}) TO (tag web OR tag db = primary) BLOCK udp PORT 53"
        ));
        assert_eq!(
            rule.tags(),
            &[
                TagTarget::Pair("db".into(), "primary".into()),
                TagTarget::Name("web".into()),
            ]
        );
        assert_eq!(rule.vms().len(), 1);
        assert_eq!(rule.action(), Action::Block);
        assert_eq!(rule.protocol(), Protocol::Udp);
    }

    #[test]
    fn test_side_target_limit() {
        let ips = |count: u8| -> String {
            let targets: Vec<String> = (1..=count).map(|i| format!("ip 10.0.0.{i}")).collect();
            format!("({})", targets.join(" OR "))
        };

        let ok = create_test_rule(&format!("FROM {} TO all vms ALLOW tcp PORT 80", ips(24)));
        assert_eq!(ok.from().len(), 24);

        assert_eq!(
            create_error_messages(
                &format!("FROM all vms TO {} ALLOW tcp PORT 80", ips(25)),
                &RuleOptions::default()
            ),
            vec!["maximum of 24 targets allowed per side"]
        );
    }

    #[test]
    fn test_repeated_targets_count_once() {
        let targets: Vec<&str> = std::iter::repeat_n("ip 10.0.0.1", 30).collect();
        let rule = create_test_rule(&format!(
            "FROM ({}) TO all vms ALLOW tcp PORT 80",
            targets.join(" OR ")
        ));
        assert_eq!(rule.from().len(), 1);
    }

    #[test]
    fn test_does_not_affect_vms() {
        assert_eq!(
            create_error_messages(
                "FROM ip 1.2.3.4 TO ip 5.6.7.8 ALLOW tcp PORT 80",
                &RuleOptions::default()
            ),
            vec!["rule does not affect VMs"]
        );
        assert_eq!(
            create_error_messages(
                "FROM any TO subnet 10.0.0.0/8 ALLOW tcp PORT 80",
                &RuleOptions::default()
            ),
            vec!["rule does not affect VMs"]
        );
    }

    #[test]
    fn test_invalid_uuid_reported_before_rule_checks() {
        let payload = RulePayload {
            uuid: Some("invalid".into()),
            ..RulePayload::new("FROM tag foo TO ip 8.8.8.8 ALLOW udp port 53")
        };
        let errors = Rule::create(&payload, &RuleOptions::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.to_string(), "Invalid rule UUID");
        assert_eq!(errors.first().field(), Some(Field::Uuid));
    }

    #[test]
    fn test_bad_prefix_length() {
        assert_eq!(
            create_error_messages(
                "FROM tag foo TO subnet 10.8.0.0/33 ALLOW udp port 53",
                &RuleOptions::default()
            ),
            vec!["Subnet \"10.8.0.0/33\" is invalid (bad prefix length)"]
        );
    }

    #[test]
    fn test_zero_prefix_subnets() {
        let rule = create_test_rule("FROM subnet 10.0.0.0/0 TO all vms ALLOW tcp PORT 80");
        assert_eq!(rule.text(), "FROM subnet 10.0.0.0/0 TO all vms ALLOW tcp PORT 80");

        let rule = create_test_rule("FROM subnet fd00::/0 TO all vms ALLOW tcp PORT 80");
        assert_eq!(rule.subnets().len(), 1);
    }

    #[test]
    fn test_version_gates_reach_rule_creation() {
        let text = "FROM any TO all vms ALLOW esp";
        assert_eq!(
            create_error_messages(text, &options_for_version(3)),
            vec!["The rule uses a feature (IPsec) newer than this API allows"]
        );
        assert!(Rule::create(&RulePayload::new(text), &options_for_version(4)).is_ok());
    }

    #[test]
    fn test_enforce_subnet_mask_option() {
        let text = "FROM subnet 10.8.0.1/16 TO all vms ALLOW tcp PORT 22";
        assert!(Rule::create(&RulePayload::new(text), &RuleOptions::default()).is_ok());

        let strict = RuleOptions {
            enforce_subnet_mask: true,
            ..RuleOptions::default()
        };
        assert_eq!(
            create_error_messages(text, &strict),
            vec!["Subnet \"10.8.0.1/16\" is invalid (bits set to right of mask)"]
        );
    }

    #[test]
    fn test_parse_tree_feeds_rule_creation() {
        let text = "FROM (tag web OR ip 10.0.0.1) TO all vms ALLOW tcp (PORT 443 AND PORT 80)";
        let parsed = parse(text, &ParseOptions::default()).unwrap();

        let tree = serde_json::to_value(&parsed).unwrap();
        let payload: RulePayload = serde_json::from_value(json!({ "parsed": tree })).unwrap();

        let from_tree = Rule::create(&payload, &RuleOptions::default()).unwrap();
        let from_text = create_test_rule(text);
        assert_eq!(from_tree.text(), from_text.text());
        assert_eq!(
            from_tree.ports(),
            Some(&[PortSpec::Single(80), PortSpec::Single(443)][..])
        );
    }

    #[test]
    fn test_serialized_rule_reloads() {
        let rule = create_owned_test_rule(r#"FROM tag "role" = "web (prod)" TO any ALLOW tcp PORT 80"#);
        let stored = Value::Object(rule.serialize(None));

        let payload: RulePayload = serde_json::from_value(stored.clone()).unwrap();
        let reloaded = Rule::create(&payload, &RuleOptions::default()).unwrap();

        assert_eq!(reloaded, rule);
        assert_eq!(Value::Object(reloaded.serialize(None)), stored);
        assert_eq!(stored["owner_uuid"], json!(TEST_OWNER));
        assert_eq!(
            stored["rule"],
            json!(r#"FROM tag "role" = "web \(prod\)" TO any ALLOW tcp PORT 80"#)
        );
    }

    #[test]
    fn test_tag_escapes_round_trip() {
        let text = r#"FROM any TO tag "tab\there" = "quote\"d \u00A0 \\ /" ALLOW tcp PORT 80"#;
        let rule = create_test_rule(text);
        assert_eq!(
            rule.tags(),
            &[TagTarget::Pair(
                "tab\there".into(),
                "quote\"d \u{a0} \\ /".into()
            )]
        );
        assert_eq!(rule.text(), text);
        assert_eq!(create_test_rule(&rule.text()).tags(), rule.tags());
    }
}

#[cfg(test)]
mod property_tests {
    use crate::config::RuleOptions;
    use crate::core::parser::{ParseOptions, parse};
    use crate::core::rule::{Rule, RulePayload, escape_tag};
    use proptest::prelude::*;
    use uuid::Uuid;

    prop_compose! {
        fn arb_ipv4()(a in 1u8..=223, b in any::<u8>(), c in any::<u8>(), d in 1u8..=254) -> String {
            format!("{a}.{b}.{c}.{d}")
        }
    }

    prop_compose! {
        fn arb_tag_text()(text in "[a-z0-9 ().\"\\\\/\t\u{a0}\u{200b}]{1,12}") -> String {
            format!("\"{}\"", escape_tag(&text))
        }
    }

    prop_compose! {
        fn arb_tag()(name in arb_tag_text(), value in proptest::option::of(arb_tag_text())) -> String {
            match value {
                Some(value) => format!("tag {name} = {value}"),
                None => format!("tag {name}"),
            }
        }
    }

    fn arb_target() -> impl Strategy<Value = String> {
        prop_oneof![
            arb_ipv4().prop_map(|ip| format!("ip {ip}")),
            (arb_ipv4(), 1u8..=32).prop_map(|(ip, prefix)| format!("subnet {ip}/{prefix}")),
            arb_tag(),
            any::<u128>().prop_map(|bits| format!("vm {}", Uuid::from_u128(bits))),
        ]
    }

    prop_compose! {
        fn arb_side()(first in arb_tag(), rest in prop::collection::vec(arb_target(), 0..6)) -> String {
            let mut targets = vec![first];
            targets.extend(rest);
            format!("({})", targets.join(" OR "))
        }
    }

    fn arb_protocol() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::collection::vec(1u16..=65535, 1..6).prop_map(|ports| {
                let ports: Vec<String> = ports.iter().map(|port| format!("PORT {port}")).collect();
                format!("tcp ({})", ports.join(" AND "))
            }),
            prop::collection::vec((1u16..=65535, 0u16..100), 1..6).prop_map(|ranges| {
                let items: Vec<String> = ranges
                    .iter()
                    .map(|&(start, width)| format!("{start} - {}", start.saturating_add(width)))
                    .collect();
                format!("udp PORTS {}", items.join(", "))
            }),
            prop::collection::vec((any::<u8>(), proptest::option::of(any::<u8>())), 1..6).prop_map(
                |types| {
                    let items: Vec<String> = types
                        .iter()
                        .map(|(icmp_type, code)| match code {
                            Some(code) => format!("TYPE {icmp_type} CODE {code}"),
                            None => format!("TYPE {icmp_type}"),
                        })
                        .collect();
                    format!("icmp ({})", items.join(" AND "))
                }
            ),
            Just("ah".to_string()),
            Just("esp".to_string()),
        ]
    }

    prop_compose! {
        fn arb_rule_text()(
            from in arb_side(),
            to in arb_side(),
            block in any::<bool>(),
            protocol in arb_protocol(),
            priority in 0u8..=100,
        ) -> String {
            let action = if block { "BLOCK" } else { "ALLOW" };
            format!("FROM {from} TO {to} {action} {protocol} PRIORITY {priority}")
        }
    }

    proptest! {
        #[test]
        fn test_canonical_text_round_trips(text in arb_rule_text()) {
            let options = RuleOptions::default();
            let rule = Rule::create(&RulePayload::new(text), &options).unwrap();
            let reparsed = Rule::create(&RulePayload::new(rule.text()), &options).unwrap();

            prop_assert_eq!(reparsed.from(), rule.from());
            prop_assert_eq!(reparsed.to(), rule.to());
            prop_assert_eq!(reparsed.protocol_clause(), rule.protocol_clause());
            prop_assert_eq!(reparsed.priority(), rule.priority());
            prop_assert_eq!(reparsed.text(), rule.text());
        }

        #[test]
        fn test_parse_never_panics(text in "\\PC{0,80}") {
            let _ = parse(&text, &ParseOptions::default());
        }

        #[test]
        fn test_rule_creation_never_panics(text in "(FROM|TO|ALLOW|tcp|PORT|ip|tag|any|all|vms|[0-9.]{1,8}|\\(|\\)| )*") {
            let _ = Rule::create(&RulePayload::new(text), &RuleOptions::default());
        }
    }
}
