use super::*;

const TWO_PATH_YAML: &str = r#"
content: |
  INPUT.k -> RULESET.noise -> RULESET.login -> OUTPUT.es
  INPUT.k -> RULESET.noise -> OUTPUT.print
"#;

#[test]
fn parse_builds_pns_edges() {
    let def = ProjectDef::parse("p1", TWO_PATH_YAML, false).unwrap();
    assert_eq!(def.paths.len(), 2);

    let edges: Vec<(String, String)> = def
        .flow_nodes
        .iter()
        .map(|f| (f.from_pns.to_string(), f.to_pns.to_string()))
        .collect();
    assert_eq!(
        edges,
        vec![
            ("INPUT.k".into(), "INPUT.k.RULESET.noise".into()),
            (
                "INPUT.k.RULESET.noise".into(),
                "INPUT.k.RULESET.noise.RULESET.login".into()
            ),
            (
                "INPUT.k.RULESET.noise.RULESET.login".into(),
                "INPUT.k.RULESET.noise.RULESET.login.OUTPUT.es".into()
            ),
            (
                "INPUT.k.RULESET.noise".into(),
                "INPUT.k.RULESET.noise.OUTPUT.print".into()
            ),
        ]
    );
}

#[test]
fn shared_prefix_edges_are_deduplicated() {
    let def = ProjectDef::parse("p1", TWO_PATH_YAML, false).unwrap();
    // The INPUT.k -> RULESET.noise edge appears in both paths but is wired once.
    let count = def
        .flow_nodes
        .iter()
        .filter(|f| f.from_pns.as_str() == "INPUT.k")
        .count();
    assert_eq!(count, 1);

    // PNS uniqueness: no duplicate (from, to) pairs at all.
    let mut seen = std::collections::HashSet::new();
    for f in &def.flow_nodes {
        assert!(seen.insert((f.from_pns.clone(), f.to_pns.clone())));
    }
}

#[test]
fn same_ruleset_on_two_paths_gets_two_shells() {
    let yaml = r#"
content: |
  INPUT.a -> RULESET.r -> OUTPUT.o
  INPUT.b -> RULESET.r -> OUTPUT.o
"#;
    let def = ProjectDef::parse("p", yaml, false).unwrap();
    let ruleset_shells: Vec<&Pns> = def
        .flow_nodes
        .iter()
        .filter(|f| f.to.kind == NodeKind::Ruleset)
        .map(|f| &f.to_pns)
        .collect();
    assert_eq!(ruleset_shells.len(), 2);
    assert_ne!(ruleset_shells[0], ruleset_shells[1]);
}

#[test]
fn start_order_is_reverse_topological() {
    let def = ProjectDef::parse("p1", TWO_PATH_YAML, false).unwrap();
    let order = def.start_order();
    let position = |pns: &str| {
        order
            .iter()
            .position(|(_, p)| p.as_str() == pns)
            .unwrap_or_else(|| panic!("{pns} missing from start order"))
    };
    // Every consumer starts before its producer.
    for fnode in &def.flow_nodes {
        assert!(
            position(fnode.to_pns.as_str()) < position(fnode.from_pns.as_str()),
            "{} must start before {}",
            fnode.to_pns,
            fnode.from_pns
        );
    }
    // And the input is last.
    assert_eq!(order.last().unwrap().1.as_str(), "INPUT.k");
}

#[test]
fn stop_order_is_forward_topological() {
    let def = ProjectDef::parse("p1", TWO_PATH_YAML, false).unwrap();
    let order = def.stop_order();
    assert_eq!(order.first().unwrap().1.as_str(), "INPUT.k");
}

#[test]
fn references_by_kind_and_id() {
    let def = ProjectDef::parse("p1", TWO_PATH_YAML, false).unwrap();
    assert!(def.references(hub_config::ComponentKind::Input, "k"));
    assert!(def.references(hub_config::ComponentKind::Ruleset, "noise"));
    assert!(def.references(hub_config::ComponentKind::Output, "print"));
    assert!(!def.references(hub_config::ComponentKind::Ruleset, "k"));
    assert!(!def.references(hub_config::ComponentKind::Input, "es"));
    assert!(!def.references(hub_config::ComponentKind::Project, "p1"));
}

#[test]
fn test_mode_prefixes_every_pns() {
    let def = ProjectDef::parse("p1", TWO_PATH_YAML, true).unwrap();
    for fnode in &def.flow_nodes {
        assert!(fnode.from_pns.as_str().starts_with("TEST_p1_"));
        assert!(fnode.to_pns.as_str().starts_with("TEST_p1_"));
    }
}

#[test]
fn cycle_is_rejected_with_no_nodes() {
    let yaml = r#"
content: |
  INPUT.i -> RULESET.a -> RULESET.b -> RULESET.a -> OUTPUT.o
"#;
    let err = ProjectDef::parse("p", yaml, false).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn reject_non_yaml_and_missing_content() {
    assert!(ProjectDef::parse("p", ":", false).is_err());
    assert!(ProjectDef::parse("p", "note: no content here\n", false).is_err());
}
