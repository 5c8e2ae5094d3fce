use super::*;

const DETECTION_XML: &str = r#"
<root type="DETECTION" name="login_rules">
  <rule id="login_watch">
    <filter field="data_type">login</filter>
    <checklist condition="a and (b or not c)">
      <node id="a" type="EQU" field="data_type">login</node>
      <node id="b" type="REGEX" field="user">^admin</node>
      <node id="c" type="INCL" field="tags" delimiter="," logic="OR">vpn,bastion</node>
    </checklist>
    <append field_name="severity">high</append>
    <append field_name="geo" type="PLUGIN" plugin="geo_lookup" field="src_ip"/>
    <del>tmp_a,tmp_b</del>
  </rule>
</root>
"#;

// -- XML parsing ------------------------------------------------------------

#[test]
fn parse_detection_ruleset() {
    let def = parse_ruleset(DETECTION_XML).unwrap();
    assert_eq!(def.kind, RulesetKind::Detection);
    assert_eq!(def.name.as_deref(), Some("login_rules"));
    assert_eq!(def.rules.len(), 1);

    let rule = &def.rules[0];
    assert_eq!(rule.id, "login_watch");
    assert_eq!(
        rule.filter,
        Some(FilterDef {
            field: "data_type".into(),
            value: "login".into(),
        })
    );
    assert_eq!(rule.nodes.len(), 3);
    assert_eq!(rule.nodes[0].kind, CheckKindDef::Equ);
    assert_eq!(rule.nodes[1].kind, CheckKindDef::Regex);
    assert_eq!(
        rule.nodes[2].kind,
        CheckKindDef::Incl {
            delimiter: Some(",".into()),
            logic: InclLogic::Or,
        }
    );
    assert_eq!(rule.actions.len(), 3);
    assert_eq!(
        rule.actions[0],
        ActionDef::Append {
            field: "severity".into(),
            source: AppendSourceDef::Literal("high".into()),
        }
    );
    assert_eq!(
        rule.actions[1],
        ActionDef::Append {
            field: "geo".into(),
            source: AppendSourceDef::Plugin {
                plugin: "geo_lookup".into(),
                args: vec!["src_ip".into()],
            },
        }
    );
    assert_eq!(
        rule.actions[2],
        ActionDef::Del {
            fields: vec!["tmp_a".into(), "tmp_b".into()],
        }
    );
}

#[test]
fn parse_filter_ruleset_with_numcmp_and_plugin_node() {
    let xml = r#"
<root type="FILTER">
  <rule id="burst">
    <checklist condition="hits and priv">
      <node id="hits" type="NUMCMP" field="count" compare="gt">5</node>
      <node id="priv" type="PLUGIN" field="src_ip" plugin="is_private_ip"/>
    </checklist>
  </rule>
</root>
"#;
    let def = parse_ruleset(xml).unwrap();
    assert_eq!(def.kind, RulesetKind::Filter);
    let rule = &def.rules[0];
    assert!(rule.filter.is_none());
    assert_eq!(rule.nodes[0].kind, CheckKindDef::NumCmp { op: CmpOp::Gt });
    assert_eq!(
        rule.nodes[1].kind,
        CheckKindDef::Plugin {
            plugin: "is_private_ip".into(),
        }
    );
}

#[test]
fn missing_condition_means_all_nodes() {
    let xml = r#"
<root type="DETECTION">
  <rule id="r">
    <checklist>
      <node id="a" type="EQU" field="x">1</node>
      <node id="b" type="EQU" field="y">2</node>
    </checklist>
  </rule>
</root>
"#;
    let def = parse_ruleset(xml).unwrap();
    assert!(def.rules[0].condition.is_none());
    assert_eq!(def.rules[0].nodes.len(), 2);
}

#[test]
fn plugin_action_is_parsed() {
    let xml = r#"
<root type="DETECTION">
  <rule id="r">
    <checklist><node id="a" type="EQU" field="x">1</node></checklist>
    <plugin name="enrich" field="src_ip,dst_ip"/>
  </rule>
</root>
"#;
    let def = parse_ruleset(xml).unwrap();
    assert_eq!(
        def.rules[0].actions[0],
        ActionDef::Plugin {
            plugin: "enrich".into(),
            args: vec!["src_ip".into(), "dst_ip".into()],
        }
    );
}

#[test]
fn reject_unknown_root_type() {
    let xml = r#"<root type="AUDIT"><rule id="r"/></root>"#;
    assert!(parse_ruleset(xml).is_err());
}

#[test]
fn reject_unknown_node_type() {
    let xml = r#"
<root type="FILTER">
  <rule id="r">
    <checklist><node id="a" type="FUZZY" field="x">1</node></checklist>
  </rule>
</root>
"#;
    let err = parse_ruleset(xml).unwrap_err();
    assert!(err.to_string().contains("FUZZY"), "{err}");
}

#[test]
fn reject_condition_over_unknown_node() {
    let xml = r#"
<root type="FILTER">
  <rule id="r">
    <checklist condition="a and ghost">
      <node id="a" type="EQU" field="x">1</node>
    </checklist>
  </rule>
</root>
"#;
    let err = parse_ruleset(xml).unwrap_err();
    assert!(err.to_string().contains("ghost"), "{err}");
}

#[test]
fn reject_rule_without_id() {
    let xml = r#"<root type="FILTER"><rule><checklist/></rule></root>"#;
    assert!(parse_ruleset(xml).is_err());
}

#[test]
fn reject_malformed_xml() {
    assert!(parse_ruleset("<root type=\"FILTER\"><rule id=\"r\">").is_err());
    assert!(parse_ruleset("not xml at all").is_err());
}

#[test]
fn reject_missing_root() {
    assert!(parse_ruleset("").is_err());
}

// -- condition expressions --------------------------------------------------

#[test]
fn condition_precedence_and_binds_tighter() {
    // a or b and c  ==  a or (b and c)
    let expr = parse_condition("a or b and c").unwrap();
    let lookup = |id: &str| id == "a";
    assert!(expr.eval(&lookup));
    let lookup = |id: &str| id == "b";
    assert!(!expr.eval(&lookup));
    let lookup = |id: &str| id == "b" || id == "c";
    assert!(expr.eval(&lookup));
}

#[test]
fn condition_not_and_parens() {
    let expr = parse_condition("a and (b or not c)").unwrap();
    // a=true, b=false, c=false -> not c = true -> whole true
    let lookup = |id: &str| id == "a";
    assert!(expr.eval(&lookup));
    // a=true, b=false, c=true -> false
    let lookup = |id: &str| id == "a" || id == "c";
    assert!(!expr.eval(&lookup));
}

#[test]
fn condition_idents_may_start_with_keyword() {
    let expr = parse_condition("android and order").unwrap();
    assert_eq!(
        expr.referenced_nodes(),
        vec!["android", "order"]
    );
}

#[test]
fn condition_rejects_garbage() {
    assert!(parse_condition("a and").is_err());
    assert!(parse_condition("and a").is_err());
    assert!(parse_condition("(a or b").is_err());
    assert!(parse_condition("").is_err());
}

#[test]
fn referenced_nodes_walks_whole_tree() {
    let expr = parse_condition("a and (b or not c)").unwrap();
    assert_eq!(expr.referenced_nodes(), vec!["a", "b", "c"]);
}
