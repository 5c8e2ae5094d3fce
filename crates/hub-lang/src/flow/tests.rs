use super::*;

fn ids(path: &FlowPath) -> Vec<&str> {
    path.nodes.iter().map(|n| n.id.as_str()).collect()
}

#[test]
fn parse_single_path() {
    let paths = parse_flow("INPUT.k -> RULESET.r1 -> OUTPUT.es").unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(ids(&paths[0]), vec!["k", "r1", "es"]);
    assert_eq!(paths[0].nodes[0].kind, NodeKind::Input);
    assert_eq!(paths[0].nodes[1].kind, NodeKind::Ruleset);
    assert_eq!(paths[0].nodes[2].kind, NodeKind::Output);
}

#[test]
fn parse_direct_edge() {
    let paths = parse_flow("INPUT.k -> OUTPUT.print").unwrap();
    assert_eq!(paths[0].nodes.len(), 2);
}

#[test]
fn parse_multi_line_with_comments() {
    let body = r#"
# primary detection path
INPUT.k -> RULESET.noise -> RULESET.login -> OUTPUT.es

INPUT.k -> OUTPUT.print   # debug tap
"#;
    let paths = parse_flow(body).unwrap();
    assert_eq!(paths.len(), 2);
    assert_eq!(ids(&paths[0]), vec!["k", "noise", "login", "es"]);
}

#[test]
fn reject_path_not_starting_with_input() {
    let err = parse_flow("RULESET.r -> OUTPUT.o").unwrap_err();
    assert!(err.to_string().contains("INPUT"), "{err}");
}

#[test]
fn reject_path_not_ending_with_output() {
    let err = parse_flow("INPUT.i -> RULESET.r").unwrap_err();
    assert!(err.to_string().contains("OUTPUT"), "{err}");
}

#[test]
fn reject_intermediate_non_ruleset() {
    let err = parse_flow("INPUT.i -> INPUT.j -> OUTPUT.o").unwrap_err();
    assert!(err.to_string().contains("RULESET"), "{err}");
}

#[test]
fn reject_empty_body() {
    assert!(parse_flow("\n# nothing here\n").is_err());
}

#[test]
fn reject_garbage_line() {
    assert!(parse_flow("INPUT.i => OUTPUT.o").is_err());
    assert!(parse_flow("INPUT -> OUTPUT.o").is_err());
}

#[test]
fn reject_in_path_ruleset_cycle() {
    let err = parse_flow("INPUT.i -> RULESET.a -> RULESET.b -> RULESET.a -> OUTPUT.o").unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn reject_cross_path_ruleset_cycle() {
    let body = r#"
INPUT.i -> RULESET.a -> RULESET.b -> OUTPUT.o
INPUT.j -> RULESET.b -> RULESET.a -> OUTPUT.o
"#;
    let err = parse_flow(body).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn shared_ruleset_without_cycle_is_fine() {
    let body = r#"
INPUT.i -> RULESET.a -> OUTPUT.o
INPUT.j -> RULESET.a -> OUTPUT.p
"#;
    assert_eq!(parse_flow(body).unwrap().len(), 2);
}
