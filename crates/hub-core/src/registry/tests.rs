use hub_config::ArtifactStore;

use super::*;

const RULESET_XML: &str = r#"
<root type="DETECTION">
  <rule id="r">
    <checklist condition="a">
      <node id="a" type="EQU" field="data_type">login</node>
    </checklist>
  </rule>
</root>
"#;

const PROJECT_YAML: &str = "content: |\n  INPUT.k -> RULESET.rs1 -> OUTPUT.o\n";

fn registry() -> (tempfile::TempDir, Registry) {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    (dir, Registry::load(store).unwrap())
}

/// Stage and apply a component in one step.
fn put(reg: &Registry, kind: ComponentKind, id: &str, raw: &str) {
    reg.create(kind, id, Some(raw.to_string())).unwrap();
    let outcome = reg.apply(kind, id).unwrap();
    assert!(outcome.changed);
}

#[test]
fn create_stages_pending_only() {
    let (_dir, reg) = registry();
    reg.create(ComponentKind::Ruleset, "r1", Some(RULESET_XML.into()))
        .unwrap();

    let listed = reg.list(ComponentKind::Ruleset);
    assert_eq!(listed.len(), 1);
    assert!(listed[0].has_temp);
    assert!(reg.ruleset("r1").is_none(), "pending must not be live");

    let (raw, is_pending) = reg.get_raw(ComponentKind::Ruleset, "r1").unwrap();
    assert!(is_pending);
    assert_eq!(raw, RULESET_XML);
}

#[test]
fn duplicate_create_is_rejected() {
    let (_dir, reg) = registry();
    reg.create(ComponentKind::Output, "o", None).unwrap();
    assert!(reg.create(ComponentKind::Output, "o", None).is_err());
}

#[test]
fn apply_promotes_and_is_idempotent() {
    let (_dir, reg) = registry();
    reg.create(ComponentKind::Ruleset, "r1", Some(RULESET_XML.into()))
        .unwrap();
    let outcome = reg.apply(ComponentKind::Ruleset, "r1").unwrap();
    assert!(outcome.changed);
    assert!(reg.ruleset("r1").is_some());
    assert!(!reg.list(ComponentKind::Ruleset)[0].has_temp);

    // Second apply with nothing staged: no-op.
    let again = reg.apply(ComponentKind::Ruleset, "r1").unwrap();
    assert!(!again.changed);
}

#[test]
fn apply_with_bad_pending_keeps_both_versions() {
    let (_dir, reg) = registry();
    put(&reg, ComponentKind::Ruleset, "r1", RULESET_XML);

    reg.update(ComponentKind::Ruleset, "r1", "<root type=\"BROKEN\"/>")
        .unwrap();
    assert!(reg.apply(ComponentKind::Ruleset, "r1").is_err());

    // Formal untouched, pending still staged for fixing.
    assert!(reg.ruleset("r1").is_some());
    let (_, is_pending) = reg.get_raw(ComponentKind::Ruleset, "r1").unwrap();
    assert!(is_pending);
}

#[test]
fn update_equal_to_formal_clears_pending() {
    let (_dir, reg) = registry();
    put(&reg, ComponentKind::Ruleset, "r1", RULESET_XML);
    reg.update(ComponentKind::Ruleset, "r1", "<root type=\"FILTER\"></root>")
        .unwrap();
    assert!(reg.list(ComponentKind::Ruleset)[0].has_temp);

    reg.update(ComponentKind::Ruleset, "r1", RULESET_XML).unwrap();
    assert!(!reg.list(ComponentKind::Ruleset)[0].has_temp);
    let (_, is_pending) = reg.get_raw(ComponentKind::Ruleset, "r1").unwrap();
    assert!(!is_pending);
}

#[test]
fn verify_is_pure() {
    let (dir, reg) = registry();
    Registry::verify(ComponentKind::Ruleset, "x", RULESET_XML).unwrap();
    assert!(Registry::verify(ComponentKind::Ruleset, "x", "<root/>").is_err());
    assert!(Registry::verify(ComponentKind::Input, "x", "type: nope").is_err());

    // No files, no map entries.
    assert!(reg.list(ComponentKind::Ruleset).is_empty());
    assert!(
        ArtifactStore::open(dir.path())
            .unwrap()
            .load_formal(ComponentKind::Ruleset)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn delete_refuses_referenced_components() {
    let (_dir, reg) = registry();
    put(&reg, ComponentKind::Ruleset, "rs1", RULESET_XML);
    put(&reg, ComponentKind::Project, "p1", PROJECT_YAML);

    let err = reg.delete(ComponentKind::Ruleset, "rs1").unwrap_err();
    assert!(err.to_string().contains("p1"), "{err}");

    // Dropping the project unblocks the delete.
    reg.delete(ComponentKind::Project, "p1").unwrap();
    reg.delete(ComponentKind::Ruleset, "rs1").unwrap();
    assert!(reg.list(ComponentKind::Ruleset).is_empty());
}

#[test]
fn delete_unknown_component_fails() {
    let (_dir, reg) = registry();
    assert!(reg.delete(ComponentKind::Input, "ghost").is_err());
}

#[test]
fn affected_projects_computed_on_apply() {
    let (_dir, reg) = registry();
    put(&reg, ComponentKind::Ruleset, "rs1", RULESET_XML);
    put(&reg, ComponentKind::Project, "p1", PROJECT_YAML);
    put(
        &reg,
        ComponentKind::Project,
        "p2",
        "content: |\n  INPUT.k -> OUTPUT.o\n",
    );

    reg.update(ComponentKind::Ruleset, "rs1", &RULESET_XML.replace("login", "logout"))
        .unwrap();
    let outcome = reg.apply(ComponentKind::Ruleset, "rs1").unwrap();
    assert_eq!(outcome.affected_projects, vec!["p1".to_string()]);
    assert!(outcome.hot_swappable, "rule-body change keeps projects running");
}

#[test]
fn ruleset_kind_change_is_not_hot_swappable() {
    let (_dir, reg) = registry();
    put(&reg, ComponentKind::Ruleset, "rs1", RULESET_XML);
    reg.update(
        ComponentKind::Ruleset,
        "rs1",
        &RULESET_XML.replace("DETECTION", "FILTER"),
    )
    .unwrap();
    let outcome = reg.apply(ComponentKind::Ruleset, "rs1").unwrap();
    assert!(!outcome.hot_swappable);
}

#[test]
fn pending_changes_lists_diffs() {
    let (_dir, reg) = registry();
    put(&reg, ComponentKind::Ruleset, "rs1", RULESET_XML);
    reg.update(ComponentKind::Ruleset, "rs1", "<root type=\"FILTER\"></root>")
        .unwrap();
    reg.create(ComponentKind::Output, "o9", None).unwrap();

    let changes = reg.pending_changes();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].kind, ComponentKind::Output);
    assert!(changes[0].formal.is_none());
    assert_eq!(changes[1].kind, ComponentKind::Ruleset);
    assert_eq!(changes[1].formal.as_deref(), Some(RULESET_XML));
}

#[test]
fn load_restores_state_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    {
        let reg = Registry::load(ArtifactStore::open(dir.path()).unwrap()).unwrap();
        put(&reg, ComponentKind::Ruleset, "rs1", RULESET_XML);
        reg.create(ComponentKind::Output, "o1", Some("type: print\n".into()))
            .unwrap();
    }
    let reg = Registry::load(ArtifactStore::open(dir.path()).unwrap()).unwrap();
    assert!(reg.ruleset("rs1").is_some());
    let outputs = reg.list(ComponentKind::Output);
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].has_temp, "pending files survive restarts");
}

#[test]
fn apply_synced_installs_formal_directly() {
    let (_dir, reg) = registry();
    let outcome = reg
        .apply_synced(ComponentKind::Ruleset, "rs1", RULESET_XML)
        .unwrap();
    assert!(outcome.changed);
    assert!(reg.ruleset("rs1").is_some());
    assert!(reg.pending_changes().is_empty());
}
