use std::sync::Arc;

use serde_json::{Value, json};

use super::*;
use crate::metrics::{DailyStats, StatsFilter};
use crate::record::Record;

fn host() -> PluginHost {
    PluginHost::with_builtins(Arc::new(DailyStats::new("test-node")))
}

#[test]
fn builtin_predicates() {
    let host = host();
    assert!(host
        .invoke_predicate("is_private_ip", &[json!("10.1.2.3")])
        .unwrap());
    assert!(host
        .invoke_predicate("is_private_ip", &[json!("192.168.0.9")])
        .unwrap());
    assert!(!host
        .invoke_predicate("is_private_ip", &[json!("8.8.8.8")])
        .unwrap());
    // Garbage and missing args are false, never an error.
    assert!(!host.invoke_predicate("is_private_ip", &[json!("nope")]).unwrap());
    assert!(!host.invoke_predicate("is_private_ip", &[]).unwrap());

    assert!(host
        .invoke_predicate("is_local_ip", &[json!("127.0.0.1")])
        .unwrap());
}

#[test]
fn builtin_transforms() {
    let host = host();
    assert_eq!(
        host.invoke_transform("to_upper", &[json!("ssh")]).unwrap(),
        json!("SSH")
    );
    assert_eq!(
        host.invoke_transform("concat", &[json!("a"), json!(1), json!("b")])
            .unwrap(),
        json!("a1b")
    );
    let hash = host
        .invoke_transform("sha256_hex", &[json!("abc")])
        .unwrap();
    assert_eq!(
        hash,
        json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
}

#[test]
fn unknown_plugin_is_an_error() {
    let host = host();
    assert!(host.invoke_predicate("ghost", &[]).is_err());
}

#[test]
fn kind_mismatch_is_an_error() {
    let host = host();
    assert!(host.invoke_transform("is_private_ip", &[json!("x")]).is_err());
    assert!(host.invoke_predicate("to_upper", &[json!("x")]).is_err());
}

#[test]
fn panics_become_execution_errors() {
    let host = host();
    host.register(
        "boom",
        Callable::Predicate(Arc::new(|_| panic!("exploded"))),
    );
    let err = host.invoke_predicate("boom", &[]).unwrap_err();
    assert!(err.to_string().contains("panicked"), "{err}");

    // The worker-visible contract: a failure counter increments, nothing
    // else happens.
    let failures = host.stats().query(&StatsFilter {
        sequence_prefix: Some("PLUGIN.boom.failure".into()),
        ..Default::default()
    });
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].count, 1);
}

#[test]
fn success_counters_accumulate() {
    let host = host();
    host.invoke_predicate("is_empty", &[json!("")]).unwrap();
    host.invoke_predicate("is_empty", &[json!("x")]).unwrap();
    let ok = host.stats().query(&StatsFilter {
        sequence_prefix: Some("PLUGIN.is_empty.success".into()),
        ..Default::default()
    });
    assert_eq!(ok[0].count, 2);
}

#[test]
fn detached_registry_is_isolated() {
    let live = host();
    let test = live.detached();
    test.register(
        "only_in_test",
        Callable::Predicate(Arc::new(|_| Ok(true))),
    );
    assert!(test.kind_of("only_in_test").is_some());
    assert!(live.kind_of("only_in_test").is_none());

    test.invoke_predicate("only_in_test", &[]).unwrap();
    assert!(
        live.stats().query(&StatsFilter::default()).is_empty(),
        "test invocations must not touch live counters"
    );
}

#[test]
fn builtin_compiler_resolves_aliases() {
    let host = host();
    host.load_source("my_ip_check", "#!builtin is_private_ip\n", &BuiltinCompiler)
        .unwrap();
    assert!(host
        .invoke_predicate("my_ip_check", &[json!("10.0.0.1")])
        .unwrap());

    assert!(host
        .load_source("bad", "#!builtin no_such_builtin", &BuiltinCompiler)
        .is_err());
    assert!(host
        .load_source("script", "fn main() {}", &BuiltinCompiler)
        .is_err());
}

#[test]
fn field_args_and_coercion() {
    let rec = Record::from_value(json!({"a": 1, "b": {"c": true}})).unwrap();
    let args = field_args(&rec, &["a".into(), "b.c".into(), "missing".into()]);
    assert_eq!(args, vec![json!(1), json!(true), Value::Null]);
    assert_eq!(arg_str(&args, 0).as_deref(), Some("1"));
    assert_eq!(arg_str(&args, 1).as_deref(), Some("true"));
    assert!(arg_str(&args, 2).is_none());
}
