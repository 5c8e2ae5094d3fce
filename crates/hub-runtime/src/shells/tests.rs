use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use hub_core::channel::edge;
use hub_core::metrics::DailyStats;
use hub_core::plugin::PluginHost;
use hub_core::project::Pns;
use hub_core::record::Record;
use hub_core::rule::{RULE_ID_FIELD, compile};

use super::*;

const LOGIN_FILTER: &str = r#"
<root type="FILTER">
  <rule id="keep_login">
    <checklist condition="a">
      <node id="a" type="EQU" field="data_type">login</node>
    </checklist>
  </rule>
</root>
"#;

fn rec(v: serde_json::Value) -> Record {
    Record::from_value(v).unwrap()
}

fn host() -> Arc<PluginHost> {
    Arc::new(PluginHost::with_builtins(Arc::new(DailyStats::new("test"))))
}

fn filter_shell() -> Arc<RulesetShell> {
    let compiled = Arc::new(compile("r", LOGIN_FILTER).unwrap());
    Arc::new(RulesetShell::new("r", Pns::root_str("INPUT.i.RULESET.r"), compiled))
}

#[tokio::test]
async fn worker_filters_and_forwards() {
    let shell = filter_shell();
    let cancel = CancellationToken::new();

    // upstream edge
    let (up_tx, up_rx) = edge("p", shell.pns.clone(), 16);
    shell.intake.attach(up_rx, up_tx.downgrade());
    // downstream edge
    let (down_tx, mut down_rx) = edge("p", Pns::root_str("OUTPUT.o"), 16);
    shell.downstreams.attach(down_tx);

    let worker = tokio::spawn(run_ruleset_worker(
        Arc::clone(&shell),
        host(),
        cancel.clone(),
    ));

    assert!(up_tx.send(rec(json!({"data_type": "login"}))).await);
    assert!(up_tx.send(rec(json!({"data_type": "logout"}))).await);
    assert!(up_tx.send(rec(json!({"data_type": "login", "n": 2}))).await);

    let first = tokio::time::timeout(Duration::from_secs(1), down_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.get_str("data_type").as_deref(), Some("login"));
    let second = tokio::time::timeout(Duration::from_secs(1), down_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.get_f64("n"), Some(2.0));

    // The dropped record never shows up.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), down_rx.recv())
            .await
            .is_err()
    );

    assert_eq!(shell.metrics.total(), 3);
    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn hot_swap_takes_effect_for_later_records() {
    let detection = LOGIN_FILTER.replace("FILTER", "DETECTION");
    let compiled = Arc::new(compile("r", &detection).unwrap());
    let shell = Arc::new(RulesetShell::new(
        "r",
        Pns::root_str("INPUT.i.RULESET.r"),
        compiled,
    ));
    let cancel = CancellationToken::new();

    let (up_tx, up_rx) = edge("p", shell.pns.clone(), 16);
    shell.intake.attach(up_rx, up_tx.downgrade());
    let (down_tx, mut down_rx) = edge("p", Pns::root_str("OUTPUT.o"), 16);
    shell.downstreams.attach(down_tx);

    let worker = tokio::spawn(run_ruleset_worker(
        Arc::clone(&shell),
        host(),
        cancel.clone(),
    ));

    assert!(up_tx.send(rec(json!({"data_type": "login"}))).await);
    let before = tokio::time::timeout(Duration::from_secs(1), down_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(before.contains(RULE_ID_FIELD), "old rules match login");

    // Swap: now only logout matches.
    let swapped = detection.replace("login", "logout");
    shell.hot_swap(Arc::new(compile("r", &swapped).unwrap()));

    assert!(up_tx.send(rec(json!({"data_type": "login"}))).await);
    let after_login = tokio::time::timeout(Duration::from_secs(1), down_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!after_login.contains(RULE_ID_FIELD), "new rules ignore login");

    assert!(up_tx.send(rec(json!({"data_type": "logout"}))).await);
    let after_logout = tokio::time::timeout(Duration::from_secs(1), down_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(after_logout.contains(RULE_ID_FIELD), "new rules match logout");

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn quiescence_reflects_backlog_and_in_flight() {
    let shell = filter_shell();
    assert!(shell.quiescent(), "fresh shell is quiescent");

    let (up_tx, up_rx) = edge("p", shell.pns.clone(), 16);
    shell.intake.attach(up_rx, up_tx.downgrade());
    assert!(up_tx.send(rec(json!({"data_type": "login"}))).await);
    assert!(!shell.quiescent(), "queued record shows as backlog");

    // Drain it with a worker and re-check.
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(run_ruleset_worker(
        Arc::clone(&shell),
        host(),
        cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(shell.quiescent());

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn output_consumer_drains_intake() {
    use hub_core::driver::OutputShell;

    let config = Arc::new(hub_config::OutputConfig::Print);
    let shell = Arc::new(OutputShell::new("o", Pns::root_str("OUTPUT.o"), config, 1));
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    shell.set_test_chan(Some(tx));

    let (up_tx, up_rx) = edge("p", shell.pns.clone(), 8);
    shell.intake.attach(up_rx, up_tx.downgrade());

    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_output_consumer(Arc::clone(&shell), cancel.clone()));

    assert!(up_tx.send(rec(json!({"n": 1}))).await);
    let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.get_f64("n"), Some(1.0));
    assert_eq!(shell.metrics.total(), 1);

    cancel.cancel();
    task.await.unwrap();
}
