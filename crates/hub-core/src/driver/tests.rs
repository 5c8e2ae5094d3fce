use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use orion_error::prelude::*;
use serde_json::json;
use tokio::sync::mpsc;

use hub_config::{InputConfig, OutputConfig};

use crate::channel::edge;
use crate::error::{CoreReason, CoreResult};
use crate::project::Pns;
use crate::record::Record;

use super::*;

fn rec(n: i64) -> Record {
    Record::from_value(json!({ "n": n })).unwrap()
}

fn kafka_input() -> Arc<InputConfig> {
    Arc::new(
        InputConfig::parse("type: kafka\nbrokers: [\"k:9092\"]\ntopic: t\n").unwrap(),
    )
}

#[tokio::test]
async fn inject_fans_out_and_counts() {
    let shell = InputShell::new("k", Pns::root_str("INPUT.k"), kafka_input());
    let (tx_a, mut rx_a) = edge("pa", Pns::root_str("OUTPUT.a"), 8);
    let (tx_b, mut rx_b) = edge("pb", Pns::root_str("OUTPUT.b"), 8);
    shell.downstreams.attach(tx_a);
    shell.downstreams.attach(tx_b);

    shell.inject(rec(1)).await;
    assert_eq!(rx_a.recv().await.unwrap().get_f64("n"), Some(1.0));
    assert_eq!(rx_b.recv().await.unwrap().get_f64("n"), Some(1.0));
    assert_eq!(shell.consume_total(), 1);
}

#[tokio::test]
async fn unwired_input_reports_not_configured() {
    let shell = InputShell::new("k", Pns::root_str("INPUT.k"), kafka_input());
    let report = shell.check_connectivity();
    assert_eq!(report.client_type, "kafka");
    assert_eq!(report.connection_status, ConnectionState::NotConfigured);
    assert_eq!(report.status, ConnStatus::Warning);
    assert_eq!(report.errors.len(), 1);
}

#[tokio::test]
async fn input_with_traffic_reports_active() {
    let shell = InputShell::new("k", Pns::root_str("INPUT.k"), kafka_input());
    shell.inject(rec(1)).await;
    let report = shell.check_connectivity();
    assert_eq!(report.connection_status, ConnectionState::Active);
    assert_eq!(report.status, ConnStatus::Ok);
}

// -- output side ------------------------------------------------------------

/// Sink that fails the first `fail_n` sends, then succeeds.
struct FlakySink {
    fail_n: u64,
    attempts: AtomicU64,
    delivered: AtomicU64,
}

#[async_trait]
impl RecordSink for FlakySink {
    async fn send(&self, _record: &Record) -> CoreResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_n {
            return Err(StructError::from(CoreReason::Driver).with_detail("flaky"));
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn print_output() -> Arc<OutputConfig> {
    Arc::new(OutputConfig::Print)
}

#[tokio::test]
async fn output_retries_then_succeeds() {
    let sink = Arc::new(FlakySink {
        fail_n: 2,
        attempts: AtomicU64::new(0),
        delivered: AtomicU64::new(0),
    });
    let shell = OutputShell::with_sink(
        "o",
        Pns::root_str("OUTPUT.o"),
        print_output(),
        3,
        Arc::clone(&sink) as Arc<dyn RecordSink>,
    );

    shell.deliver(rec(1)).await;
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(shell.failed_total(), 0);
}

#[tokio::test]
async fn output_drops_after_retry_budget() {
    let sink = Arc::new(FlakySink {
        fail_n: u64::MAX,
        attempts: AtomicU64::new(0),
        delivered: AtomicU64::new(0),
    });
    let shell = OutputShell::with_sink(
        "o",
        Pns::root_str("OUTPUT.o"),
        print_output(),
        2,
        Arc::clone(&sink) as Arc<dyn RecordSink>,
    );

    shell.deliver(rec(1)).await;
    // initial attempt + 2 retries
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(shell.failed_total(), 1);
}

#[tokio::test]
async fn test_chan_intercepts_the_sink() {
    let sink = Arc::new(FlakySink {
        fail_n: u64::MAX,
        attempts: AtomicU64::new(0),
        delivered: AtomicU64::new(0),
    });
    let shell = OutputShell::with_sink(
        "o",
        Pns::root_str("OUTPUT.o"),
        print_output(),
        3,
        Arc::clone(&sink) as Arc<dyn RecordSink>,
    );

    let (tx, mut rx) = mpsc::channel(4);
    shell.set_test_chan(Some(tx));
    shell.deliver(rec(9)).await;

    let got = tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.get_f64("n"), Some(9.0));
    // The failing sink was never touched.
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);

    // Clearing the channel restores normal dispatch.
    shell.set_test_chan(None);
    shell.deliver(rec(10)).await;
    assert!(sink.attempts.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn print_output_reports_connected_then_active() {
    let shell = OutputShell::new("o", Pns::root_str("OUTPUT.o"), print_output(), 3);
    assert_eq!(
        shell.check_connectivity().connection_status,
        ConnectionState::Connected
    );
    shell.deliver(rec(1)).await;
    assert_eq!(
        shell.check_connectivity().connection_status,
        ConnectionState::Active
    );
}
