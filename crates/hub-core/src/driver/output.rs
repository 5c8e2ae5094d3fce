use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use orion_error::prelude::*;
use tokio::sync::mpsc;

use hub_config::OutputConfig;

use crate::channel::Intake;
use crate::error::{CoreReason, CoreResult};
use crate::metrics::PnsMetrics;
use crate::project::Pns;
use crate::record::Record;

use super::ConnectivityReport;

/// First retry delay; doubles per attempt.
const RETRY_BASE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// RecordSink — the external write seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn send(&self, record: &Record) -> CoreResult<()>;
    /// Is a real transport behind this sink?
    fn wired(&self) -> bool {
        true
    }
}

/// Console sink: one JSON line per record on stdout.
pub struct PrintSink;

#[async_trait]
impl RecordSink for PrintSink {
    async fn send(&self, record: &Record) -> CoreResult<()> {
        println!("{record}");
        Ok(())
    }
}

/// Placeholder for sink types whose client library is not linked into this
/// build. Every send fails so the retry/drop accounting stays observable.
struct UnwiredSink {
    client_type: &'static str,
}

#[async_trait]
impl RecordSink for UnwiredSink {
    async fn send(&self, _record: &Record) -> CoreResult<()> {
        Err(StructError::from(CoreReason::Driver)
            .with_detail(format!("{} transport not linked", self.client_type)))
    }

    fn wired(&self) -> bool {
        false
    }
}

/// Pick the sink implementation for a configuration.
pub fn sink_for(config: &OutputConfig) -> Arc<dyn RecordSink> {
    match config {
        OutputConfig::Print => Arc::new(PrintSink),
        OutputConfig::Kafka { .. } => Arc::new(UnwiredSink {
            client_type: "kafka",
        }),
        OutputConfig::AliyunSls { .. } => Arc::new(UnwiredSink {
            client_type: "aliyun_sls",
        }),
        OutputConfig::Elasticsearch { .. } => Arc::new(UnwiredSink {
            client_type: "elasticsearch",
        }),
    }
}

// ---------------------------------------------------------------------------
// OutputShell — runtime wrapper for one output PNS
// ---------------------------------------------------------------------------

/// One output instance bound to a PNS. Consumes the upstream merge and hands
/// records to its sink, retrying with exponential backoff before dropping.
///
/// When `test_chan` is set, records are redirected into an in-memory channel
/// instead of the external sink (test harness interception).
pub struct OutputShell {
    pub id: String,
    pub pns: Pns,
    pub config: Arc<OutputConfig>,
    pub intake: Intake,
    pub metrics: Arc<PnsMetrics>,
    sink: Arc<dyn RecordSink>,
    retries: u32,
    test_chan: std::sync::RwLock<Option<mpsc::Sender<Record>>>,
    failed: AtomicU64,
}

impl OutputShell {
    pub fn new(id: impl Into<String>, pns: Pns, config: Arc<OutputConfig>, retries: u32) -> Self {
        let sink = sink_for(&config);
        Self::with_sink(id, pns, config, retries, sink)
    }

    /// Constructor with an explicit sink (tests, embedders with real
    /// transports).
    pub fn with_sink(
        id: impl Into<String>,
        pns: Pns,
        config: Arc<OutputConfig>,
        retries: u32,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            id: id.into(),
            pns,
            config,
            intake: Intake::new(),
            metrics: Arc::new(PnsMetrics::new()),
            sink,
            retries,
            test_chan: std::sync::RwLock::new(None),
            failed: AtomicU64::new(0),
        }
    }

    /// Install or clear the test collection channel.
    pub fn set_test_chan(&self, chan: Option<mpsc::Sender<Record>>) {
        *self.test_chan.write().expect("lock poisoned") = chan;
    }

    pub fn failed_total(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Deliver one record: count it, redirect to the test channel when set,
    /// otherwise send with up to `retries` backoff attempts, then drop.
    pub async fn deliver(&self, record: Record) {
        self.metrics.record(1);

        let test_chan = self.test_chan.read().expect("lock poisoned").clone();
        if let Some(chan) = test_chan {
            if chan.send(record).await.is_err() {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }

        let mut delay = RETRY_BASE;
        for attempt in 0..=self.retries {
            match self.sink.send(&record).await {
                Ok(()) => return,
                Err(e) => {
                    if attempt == self.retries {
                        let dropped = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped == 1 {
                            tracing::warn!(
                                domain = "conn",
                                output = %self.id,
                                pns = %self.pns,
                                error = %e,
                                "send failed after retries; dropping records"
                            );
                        } else {
                            tracing::debug!(
                                domain = "conn",
                                output = %self.id,
                                pns = %self.pns,
                                error = %e,
                                dropped,
                                "send failed after retries"
                            );
                        }
                        return;
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    pub fn check_connectivity(&self) -> ConnectivityReport {
        ConnectivityReport::from_traffic(
            self.config.client_type(),
            self.config.connection_info(),
            self.metrics.total(),
            self.metrics.active_within(5),
            self.sink.wired(),
        )
    }
}
