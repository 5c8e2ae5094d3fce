use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hub_config::InputConfig;

use crate::channel::FanOut;
use crate::error::CoreResult;
use crate::metrics::PnsMetrics;
use crate::project::Pns;
use crate::record::Record;

use super::ConnectivityReport;

// ---------------------------------------------------------------------------
// InputShell — runtime wrapper for one input PNS
// ---------------------------------------------------------------------------

/// One input instance bound to a PNS: the shared driver configuration, the
/// downstream fan-out, and its own counters.
///
/// The external read loop is a [`RecordSource`] task owned by the runtime;
/// the shell itself is the fabric-facing surface (fan-out, test injection,
/// connectivity probes).
pub struct InputShell {
    pub id: String,
    pub pns: Pns,
    pub config: Arc<InputConfig>,
    pub downstreams: FanOut,
    pub metrics: Arc<PnsMetrics>,
}

impl InputShell {
    pub fn new(id: impl Into<String>, pns: Pns, config: Arc<InputConfig>) -> Self {
        Self {
            id: id.into(),
            pns,
            config,
            downstreams: FanOut::new(),
            metrics: Arc::new(PnsMetrics::new()),
        }
    }

    /// Push one record into the fabric: counts it, then replicates to every
    /// downstream edge with per-edge backpressure. Used by both the source
    /// worker and `ProcessTestData`.
    pub async fn inject(&self, record: Record) {
        self.metrics.record(1);
        self.downstreams.send_all(&record).await;
    }

    pub fn consume_total(&self) -> u64 {
        self.metrics.total()
    }

    pub fn consume_qps(&self) -> u64 {
        self.metrics.qps()
    }

    pub fn check_connectivity(&self) -> ConnectivityReport {
        ConnectivityReport::from_traffic(
            self.config.client_type(),
            self.config.connection_info(),
            self.metrics.total(),
            self.metrics.active_within(5),
            false,
        )
    }
}

// ---------------------------------------------------------------------------
// RecordSource — the external read loop seam
// ---------------------------------------------------------------------------

/// Reads from an external system and pushes records through the shell.
///
/// Backpressure comes for free: `InputShell::inject` blocks while any
/// downstream edge is full, which pauses the source-side read.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn run(&self, shell: Arc<InputShell>, cancel: CancellationToken) -> CoreResult<()>;
}

/// Placeholder source for driver types whose client library is not linked
/// into this build (kafka, aliyun_sls). Logs once and parks until shutdown;
/// test-mode injection still flows through the shell.
pub struct IdleSource {
    client_type: &'static str,
}

#[async_trait]
impl RecordSource for IdleSource {
    async fn run(&self, shell: Arc<InputShell>, cancel: CancellationToken) -> CoreResult<()> {
        tracing::warn!(
            domain = "conn",
            input = %shell.id,
            pns = %shell.pns,
            client = self.client_type,
            "external transport not linked; source stays idle"
        );
        cancel.cancelled().await;
        Ok(())
    }
}

/// Pick the source implementation for a configuration.
pub fn source_for(config: &InputConfig) -> Arc<dyn RecordSource> {
    match config {
        InputConfig::Kafka { .. } => Arc::new(IdleSource {
            client_type: "kafka",
        }),
        InputConfig::AliyunSls { .. } => Arc::new(IdleSource {
            client_type: "aliyun_sls",
        }),
    }
}
