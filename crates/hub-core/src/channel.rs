use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use futures::stream::SelectAll;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::project::Pns;
use crate::record::Record;

// ---------------------------------------------------------------------------
// Edge — one bounded FIFO per directed producer→consumer edge
// ---------------------------------------------------------------------------

pub type RecordReceiver = mpsc::Receiver<Record>;

/// Producer half of an edge, tagged with the consumer PNS and the set of
/// projects sharing it. Two projects declaring the same `(from, to)` PNS
/// pair co-own one edge; the edge dies when the last owner releases it.
#[derive(Debug, Clone)]
pub struct EdgeSender {
    pub to_pns: Pns,
    tx: mpsc::Sender<Record>,
    delivered: Arc<AtomicU64>,
    users: Arc<std::sync::RwLock<HashSet<String>>>,
}

impl EdgeSender {
    pub fn add_user(&self, project_id: &str) {
        self.users
            .write()
            .expect("lock poisoned")
            .insert(project_id.to_string());
    }

    /// Remove one owner; returns true when no owners remain.
    fn remove_user(&self, project_id: &str) -> bool {
        let mut users = self.users.write().expect("lock poisoned");
        users.remove(project_id);
        users.is_empty()
    }

    pub fn users(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .users
            .read()
            .expect("lock poisoned")
            .iter()
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Blocking (backpressured) send. Returns `false` when the consumer side
    /// is gone.
    pub async fn send(&self, record: Record) -> bool {
        match self.tx.send(record).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Records queued but not yet consumed on this edge.
    pub fn backlog(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Total records ever delivered into this edge.
    pub fn delivered_total(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn downgrade(&self) -> mpsc::WeakSender<Record> {
        self.tx.downgrade()
    }
}

/// Allocate a fresh edge. Channels are never reused across a stop/start
/// cycle; every (re)start wires new ones.
pub fn edge(
    project_id: impl Into<String>,
    to_pns: Pns,
    capacity: usize,
) -> (EdgeSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let mut users = HashSet::new();
    users.insert(project_id.into());
    (
        EdgeSender {
            to_pns,
            tx,
            delivered: Arc::new(AtomicU64::new(0)),
            users: Arc::new(std::sync::RwLock::new(users)),
        },
        rx,
    )
}

// ---------------------------------------------------------------------------
// FanOut — per-downstream replication with dynamic membership
// ---------------------------------------------------------------------------

/// The downstream set of a shell. Each record is replicated (shallow copy) to
/// every edge; membership changes as projects attach to and release a shared
/// shell.
#[derive(Debug, Default)]
pub struct FanOut {
    edges: std::sync::RwLock<Vec<EdgeSender>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, edge: EdgeSender) {
        self.edges.write().expect("lock poisoned").push(edge);
    }

    /// Existing edge into `to_pns`, if one is already wired (shared-edge
    /// lookup during project start).
    pub fn edge_to(&self, to_pns: &Pns) -> Option<EdgeSender> {
        self.edges
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|e| &e.to_pns == to_pns)
            .cloned()
    }

    /// Release `project_id` from every edge; edges left without owners are
    /// dropped (closing their channel). Returns how many edges remain.
    pub fn detach_project(&self, project_id: &str) -> usize {
        let mut edges = self.edges.write().expect("lock poisoned");
        edges.retain(|e| !e.remove_user(project_id));
        edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.read().expect("lock poisoned").is_empty()
    }

    /// Replicate a record to every downstream edge, applying backpressure
    /// per edge. Edges whose consumer is gone are skipped.
    pub async fn send_all(&self, record: &Record) {
        // Collect under the lock, send outside it.
        let edges: Vec<EdgeSender> = self.edges.read().expect("lock poisoned").clone();
        for edge in edges {
            edge.send(record.clone()).await;
        }
    }

    /// `(owners, to_pns, delivered_total)` per edge, for the per-minute
    /// stats sampler.
    pub fn delivery_snapshot(&self) -> Vec<(Vec<String>, Pns, u64)> {
        self.edges
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|e| (e.users(), e.to_pns.clone(), e.delivered_total()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Intake — nondeterministic merge over per-edge FIFOs
// ---------------------------------------------------------------------------

/// Merged upstream of a consumer shell.
///
/// Each edge keeps its own bounded FIFO (preserving per-edge ordering); the
/// merge interleaving across edges is unspecified. Workers share the intake:
/// only one pulls at a time, evaluation happens outside the lock.
pub struct Intake {
    streams: tokio::sync::Mutex<SelectAll<ReceiverStream<Record>>>,
    pending: std::sync::Mutex<Vec<RecordReceiver>>,
    added: tokio::sync::Notify,
    /// Weak handles to upstream senders, for backlog inspection.
    upstream: std::sync::Mutex<Vec<mpsc::WeakSender<Record>>>,
}

impl Default for Intake {
    fn default() -> Self {
        Self::new()
    }
}

impl Intake {
    pub fn new() -> Self {
        Self {
            streams: tokio::sync::Mutex::new(SelectAll::new()),
            pending: std::sync::Mutex::new(Vec::new()),
            added: tokio::sync::Notify::new(),
            upstream: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Attach a new upstream edge. Safe to call while workers are waiting.
    pub fn attach(&self, rx: RecordReceiver, tx_weak: mpsc::WeakSender<Record>) {
        self.pending.lock().expect("lock poisoned").push(rx);
        self.upstream.lock().expect("lock poisoned").push(tx_weak);
        self.added.notify_waiters();
    }

    /// Receive the next record from any upstream edge.
    ///
    /// Returns `None` on cancellation. When every upstream has closed the
    /// call parks until a new edge is attached or the token fires.
    pub async fn recv(&self, cancel: &CancellationToken) -> Option<Record> {
        loop {
            // Register the attach waiter BEFORE draining pending edges, so
            // an attach racing with the drain is never lost.
            let notified = self.added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut streams = tokio::select! {
                guard = self.streams.lock() => guard,
                _ = cancel.cancelled() => return None,
            };
            {
                let mut pending = self.pending.lock().expect("lock poisoned");
                for rx in pending.drain(..) {
                    streams.push(ReceiverStream::new(rx));
                }
            }

            if streams.is_empty() {
                drop(streams);
                tokio::select! {
                    _ = &mut notified => continue,
                    _ = cancel.cancelled() => return None,
                }
            }

            tokio::select! {
                record = streams.next() => {
                    match record {
                        Some(record) => return Some(record),
                        // All upstreams ended; wait for a new attach.
                        None => continue,
                    }
                }
                _ = &mut notified => continue,
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Records queued across all live upstream edges.
    pub fn backlog(&self) -> usize {
        let mut upstream = self.upstream.lock().expect("lock poisoned");
        upstream.retain(|weak| weak.upgrade().is_some());
        upstream
            .iter()
            .filter_map(|weak| weak.upgrade())
            .map(|tx| tx.max_capacity() - tx.capacity())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn rec(n: i64) -> Record {
        Record::from_value(json!({ "n": n })).unwrap()
    }

    fn pns(s: &str) -> Pns {
        Pns::root_str(s)
    }

    #[tokio::test]
    async fn edge_is_fifo() {
        let (tx, mut rx) = edge("p", pns("OUTPUT.o"), 8);
        for i in 0..5 {
            assert!(tx.send(rec(i)).await);
        }
        for i in 0..5 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.get_f64("n"), Some(i as f64));
        }
        assert_eq!(tx.delivered_total(), 5);
    }

    #[tokio::test]
    async fn full_edge_applies_backpressure() {
        let (tx, mut rx) = edge("p", pns("OUTPUT.o"), 2);
        assert!(tx.send(rec(1)).await);
        assert!(tx.send(rec(2)).await);
        assert_eq!(tx.backlog(), 2);

        // A third send must block until the consumer drains.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), tx.send(rec(3))).await;
        assert!(blocked.is_err(), "send should block on a full edge");

        rx.recv().await.unwrap();
        tokio::time::timeout(Duration::from_millis(200), tx.send(rec(3)))
            .await
            .expect("send should complete after drain");
    }

    #[tokio::test]
    async fn fanout_replicates_and_detaches() {
        let fanout = FanOut::new();
        let (tx_a, mut rx_a) = edge("proj_a", pns("OUTPUT.a"), 8);
        let (tx_b, mut rx_b) = edge("proj_b", pns("OUTPUT.b"), 8);
        fanout.attach(tx_a);
        fanout.attach(tx_b);

        fanout.send_all(&rec(7)).await;
        assert_eq!(rx_a.recv().await.unwrap().get_f64("n"), Some(7.0));
        assert_eq!(rx_b.recv().await.unwrap().get_f64("n"), Some(7.0));

        assert_eq!(fanout.detach_project("proj_a"), 1);
        fanout.send_all(&rec(8)).await;
        assert_eq!(rx_b.recv().await.unwrap().get_f64("n"), Some(8.0));
        assert!(rx_a.recv().await.is_none(), "detached edge must be closed");
    }

    #[tokio::test]
    async fn shared_edge_survives_until_last_owner_leaves() {
        let fanout = FanOut::new();
        let (tx, mut rx) = edge("proj_a", pns("OUTPUT.o"), 8);
        fanout.attach(tx);

        // proj_b joins the same edge instead of wiring a duplicate.
        let shared = fanout.edge_to(&pns("OUTPUT.o")).unwrap();
        shared.add_user("proj_b");
        assert_eq!(shared.users(), vec!["proj_a".to_string(), "proj_b".to_string()]);

        assert_eq!(fanout.detach_project("proj_a"), 1);
        fanout.send_all(&rec(1)).await;
        assert_eq!(rx.recv().await.unwrap().get_f64("n"), Some(1.0));

        assert_eq!(fanout.detach_project("proj_b"), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn intake_merges_edges_and_keeps_per_edge_order() {
        let intake = Intake::new();
        let cancel = CancellationToken::new();
        let (tx1, rx1) = edge("p", pns("RULESET.r"), 8);
        let (tx2, rx2) = edge("p", pns("RULESET.r"), 8);
        intake.attach(rx1, tx1.downgrade());
        intake.attach(rx2, tx2.downgrade());

        for i in 0..3 {
            assert!(tx1.send(rec(i)).await);
            assert!(tx2.send(rec(100 + i)).await);
        }

        let mut from_1 = Vec::new();
        let mut from_2 = Vec::new();
        for _ in 0..6 {
            let r = intake.recv(&cancel).await.unwrap();
            let n = r.get_f64("n").unwrap() as i64;
            if n >= 100 {
                from_2.push(n);
            } else {
                from_1.push(n);
            }
        }
        assert_eq!(from_1, vec![0, 1, 2]);
        assert_eq!(from_2, vec![100, 101, 102]);
    }

    #[tokio::test]
    async fn intake_attach_while_waiting() {
        let intake = Arc::new(Intake::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let intake = Arc::clone(&intake);
            let cancel = cancel.clone();
            tokio::spawn(async move { intake.recv(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, rx) = edge("p", pns("RULESET.r"), 4);
        intake.attach(rx, tx.downgrade());
        assert!(tx.send(rec(42)).await);

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.get_f64("n"), Some(42.0));
    }

    #[tokio::test]
    async fn intake_cancel_unblocks() {
        let intake = Intake::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(intake.recv(&cancel).await.is_none());
    }
}
