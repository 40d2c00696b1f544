use std::{
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use doc_query::Side;

use crate::buffer::{MutationOutcome, Placement};

#[derive(Default)]
struct WindowMetricsInner {
    snapshots: AtomicU64,
    snapshot_documents: AtomicU64,
    backfills_front: AtomicU64,
    backfills_rear: AtomicU64,
    backfill_requested: AtomicU64,
    backfill_documents: AtomicU64,
    mutations_seen: AtomicU64,
    mutations_skipped: AtomicU64,
    documents_placed: AtomicU64,
    documents_outside: AtomicU64,
    documents_updated: AtomicU64,
    documents_removed: AtomicU64,
    requests_superseded: AtomicU64,
    fetch_requests: AtomicU64,
    fetch_success: AtomicU64,
    fetch_failures: AtomicU64,
    transport_errors: AtomicU64,
    fetch_latency_total_ns: AtomicU64,
    fetch_latency_samples: AtomicU64,
    fetch_latency_max_ns: AtomicU64,
    fetch_inflight: AtomicI64,
}

#[derive(Clone, Default)]
pub struct WindowMetrics {
    inner: Arc<WindowMetricsInner>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowMetricsSnapshot {
    pub snapshots: u64,
    pub snapshot_documents: u64,
    pub backfills_front: u64,
    pub backfills_rear: u64,
    pub backfill_requested: u64,
    pub backfill_documents: u64,
    pub mutations_seen: u64,
    pub mutations_skipped: u64,
    pub documents_placed: u64,
    pub documents_outside: u64,
    pub documents_updated: u64,
    pub documents_removed: u64,
    pub requests_superseded: u64,
    pub fetch_requests: u64,
    pub fetch_success: u64,
    pub fetch_failures: u64,
    pub transport_errors: u64,
    pub fetch_inflight: i64,
    pub fetch_latency_ms_avg: f64,
    pub fetch_latency_ms_max: f64,
}

impl WindowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_snapshot(&self, documents: usize) {
        self.inner.snapshots.fetch_add(1, Ordering::Relaxed);
        self.inner
            .snapshot_documents
            .fetch_add(documents as u64, Ordering::Relaxed);
    }

    pub fn record_backfill(&self, side: Side, requested: usize) {
        let counter = match side {
            Side::Front => &self.inner.backfills_front,
            Side::Rear => &self.inner.backfills_rear,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inner
            .backfill_requested
            .fetch_add(requested as u64, Ordering::Relaxed);
    }

    pub fn record_backfill_documents(&self, added: usize) {
        if added > 0 {
            self.inner
                .backfill_documents
                .fetch_add(added as u64, Ordering::Relaxed);
        }
    }

    pub fn record_mutation(&self, outcome: Option<MutationOutcome>) {
        self.inner.mutations_seen.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            None | Some(MutationOutcome::Ignored) => &self.inner.mutations_skipped,
            Some(MutationOutcome::Placed(Placement::BeforeBuffer | Placement::AfterBuffer)) => {
                &self.inner.documents_outside
            }
            Some(MutationOutcome::Placed(_)) => &self.inner.documents_placed,
            Some(MutationOutcome::Updated) => &self.inner.documents_updated,
            Some(MutationOutcome::Removed(_) | MutationOutcome::Displaced(_)) => {
                &self.inner.documents_removed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.inner
            .requests_superseded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_attempt(&self) {
        self.inner.fetch_requests.fetch_add(1, Ordering::Relaxed);
        self.inner.fetch_inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_success(&self, elapsed: Duration) {
        self.inner.fetch_success.fetch_add(1, Ordering::Relaxed);
        self.observe_latency(elapsed);
        self.finish_inflight();
    }

    pub fn record_fetch_failure(&self, elapsed: Duration) {
        self.inner.fetch_failures.fetch_add(1, Ordering::Relaxed);
        self.observe_latency(elapsed);
        self.finish_inflight();
    }

    /// Fetch abandoned before completion.
    pub fn record_fetch_cancelled(&self) {
        self.finish_inflight();
    }

    pub fn record_transport_error(&self) {
        self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WindowMetricsSnapshot {
        let total_ns = self.inner.fetch_latency_total_ns.load(Ordering::Relaxed);
        let samples = self.inner.fetch_latency_samples.load(Ordering::Relaxed);
        let max_ns = self.inner.fetch_latency_max_ns.load(Ordering::Relaxed);
        let avg_ms = if samples > 0 {
            (total_ns as f64 / samples as f64) / 1_000_000.0
        } else {
            0.0
        };
        WindowMetricsSnapshot {
            snapshots: self.inner.snapshots.load(Ordering::Relaxed),
            snapshot_documents: self.inner.snapshot_documents.load(Ordering::Relaxed),
            backfills_front: self.inner.backfills_front.load(Ordering::Relaxed),
            backfills_rear: self.inner.backfills_rear.load(Ordering::Relaxed),
            backfill_requested: self.inner.backfill_requested.load(Ordering::Relaxed),
            backfill_documents: self.inner.backfill_documents.load(Ordering::Relaxed),
            mutations_seen: self.inner.mutations_seen.load(Ordering::Relaxed),
            mutations_skipped: self.inner.mutations_skipped.load(Ordering::Relaxed),
            documents_placed: self.inner.documents_placed.load(Ordering::Relaxed),
            documents_outside: self.inner.documents_outside.load(Ordering::Relaxed),
            documents_updated: self.inner.documents_updated.load(Ordering::Relaxed),
            documents_removed: self.inner.documents_removed.load(Ordering::Relaxed),
            requests_superseded: self.inner.requests_superseded.load(Ordering::Relaxed),
            fetch_requests: self.inner.fetch_requests.load(Ordering::Relaxed),
            fetch_success: self.inner.fetch_success.load(Ordering::Relaxed),
            fetch_failures: self.inner.fetch_failures.load(Ordering::Relaxed),
            transport_errors: self.inner.transport_errors.load(Ordering::Relaxed),
            fetch_inflight: self.inner.fetch_inflight.load(Ordering::Relaxed),
            fetch_latency_ms_avg: avg_ms,
            fetch_latency_ms_max: max_ns as f64 / 1_000_000.0,
        }
    }

    fn observe_latency(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.inner
            .fetch_latency_total_ns
            .fetch_add(nanos, Ordering::Relaxed);
        self.inner
            .fetch_latency_samples
            .fetch_add(1, Ordering::Relaxed);
        self.inner
            .fetch_latency_max_ns
            .fetch_max(nanos, Ordering::Relaxed);
    }

    fn finish_inflight(&self) {
        self.inner.fetch_inflight.fetch_sub(1, Ordering::Relaxed);
    }
}
