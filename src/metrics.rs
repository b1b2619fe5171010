use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub static METRICS: Lazy<BackendMetrics> = Lazy::new(BackendMetrics::default);

/// Process-wide backend counters, recorded by the Postgres backend.
#[derive(Default)]
pub struct BackendMetrics {
    queries_total: AtomicU64,
    query_errors: AtomicU64,
    query_micros: AtomicU64,
}

impl BackendMetrics {
    pub fn record_query(&self, elapsed: Duration) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        self.query_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_query_error(&self) {
        self.query_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            query_errors: self.query_errors.load(Ordering::Relaxed),
            query_time: Duration::from_micros(self.query_micros.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queries_total: u64,
    pub query_errors: u64,
    pub query_time: Duration,
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    /// Span wrapping one backend round-trip.
    pub fn backend_query_span(op: &str, table: &str) -> tracing::Span {
        tracing::debug_span!("backend_query", op = op, table = table)
    }

    /// Install a minimal registry subscriber. Safe to call more than once;
    /// later calls are no-ops.
    pub fn init_tracing() {
        use tracing_subscriber::prelude::*;
        let _ = tracing_subscriber::registry().try_init();
    }
}
