//! Operation counters plus the audit and metrics log lines.
//!
//! Audit lines go to the `docql::audit` target, metrics lines (one JSON object per completed
//! operation) to `docql::metrics`. Both are also pushed into a thread-local sink when a test
//! enables one, so assertions do not depend on a global logger.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::logger::{AUDIT_TARGET, METRICS_TARGET};

#[derive(Debug, Default)]
pub struct Counters {
    pub reads_total: AtomicU64,
    pub writes_total: AtomicU64,
    pub aggregations_total: AtomicU64,
    pub slow_ops_total: AtomicU64,
}

static COUNTERS: Counters = Counters {
    reads_total: AtomicU64::new(0),
    writes_total: AtomicU64::new(0),
    aggregations_total: AtomicU64::new(0),
    slow_ops_total: AtomicU64::new(0),
};

#[must_use]
pub fn counters() -> &'static Counters {
    &COUNTERS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
    Aggregate,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub reads_total: u64,
    pub writes_total: u64,
    pub aggregations_total: u64,
    pub slow_ops_total: u64,
}

#[must_use]
pub fn snapshot() -> Snapshot {
    Snapshot {
        reads_total: COUNTERS.reads_total.load(Ordering::Relaxed),
        writes_total: COUNTERS.writes_total.load(Ordering::Relaxed),
        aggregations_total: COUNTERS.aggregations_total.load(Ordering::Relaxed),
        slow_ops_total: COUNTERS.slow_ops_total.load(Ordering::Relaxed),
    }
}

#[must_use]
pub fn metrics_text() -> String {
    let s = snapshot();
    format!(
        "docql_reads_total {}\n\
         docql_writes_total {}\n\
         docql_aggregations_total {}\n\
         docql_slow_ops_total {}\n",
        s.reads_total, s.writes_total, s.aggregations_total, s.slow_ops_total
    )
}

thread_local! {
    static TL_SINK: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Disables the thread-local sink on drop.
pub struct SinkGuard;

impl Drop for SinkGuard {
    fn drop(&mut self) {
        TL_SINK.with(|s| *s.borrow_mut() = None);
    }
}

/// Starts capturing audit and metrics lines emitted on the current thread.
pub fn enable_thread_sink() -> SinkGuard {
    TL_SINK.with(|s| *s.borrow_mut() = Some(Vec::new()));
    SinkGuard
}

/// Returns and clears the captured lines; empty when no sink is enabled.
pub fn drain() -> Vec<String> {
    TL_SINK.with(|s| s.borrow_mut().as_mut().map(std::mem::take).unwrap_or_default())
}

fn capture(line: &str) {
    TL_SINK.with(|s| {
        if let Some(buf) = s.borrow_mut().as_mut() {
            buf.push(line.to_owned());
        }
    });
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// One audit line per write operation.
pub fn log_audit(op: &str, collection: &str, affected: u64) {
    let line = serde_json::json!({
        "ts": now_ts(), "op": op, "collection": collection, "affected": affected
    })
    .to_string();
    capture(&line);
    log::info!(target: AUDIT_TARGET, "{line}");
}

/// Times one operation; call [`OpTimer::finish`] once it completes.
pub struct OpTimer {
    kind: OpKind,
    op: &'static str,
    collection: String,
    started: Instant,
}

impl OpTimer {
    #[must_use]
    pub fn start(kind: OpKind, op: &'static str, collection: &str) -> Self {
        Self { kind, op, collection: collection.to_owned(), started: Instant::now() }
    }

    /// Bumps the counters and emits the metrics line. Returns whether the operation was slow.
    pub fn finish(self, results: u64, slow_op_ms: u64) -> bool {
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let counter = match self.kind {
            OpKind::Read => &COUNTERS.reads_total,
            OpKind::Write => &COUNTERS.writes_total,
            OpKind::Aggregate => &COUNTERS.aggregations_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let slow = elapsed_ms >= slow_op_ms;
        if slow {
            COUNTERS.slow_ops_total.fetch_add(1, Ordering::Relaxed);
            log::warn!("slow {} on {}: {elapsed_ms} ms", self.op, self.collection);
        }
        let line = serde_json::json!({
            "ts": now_ts(),
            "op": self.op,
            "collection": self.collection,
            "duration_ms": elapsed_ms,
            "results": results,
            "slow": slow,
        })
        .to_string();
        capture(&line);
        log::info!(target: METRICS_TARGET, "{line}");
        slow
    }
}
