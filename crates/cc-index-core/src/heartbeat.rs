//! Stall-detection heartbeat — periodic liveness record for an in-flight
//! worker, read by the orchestrator to tell "slow" from "stuck" (see
//! the per-collection state machine's `QUARANTINED_SHARD` transition).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which phase a worker reporting a heartbeat is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Decode,
    Sort,
    Index,
    Meta,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Decode => "decode",
            Self::Sort => "sort",
            Self::Index => "index",
            Self::Meta => "meta",
        };
        f.write_str(s)
    }
}

/// A single worker's liveness counters, updated from the hot loop and read
/// by a supervising thread. Cloning is cheap (shares the same atomics).
#[derive(Clone)]
pub struct Heartbeat {
    inner: Arc<HeartbeatInner>,
}

struct HeartbeatInner {
    phase: Phase,
    collection: String,
    shard: String,
    rows_processed: AtomicU64,
    bytes_read: AtomicU64,
    last_update_millis: AtomicU64,
    started: Instant,
}

impl Heartbeat {
    pub fn new(phase: Phase, collection: impl Into<String>, shard: impl Into<String>) -> Self {
        let hb = Self {
            inner: Arc::new(HeartbeatInner {
                phase,
                collection: collection.into(),
                shard: shard.into(),
                rows_processed: AtomicU64::new(0),
                bytes_read: AtomicU64::new(0),
                last_update_millis: AtomicU64::new(0),
                started: Instant::now(),
            }),
        };
        hb.touch();
        hb
    }

    /// Record progress from the hot loop. Cheap enough to call every row
    /// group / batch boundary; the caller should not call this per-row.
    pub fn update(&self, rows_processed: u64, bytes_read: u64) {
        self.inner.rows_processed.store(rows_processed, Ordering::Relaxed);
        self.inner.bytes_read.store(bytes_read, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        let elapsed = self.inner.started.elapsed().as_millis() as u64;
        self.inner.last_update_millis.store(elapsed, Ordering::Relaxed);
    }

    /// Snapshot the current state for the supervising thread.
    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            phase: self.inner.phase,
            collection: self.inner.collection.clone(),
            shard: self.inner.shard.clone(),
            rows_processed: self.inner.rows_processed.load(Ordering::Relaxed),
            bytes_read: self.inner.bytes_read.load(Ordering::Relaxed),
            since_last_update: self.time_since_update(),
        }
    }

    fn time_since_update(&self) -> Duration {
        let last = self.inner.last_update_millis.load(Ordering::Relaxed);
        let now = self.inner.started.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(last))
    }

    /// Whether this worker has gone quiet for longer than `stall_after`,
    /// which the orchestrator treats as grounds to quarantine the shard
    /// rather than wait indefinitely.
    pub fn is_stalled(&self, stall_after: Duration) -> bool {
        self.time_since_update() >= stall_after
    }
}

/// Point-in-time read of a [`Heartbeat`], cheap to log or send across threads.
#[derive(Debug, Clone)]
pub struct HeartbeatSnapshot {
    pub phase: Phase,
    pub collection: String,
    pub shard: String,
    pub rows_processed: u64,
    pub bytes_read: u64,
    pub since_last_update: Duration,
}

impl std::fmt::Display for HeartbeatSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} [{}] rows={} bytes={} idle={:.1}s",
            self.collection,
            self.shard,
            self.phase,
            self.rows_processed,
            self.bytes_read,
            self.since_last_update.as_secs_f64()
        )
    }
}
