//! Structured pipeline error kinds (see spec §7)

/// One of the error kinds the pipeline distinguishes, each carrying enough
/// context to land in the durable event log without a stack of `anyhow`
/// context strings to parse back apart.
#[derive(Debug)]
pub enum PipelineError {
    /// Malformed CDX line or truncated gzip. Row-level errors are counted,
    /// not fatal; a whole-shard decode failure quarantines the shard.
    Decode {
        collection: String,
        shard: Option<String>,
        message: String,
    },
    /// Sorter OOM-killed or exceeded its memory budget.
    Sort {
        collection: String,
        shard: String,
        message: String,
    },
    /// Transactional failure writing shard index rows.
    Index {
        collection: String,
        shard: String,
        message: String,
    },
    /// Validator detected a DB row referencing a missing shard, or a shard
    /// marked sorted but not actually ordered.
    InvariantViolation { collection: String, message: String },
    /// Free disk on the scratch volume dropped below the configured floor.
    BackpressureDisk { collection: String },
    /// `MemAvailable` insufficient to launch another worker.
    BackpressureMemory { collection: String },
    /// Cooperative cancellation observed between rows/batches.
    Cancelled { collection: String },
    /// Expected shard never materialized after all retries.
    UnrecoverableMissing { collection: String, shard: String },
}

impl PipelineError {
    pub fn collection(&self) -> &str {
        match self {
            Self::Decode { collection, .. }
            | Self::Sort { collection, .. }
            | Self::Index { collection, .. }
            | Self::InvariantViolation { collection, .. }
            | Self::BackpressureDisk { collection }
            | Self::BackpressureMemory { collection }
            | Self::Cancelled { collection }
            | Self::UnrecoverableMissing { collection, .. } => collection,
        }
    }

    pub fn shard(&self) -> Option<&str> {
        match self {
            Self::Decode { shard, .. } => shard.as_deref(),
            Self::Sort { shard, .. }
            | Self::Index { shard, .. }
            | Self::UnrecoverableMissing { shard, .. } => Some(shard),
            _ => None,
        }
    }

    /// Whether the orchestrator should retry the failing phase.
    ///
    /// Invariant violations and permanently-missing shards are never
    /// retryable — retrying can't fix a structural problem. A whole-shard
    /// `Decode` failure (the gzip itself is truncated or not gzip at all)
    /// is the same kind of dead end: re-running the decoder against the
    /// same bytes produces the same failure, so it is quarantined instead
    /// of retried. Everything else (sort/index failures, backpressure,
    /// cancellation) is retried up to `max_attempts` by the caller.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvariantViolation { .. }
                | Self::UnrecoverableMissing { .. }
                | Self::Decode { .. }
        )
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode {
                collection,
                shard,
                message,
            } => match shard {
                Some(s) => write!(f, "decode error in {collection}/{s}: {message}"),
                None => write!(f, "decode error in {collection}: {message}"),
            },
            Self::Sort {
                collection,
                shard,
                message,
            } => write!(f, "sort error in {collection}/{shard}: {message}"),
            Self::Index {
                collection,
                shard,
                message,
            } => write!(f, "index error in {collection}/{shard}: {message}"),
            Self::InvariantViolation { collection, message } => {
                write!(f, "invariant violation in {collection}: {message}")
            }
            Self::BackpressureDisk { collection } => {
                write!(f, "{collection}: paused, disk backpressure")
            }
            Self::BackpressureMemory { collection } => {
                write!(f, "{collection}: paused, memory backpressure")
            }
            Self::Cancelled { collection } => write!(f, "{collection}: cancelled"),
            Self::UnrecoverableMissing { collection, shard } => {
                write!(f, "{collection}/{shard}: never materialized after retries")
            }
        }
    }
}

impl std::error::Error for PipelineError {}
