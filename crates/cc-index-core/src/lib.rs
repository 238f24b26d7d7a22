//! Shared infrastructure for the Common Crawl URL index pipeline: the
//! reversed-host sort key, the columnar row schema, gzip shard reading,
//! structured pipeline errors, the Parquet sink's atomic publish, retry and
//! cancellation, progress/logging, and worker-pool primitives used across
//! every phase crate.

pub mod accumulator;
pub mod budget;
pub mod error;
pub mod gzip;
pub mod heartbeat;
pub mod host;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod schema;
pub mod semaphore;
pub mod shutdown;
pub mod sink;
pub mod work_queue;

// Re-exports for convenience
pub use accumulator::{Accumulator, DEFAULT_BATCH_SIZE, LineStats, process_lines};
pub use budget::{MemorySnapshot, disk_free_gb, effective_sort_workers};
pub use error::PipelineError;
pub use gzip::{ByteCounter, CountingReader, GzipFileReader, looks_like_gzip, open_gzip_file};
pub use heartbeat::{Heartbeat, HeartbeatSnapshot, Phase};
pub use host::{host_from_url, prefix_upper_bound, reverse_host};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress};
pub use retry::{backoff_duration, retry_with_backoff};
pub use schema::{ROW_GROUP_SIZE, cdx_row_schema, cdx_row_schema_ref};
pub use semaphore::{Semaphore, SemaphoreGuard};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use sink::{ParquetSink, cleanup_tmp_files, is_valid_parquet};
pub use work_queue::WorkQueue;
