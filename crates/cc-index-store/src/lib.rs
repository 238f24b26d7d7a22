//! cc-index-store: the `ingested_files` idempotence ledger, pipeline
//! configuration, and the on-disk layout contract (§6) shared by every
//! phase crate.

pub mod config;
pub mod ledger;
pub mod layout;
pub mod schema;

pub use config::PipelineConfig;
pub use ledger::{IngestedFile, ensure_schema, file_fingerprint, is_current, list, prune_missing, record};
pub use layout::Layout;
pub use schema::{ensure_collection_schema, ensure_meta_schema};
