//! cc-index-orchestrator: C6 (the driver) and C7 (the status validator),
//! the two components that turn the individually-idempotent phase crates
//! (codec, sort, shard, meta) into a single `ccindex ingest` run, and that
//! answer `ccindex status` honestly after a crash.

pub mod manifest;
pub mod orchestrator;
pub mod state;
pub mod validator;

pub use manifest::{read_expected_shards, ExpectedShards};
pub use orchestrator::{discover_collections, run_ingest};
pub use state::CollectionState;
pub use validator::{validate, Anomaly, CollectionStatus};
