//! cc-index-meta: C4, the hierarchical meta-index builder (§4.4).
//!
//! C3 (`cc-index-shard`) writes `domain_shards`/`parquet_rowgroups` directly
//! into the per-collection DB as each shard is indexed, so that DB's content
//! is maintained incrementally rather than rebuilt here. This crate owns the
//! two aggregation steps above it in the hierarchy:
//!
//! - year DB := union of its constituent collection DBs' `domain_shards`
//! - master DB := union of every year DB's `domain_shards`
//!
//! Both follow the same shape: open each source DB read-only, project
//! `domain_shards` down to `(host_rev, child_db_relpath, collection, year)`,
//! write to a temp path, atomically rename over the live target. Rebuild is
//! triggered by mtime comparison (§9: rebuild-on-mtime), not an explicit
//! dirty flag, so touching a source forces its parent to rebuild.

pub mod aggregate;

pub use aggregate::{rebuild_master_db, rebuild_year_db, should_rebuild};
