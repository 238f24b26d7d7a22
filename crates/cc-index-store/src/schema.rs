//! DDL for the index-table family (§3): shard-level `domain_shards` +
//! `parquet_rowgroups`, and the meta-level `domain_shards` reused unchanged
//! in shape across collection/year/master DBs. Centralized here so
//! `cc-index-shard` (writer of the shard-level shape) and `cc-index-meta`
//! (writer and reader of the meta-level shape) never drift apart on column
//! names or index definitions.

use anyhow::{Context, Result};
use duckdb::Connection;

/// Create `domain_shards` + `parquet_rowgroups` in a per-collection DB, the
/// shape C3 (the shard indexer) writes into. Safe to call on every open.
pub fn ensure_collection_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS domain_shards (
            source_path TEXT NOT NULL,
            collection TEXT NOT NULL,
            year USMALLINT NOT NULL,
            shard_file TEXT NOT NULL,
            parquet_relpath TEXT NOT NULL,
            host TEXT NOT NULL,
            host_rev TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_domain_shards_host_rev ON domain_shards (host_rev);
        CREATE INDEX IF NOT EXISTS idx_domain_shards_host ON domain_shards (host);
        CREATE INDEX IF NOT EXISTS idx_domain_shards_collection ON domain_shards (collection);

        CREATE TABLE IF NOT EXISTS parquet_rowgroups (
            parquet_relpath TEXT NOT NULL,
            row_group UINTEGER NOT NULL,
            row_start UBIGINT NOT NULL,
            row_end UBIGINT NOT NULL,
            host_rev_min TEXT NOT NULL,
            host_rev_max TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rowgroups_min ON parquet_rowgroups (host_rev_min);
        CREATE INDEX IF NOT EXISTS idx_rowgroups_max ON parquet_rowgroups (host_rev_max);",
    )
    .context("failed to create collection-level schema")
}

/// Create the meta-level `domain_shards` shape written by C4: same pivot
/// column (`host_rev`) but pointing at a descendant DB by path rather than
/// a parquet shard. Used identically for collection-DB, year-DB, and
/// master-DB targets.
pub fn ensure_meta_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS domain_shards (
            host_rev TEXT NOT NULL,
            child_db_relpath TEXT NOT NULL,
            collection TEXT NOT NULL,
            year USMALLINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_meta_domain_shards_host_rev ON domain_shards (host_rev);",
    )
    .context("failed to create meta-level schema")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_collection_schema(&conn).unwrap();
        ensure_collection_schema(&conn).unwrap();
    }

    #[test]
    fn meta_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_meta_schema(&conn).unwrap();
        ensure_meta_schema(&conn).unwrap();
    }

    #[test]
    fn collection_schema_accepts_a_row() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_collection_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO domain_shards VALUES (?, ?, ?, ?, ?, ?, ?)",
            duckdb::params![
                "/ccindex/CC-MAIN-2024-33/cdx-00001.gz",
                "CC-MAIN-2024-33",
                2024u16,
                "cdx-00001.gz",
                "CC-MAIN-2024-33/cdx-00001.gz.parquet",
                "www.example.gov",
                "gov,example,www",
            ],
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM domain_shards", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
