//! `ingested_files` idempotence ledger (§3): `(path, size_bytes, mtime_ns,
//! ingested_at, rows)`, primary key `path`.
//!
//! I3 requires this table to never regress — a row lands only after the
//! shard's index rows are durably committed, so callers must insert the
//! ledger row in the *same transaction* as the index write (see C3's
//! transactional-per-shard contract). This module only provides the table
//! schema and read/write primitives; the transaction boundary is the
//! caller's (cc-index-shard, cc-index-meta).

use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use duckdb::Connection;

/// A single row of the `ingested_files` ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedFile {
    pub path: String,
    pub size_bytes: u64,
    pub mtime_ns: u64,
    pub ingested_at: String,
    pub rows: u64,
}

/// Create the `ingested_files` table if it doesn't already exist. Safe to
/// call on every connection open.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ingested_files (
            path TEXT PRIMARY KEY,
            size_bytes UBIGINT NOT NULL,
            mtime_ns UBIGINT NOT NULL,
            ingested_at TIMESTAMP NOT NULL DEFAULT now(),
            rows UBIGINT NOT NULL
        )",
    )
    .context("failed to create ingested_files table")
}

/// `(size_bytes, mtime_ns)` for a file on disk, as nanoseconds since the
/// Unix epoch — the unit the ledger stores mtime in, so a rebuild can be
/// forced with a plain `touch`.
pub fn file_fingerprint(path: &Path) -> std::io::Result<(u64, u64)> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta.modified()?;
    let mtime_ns = mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Ok((meta.len(), mtime_ns))
}

/// Whether `path` is already ingested at the given fingerprint — I4: a file
/// whose mtime has advanced past its ledger record is treated as changed
/// and must be re-ingested, not skipped.
pub fn is_current(conn: &Connection, path: &str, size_bytes: u64, mtime_ns: u64) -> Result<bool> {
    let row: Option<(u64, u64)> = conn
        .query_row(
            "SELECT size_bytes, mtime_ns FROM ingested_files WHERE path = ?",
            [path],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map(Some)
        .or_else(|e| match e {
            duckdb::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .context("failed to query ingested_files")?;

    Ok(matches!(row, Some((s, m)) if s == size_bytes && m >= mtime_ns))
}

/// Record (or update) a ledger row. Call within the same transaction as the
/// index rows it's attesting to, never before.
pub fn record(
    conn: &Connection,
    path: &str,
    size_bytes: u64,
    mtime_ns: u64,
    rows: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO ingested_files (path, size_bytes, mtime_ns, rows)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (path) DO UPDATE SET
            size_bytes = excluded.size_bytes,
            mtime_ns = excluded.mtime_ns,
            ingested_at = now(),
            rows = excluded.rows",
        duckdb::params![path, size_bytes, mtime_ns, rows],
    )
    .context("failed to record ingested_files row")?;
    Ok(())
}

/// List all ledger entries, ordered by path, for inspection/GC tooling.
pub fn list(conn: &Connection) -> Result<Vec<IngestedFile>> {
    let mut stmt = conn.prepare(
        "SELECT path, size_bytes, mtime_ns, ingested_at::VARCHAR, rows
         FROM ingested_files ORDER BY path",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(IngestedFile {
                path: r.get(0)?,
                size_bytes: r.get(1)?,
                mtime_ns: r.get(2)?,
                ingested_at: r.get(3)?,
                rows: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect ingested_files rows")?;
    Ok(rows)
}

/// Remove ledger entries whose path is no longer present on disk, returning
/// the removed paths. Used by `ccindex store gc`.
pub fn prune_missing(conn: &Connection) -> Result<Vec<String>> {
    let entries = list(conn)?;
    let mut removed = Vec::new();
    for entry in entries {
        if !Path::new(&entry.path).exists() {
            conn.execute("DELETE FROM ingested_files WHERE path = ?", [&entry.path])
                .context("failed to prune ingested_files row")?;
            removed.push(entry.path);
        }
    }
    Ok(removed)
}
