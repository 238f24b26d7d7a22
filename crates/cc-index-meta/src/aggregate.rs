//! Year-DB and master-DB rebuilds (§4.4). Both are a `UNION` over the
//! `domain_shards` tables of a set of source DBs, written atomically.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use duckdb::Connection;

use cc_index_store::ensure_meta_schema;

/// True if `target_path` is missing or older than any of `source_paths`.
/// Mirrors the ledger's mtime-based idempotence check (§9) one level up the
/// hierarchy: a year DB is stale the moment a collection DB under it changes.
pub fn should_rebuild(target_path: &Path, source_paths: &[PathBuf]) -> Result<bool> {
    let target_mtime = match std::fs::metadata(target_path) {
        Ok(meta) => meta.modified().context("reading target mtime")?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e).context("stat target db"),
    };

    for source in source_paths {
        let source_mtime = std::fs::metadata(source)
            .with_context(|| format!("stat source db {}", source.display()))?
            .modified()
            .context("reading source mtime")?;
        if source_mtime > target_mtime {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Rebuild a year DB from its constituent collection DBs. `sources` pairs
/// each collection DB path with the collection id it belongs to (the
/// collection id is already implicit in `domain_shards.collection`, but is
/// passed explicitly so an empty source DB still contributes its identity).
pub fn rebuild_year_db(sources: &[(String, PathBuf)], target_db_path: &Path) -> Result<()> {
    rebuild_meta_db(sources, target_db_path)
}

/// Rebuild the master DB from every year DB. `sources` pairs each year DB
/// path with a label (the year as a string) used only for diagnostics.
pub fn rebuild_master_db(sources: &[(String, PathBuf)], target_db_path: &Path) -> Result<()> {
    rebuild_meta_db(sources, target_db_path)
}

fn rebuild_meta_db(sources: &[(String, PathBuf)], target_db_path: &Path) -> Result<()> {
    if let Some(parent) = target_db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating parent dir for {}", target_db_path.display()))?;
    }

    let tmp_path = sibling_tmp_path(target_db_path);
    if tmp_path.exists() {
        std::fs::remove_file(&tmp_path)
            .with_context(|| format!("removing stale tmp db {}", tmp_path.display()))?;
    }

    let conn = Connection::open(&tmp_path)
        .with_context(|| format!("opening tmp db {}", tmp_path.display()))?;
    ensure_meta_schema(&conn)?;

    for (label, source_path) in sources {
        let alias = "src";
        conn.execute_batch(&format!(
            "ATTACH '{}' AS {alias} (READ_ONLY);",
            escape_sql_literal(&source_path.to_string_lossy()),
        ))
        .with_context(|| format!("attaching source db for {label} ({})", source_path.display()))?;

        let child_relpath = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| label.clone());

        conn.execute(
            "INSERT INTO domain_shards (host_rev, child_db_relpath, collection, year)
             SELECT DISTINCT host_rev, ?, collection, year FROM src.domain_shards",
            duckdb::params![child_relpath],
        )
        .with_context(|| format!("copying domain_shards from {label}"))?;

        conn.execute_batch(&format!("DETACH {alias};"))
            .with_context(|| format!("detaching source db for {label}"))?;
    }

    drop(conn);

    std::fs::rename(&tmp_path, target_db_path).with_context(|| {
        format!(
            "publishing {} over {}",
            tmp_path.display(),
            target_db_path.display()
        )
    })?;
    Ok(())
}

fn sibling_tmp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    target.with_file_name(name)
}

fn escape_sql_literal(s: &str) -> String {
    s.replace('\'', "''")
}
