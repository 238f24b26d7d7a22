//! The status validator.
//!
//! A pure function from `(collection_id, layout)` to a status record. Never
//! trusts an in-memory count or a prior run's assumptions — every number in
//! [`CollectionStatus`] comes from listing what's actually on disk or querying
//! the DuckDB files directly, so a validator run after a crash, a manual
//! `rm`, or a half-finished `rsync` reports the true state rather than a
//! stale one.

use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use cc_index_store::Layout;
use duckdb::Connection;

use crate::manifest::{read_expected_shards, ExpectedShards};
use crate::state::CollectionState;

/// One on-disk-discovered anomaly: a DB row with no backing file, a shard
/// marked sorted whose marker predates its content, etc. Surfaced rather
/// than silently repaired — repair is the orchestrator's job, not the
/// validator's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub message: String,
}

/// A full status snapshot for one collection, discovered fresh every call.
#[derive(Debug, Clone)]
pub struct CollectionStatus {
    pub collection: String,
    pub state: CollectionState,
    pub shard_count_downloaded: usize,
    pub shard_count_converted: usize,
    pub shard_count_sorted: usize,
    pub shard_count_indexed: usize,
    pub expected_shards: ExpectedShards,
    pub collection_db_present: bool,
    pub collection_db_mtime: Option<SystemTime>,
    pub year_db_present: bool,
    pub master_db_present: bool,
    pub shard_count_quarantined: usize,
    pub anomalies: Vec<Anomaly>,
}

/// Discover the current status of `collection` by listing the filesystem and
/// querying whatever DuckDB files exist. Never fabricates a count that
/// wasn't directly observed.
pub fn validate(collection: &str, layout: &Layout) -> Result<CollectionStatus> {
    let downloaded = layout
        .list_downloaded_shards(collection)
        .with_context(|| format!("listing downloaded shards for {collection}"))?;
    let converted = layout
        .list_converted_shards(collection)
        .with_context(|| format!("listing converted shards for {collection}"))?;

    let sorted_count = converted
        .iter()
        .filter(|p| {
            let marker = {
                let mut os = p.as_os_str().to_os_string();
                os.push(".sorted");
                PathBuf::from(os)
            };
            marker.exists()
        })
        .count();

    let expected_shards = read_expected_shards(&layout.collection_manifest_path(collection));

    let collection_db_path = layout.collection_db_path(collection);
    let collection_db_present = collection_db_path.exists();
    let collection_db_mtime = if collection_db_present {
        std::fs::metadata(&collection_db_path).ok().and_then(|m| m.modified().ok())
    } else {
        None
    };

    let mut anomalies = Vec::new();
    let shard_count_indexed = if collection_db_present {
        let (indexed, ghosts) = indexed_shard_count_and_ghosts(&collection_db_path, layout, collection)
            .with_context(|| format!("inspecting collection db for {collection}"))?;
        anomalies.extend(ghosts);
        indexed
    } else {
        0
    };

    let year = Layout::year_of(collection);
    let year_db_present = year.map(|y| layout.year_db_path(y).exists()).unwrap_or(false);
    let master_db_present = layout.master_db_path().exists();

    if let ExpectedShards::Known(expected) = expected_shards {
        if downloaded.len() > expected {
            anomalies.push(Anomaly {
                message: format!(
                    "{collection}: {} shards downloaded but manifest expects {expected}",
                    downloaded.len()
                ),
            });
        }
    }

    // Captured before the quarantine-visibility anomalies below are
    // appended, so a quarantined shard alone reports QUARANTINED_SHARD
    // rather than also tripping RetryableFailure.
    let has_anomalies = !anomalies.is_empty();

    let quarantined = layout
        .list_quarantined_shards(collection)
        .with_context(|| format!("listing quarantined shards for {collection}"))?;
    for marker in &quarantined {
        let shard_file = marker
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| marker.to_string_lossy().into_owned());
        anomalies.push(Anomaly {
            message: format!("{collection}/{shard_file}: QUARANTINED_SHARD, whole-shard decode failure"),
        });
    }

    let state = derive_state(
        downloaded.len(),
        converted.len(),
        sorted_count,
        shard_count_indexed,
        year_db_present,
        master_db_present,
        has_anomalies,
        quarantined.len(),
    );

    Ok(CollectionStatus {
        collection: collection.to_string(),
        state,
        shard_count_downloaded: downloaded.len(),
        shard_count_converted: converted.len(),
        shard_count_sorted: sorted_count,
        shard_count_indexed,
        expected_shards,
        collection_db_present,
        collection_db_mtime,
        year_db_present,
        master_db_present,
        shard_count_quarantined: quarantined.len(),
        anomalies,
    })
}

#[allow(clippy::too_many_arguments)]
fn derive_state(
    downloaded: usize,
    converted: usize,
    sorted: usize,
    indexed: usize,
    year_db_present: bool,
    master_db_present: bool,
    has_anomalies: bool,
    quarantined: usize,
) -> CollectionState {
    if has_anomalies {
        return CollectionState::RetryableFailure;
    }
    if quarantined > 0 {
        return CollectionState::QuarantinedShard;
    }
    if downloaded == 0 {
        return CollectionState::Unseen;
    }
    if converted < downloaded {
        return CollectionState::Downloaded;
    }
    if sorted < converted {
        return CollectionState::Converted;
    }
    if indexed < sorted {
        return CollectionState::Sorted;
    }
    if !year_db_present {
        return CollectionState::Indexed;
    }
    if !master_db_present {
        return CollectionState::MetaBuilt;
    }
    CollectionState::Complete
}

/// Count distinct indexed parquet shards and flag any whose backing file is
/// missing from the parquet directory (a "ghost" row — the shard was deleted
/// or moved after indexing without the DB being told).
fn indexed_shard_count_and_ghosts(
    collection_db_path: &std::path::Path,
    layout: &Layout,
    collection: &str,
) -> Result<(usize, Vec<Anomaly>)> {
    let conn = Connection::open(collection_db_path)
        .with_context(|| format!("opening {}", collection_db_path.display()))?;

    let relpaths: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT DISTINCT parquet_relpath FROM parquet_rowgroups")
            .context("preparing indexed-shard query")?;
        stmt.query_map([], |row| row.get(0))
            .context("querying indexed shards")?
            .collect::<Result<_, _>>()
            .context("reading indexed shards")?
    };

    let mut ghosts = Vec::new();
    for relpath in &relpaths {
        let filename = std::path::Path::new(relpath)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| relpath.clone());
        let expected_path = layout.collection_parquet_dir(collection).join(&filename);
        if !expected_path.exists() {
            ghosts.push(Anomaly {
                message: format!(
                    "{collection}: domain_shards references {relpath} but no such file exists at {}",
                    expected_path.display()
                ),
            });
        }
    }

    Ok((relpaths.len(), ghosts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_index_store::config::PipelineConfig;

    fn layout_in(dir: &std::path::Path) -> Layout {
        Layout::new(&PipelineConfig {
            ccindex_root: dir.join("ccindex"),
            parquet_root: dir.join("parquet"),
            duckdb_root: dir.join("duckdb"),
            ..Default::default()
        })
    }

    #[test]
    fn unseen_collection_has_no_shards() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let status = validate("CC-MAIN-2024-33", &layout).unwrap();
        assert_eq!(status.state, CollectionState::Unseen);
        assert_eq!(status.shard_count_downloaded, 0);
    }

    #[test]
    fn downloaded_only_shards_stay_in_downloaded_state() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let coll_dir = dir.path().join("ccindex").join("CC-MAIN-2024-33");
        std::fs::create_dir_all(&coll_dir).unwrap();
        std::fs::write(coll_dir.join("cdx-00001.gz"), b"x").unwrap();

        let status = validate("CC-MAIN-2024-33", &layout).unwrap();
        assert_eq!(status.state, CollectionState::Downloaded);
        assert_eq!(status.shard_count_downloaded, 1);
        assert_eq!(status.shard_count_converted, 0);
    }

    #[test]
    fn manifest_mismatch_reported_without_crashing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let coll_dir = dir.path().join("ccindex").join("CC-MAIN-2024-33");
        std::fs::create_dir_all(&coll_dir).unwrap();
        std::fs::write(coll_dir.join("cdx-00001.gz"), b"x").unwrap();
        std::fs::write(coll_dir.join("manifest"), b"0").unwrap();

        let status = validate("CC-MAIN-2024-33", &layout).unwrap();
        assert_eq!(status.expected_shards, ExpectedShards::Known(0));
        assert_eq!(status.anomalies.len(), 1);
    }

    #[test]
    fn ghost_db_row_flagged_as_anomaly() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let db_path = layout.collection_db_path("CC-MAIN-2024-33");
        std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
        let conn = Connection::open(&db_path).unwrap();
        cc_index_store::schema::ensure_collection_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO parquet_rowgroups VALUES (?, ?, ?, ?, ?, ?)",
            duckdb::params![
                "CC-MAIN-2024-33/cdx-00001.gz.parquet",
                0u32,
                0u64,
                1u64,
                "gov,example",
                "gov,example",
            ],
        )
        .unwrap();
        drop(conn);

        let status = validate("CC-MAIN-2024-33", &layout).unwrap();
        assert_eq!(status.shard_count_indexed, 1);
        assert_eq!(status.anomalies.len(), 1);
        assert!(status.anomalies[0].message.contains("no such file exists"));
        assert_eq!(status.state, CollectionState::RetryableFailure);
    }

    #[test]
    fn quarantined_shard_reported_distinctly_from_retryable_failure() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let coll_dir = dir.path().join("ccindex").join("CC-MAIN-2024-33");
        std::fs::create_dir_all(&coll_dir).unwrap();
        std::fs::write(coll_dir.join("cdx-00001.gz"), b"x").unwrap();
        std::fs::write(coll_dir.join("cdx-00001.gz.quarantined"), b"not a valid gzip file\n").unwrap();

        let status = validate("CC-MAIN-2024-33", &layout).unwrap();
        assert_eq!(status.state, CollectionState::QuarantinedShard);
        assert_eq!(status.shard_count_quarantined, 1);
        assert_eq!(status.anomalies.len(), 1);
        assert!(status.anomalies[0].message.contains("QUARANTINED_SHARD"));
    }

    #[test]
    fn stale_quarantine_marker_cleared_by_orchestrator_not_validator() {
        // The validator only reports what's on disk; clearing a marker once
        // the shard is re-downloaded is the orchestrator's job (convert
        // phase), so a present marker is always surfaced regardless of the
        // source gz's mtime.
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let coll_dir = dir.path().join("ccindex").join("CC-MAIN-2024-33");
        std::fs::create_dir_all(&coll_dir).unwrap();
        std::fs::write(coll_dir.join("cdx-00001.gz.quarantined"), b"x").unwrap();
        std::fs::write(coll_dir.join("cdx-00001.gz"), b"x").unwrap();

        let status = validate("CC-MAIN-2024-33", &layout).unwrap();
        assert_eq!(status.state, CollectionState::QuarantinedShard);
    }

    #[test]
    fn complete_collection_has_no_anomalies() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());

        let coll_dir = dir.path().join("ccindex").join("CC-MAIN-2024-33");
        std::fs::create_dir_all(&coll_dir).unwrap();
        std::fs::write(coll_dir.join("cdx-00001.gz"), b"x").unwrap();

        let parquet_dir = layout.collection_parquet_dir("CC-MAIN-2024-33");
        std::fs::create_dir_all(&parquet_dir).unwrap();
        let parquet_path = parquet_dir.join("cdx-00001.gz.parquet");
        std::fs::write(&parquet_path, b"x").unwrap();
        std::fs::write(layout.sorted_marker_path("CC-MAIN-2024-33", 1), b"").unwrap();

        let db_path = layout.collection_db_path("CC-MAIN-2024-33");
        std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
        let conn = Connection::open(&db_path).unwrap();
        cc_index_store::schema::ensure_collection_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO parquet_rowgroups VALUES (?, ?, ?, ?, ?, ?)",
            duckdb::params![
                "CC-MAIN-2024-33/cdx-00001.gz.parquet",
                0u32,
                0u64,
                1u64,
                "gov,example",
                "gov,example",
            ],
        )
        .unwrap();
        drop(conn);

        std::fs::create_dir_all(layout.year_db_path(2024).parent().unwrap()).unwrap();
        std::fs::write(layout.year_db_path(2024), b"").unwrap();
        std::fs::create_dir_all(layout.master_db_path().parent().unwrap()).unwrap();
        std::fs::write(layout.master_db_path(), b"").unwrap();

        let status = validate("CC-MAIN-2024-33", &layout).unwrap();
        assert!(status.anomalies.is_empty());
        assert_eq!(status.state, CollectionState::Complete);
    }
}
