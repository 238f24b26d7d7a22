//! cc-index-sort: the external-merge sorter.
//!
//! Sorts a columnar shard under a memory budget using DuckDB's native
//! `ORDER BY` (an external merge sort once the working set exceeds
//! `memory_limit`, spilling to a configured scratch directory) rather than
//! hand-rolling a merge sort, pushing the heavy lifting down into the
//! analytical engine the same way `cc-index-meta`'s hierarchical aggregation
//! does.
//!
//! Input is an unsorted shard at `P`; output replaces `P` in place (via a
//! sibling tmp file, `fsync`, then rename) and a `P.sorted` marker is written
//! atomically after the output's own fsync. A shard already marked sorted is
//! skipped in O(1) via a marker-existence check — no content is read.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cc_index_core::error::PipelineError;
use duckdb::Connection;

/// Sort-key tiebreaker: whether `digest` should break ties after
/// `(host_rev, url, ts)`. Whichever value is chosen must be applied to
/// every shard a collection ever sorts, or row ordering among ties becomes
/// inconsistent across shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tiebreak {
    /// `(host_rev, url, ts)` only, per the data model's literal sort key.
    None,
    /// `(host_rev, url, ts, digest)` — a fully deterministic total order
    /// even when two captures share identical `(host_rev, url, ts)`.
    Digest,
}

impl Tiebreak {
    fn order_by_clause(self) -> &'static str {
        match self {
            Self::None => "host_rev, url, ts",
            Self::Digest => "host_rev, url, ts, digest",
        }
    }
}

/// Resource envelope for one sort worker, computed from the pipeline config
/// and (optionally) downshifted via [`cc_index_core::budget::effective_sort_workers`]
/// before this worker was launched.
#[derive(Debug, Clone)]
pub struct SortConfig {
    pub memory_budget_gb: f64,
    pub spill_dir: PathBuf,
    pub threads: usize,
    pub tiebreak: Tiebreak,
}

#[derive(Debug)]
pub struct SortStats {
    pub rows: u64,
    /// True if the shard was already marked sorted and no work was done.
    pub already_sorted: bool,
}

/// Sort `shard_path` in place, writing `shard_path` + `.sorted` as the
/// marker. Idempotent: if the marker already exists, returns immediately
/// without touching the shard's content.
pub fn sort_shard(
    shard_path: &Path,
    collection: &str,
    shard_file: &str,
    config: &SortConfig,
) -> Result<SortStats, PipelineError> {
    let marker_path = sorted_marker_path(shard_path);
    if marker_path.exists() {
        log::debug!("{collection}/{shard_file}: already sorted, skipping");
        let rows = count_rows(shard_path, config).unwrap_or(0);
        return Ok(SortStats { rows, already_sorted: true });
    }

    fs::create_dir_all(&config.spill_dir).map_err(|e| sort_err(collection, shard_file, &e.to_string()))?;

    let tmp_path = shard_path.with_extension("parquet.sorting.tmp");
    if tmp_path.exists() {
        fs::remove_file(&tmp_path).map_err(|e| sort_err(collection, shard_file, &e.to_string()))?;
    }

    let rows = run_sort(shard_path, &tmp_path, config).map_err(|e| sort_err(collection, shard_file, &e.to_string()))?;

    // fsync the output before the rename replaces the unsorted shard — a
    // crash here must never leave P pointing at a half-written file.
    File::open(&tmp_path)
        .and_then(|f| f.sync_all())
        .map_err(|e| sort_err(collection, shard_file, &e.to_string()))?;
    fs::rename(&tmp_path, shard_path).map_err(|e| sort_err(collection, shard_file, &e.to_string()))?;

    write_marker(&marker_path).map_err(|e| sort_err(collection, shard_file, &e.to_string()))?;

    Ok(SortStats { rows, already_sorted: false })
}

/// The `.sorted` marker is the sole authoritative evidence that a shard is
/// sorted — content is never trusted without it.
pub fn sorted_marker_path(shard_path: &Path) -> PathBuf {
    let mut os = shard_path.as_os_str().to_os_string();
    os.push(".sorted");
    PathBuf::from(os)
}

pub fn is_sorted(shard_path: &Path) -> bool {
    sorted_marker_path(shard_path).exists()
}

fn run_sort(input: &Path, output: &Path, config: &SortConfig) -> Result<u64> {
    let conn = Connection::open_in_memory().context("opening duckdb connection for sort")?;
    configure(&conn, config)?;

    let order_by = config.tiebreak.order_by_clause();
    conn.execute_batch(&format!(
        "COPY (SELECT * FROM read_parquet('{}') ORDER BY {order_by}) \
         TO '{}' (FORMAT PARQUET, COMPRESSION ZSTD)",
        input.display(),
        output.display(),
    ))
    .context("sorting shard via duckdb ORDER BY")?;

    count_rows(output, config)
}

fn count_rows(path: &Path, config: &SortConfig) -> Result<u64> {
    let conn = Connection::open_in_memory().context("opening duckdb connection for row count")?;
    configure(&conn, config)?;
    conn.query_row(
        &format!("SELECT COUNT(*) FROM read_parquet('{}')", path.display()),
        [],
        |r| r.get::<_, i64>(0),
    )
    .map(|n| n as u64)
    .context("counting rows in sorted shard")
}

fn configure(conn: &Connection, config: &SortConfig) -> Result<()> {
    conn.execute_batch(&format!(
        "SET memory_limit = '{:.2}GB'; SET temp_directory = '{}'; SET threads = {};",
        config.memory_budget_gb,
        config.spill_dir.display(),
        config.threads.max(1),
    ))
    .context("configuring duckdb resource limits")
}

fn write_marker(marker_path: &Path) -> Result<()> {
    let tmp = marker_path.with_extension("sorted.tmp");
    {
        let f = File::create(&tmp).context("creating sorted-marker tmp file")?;
        f.sync_all().context("fsyncing sorted-marker tmp file")?;
    }
    fs::rename(&tmp, marker_path).context("renaming sorted-marker tmp file into place")
}

fn sort_err(collection: &str, shard: &str, message: &str) -> PipelineError {
    PipelineError::Sort {
        collection: collection.to_string(),
        shard: shard.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{RecordBatch, StringArray, UInt16Array, UInt64Array};
    use cc_index_core::schema::cdx_row_schema;
    use std::sync::Arc;

    fn write_unsorted_shard(path: &Path, hosts: &[&str]) {
        let schema = cdx_row_schema();
        let n = hosts.len();
        let batch = RecordBatch::try_new(
            Arc::new(schema.clone()),
            vec![
                Arc::new(StringArray::from(vec!["surt"; n])),
                Arc::new(StringArray::from(vec!["20240101000000"; n])),
                Arc::new(StringArray::from((0..n).map(|i| format!("https://{}/", hosts[i])).collect::<Vec<_>>())),
                Arc::new(StringArray::from(hosts.to_vec())),
                Arc::new(StringArray::from(
                    hosts.iter().map(|h| cc_index_core::host::reverse_host(h)).collect::<Vec<_>>(),
                )),
                Arc::new(UInt16Array::from(vec![Some(200); n])),
                Arc::new(StringArray::from(vec![Some("text/html"); n])),
                Arc::new(StringArray::from(vec![Some("ABC"); n])),
                Arc::new(StringArray::from(vec!["cdx-00001.gz"; n])),
                Arc::new(UInt64Array::from(vec![0u64; n])),
                Arc::new(UInt64Array::from(vec![1u64; n])),
                Arc::new(StringArray::from(vec!["CC-MAIN-2024-33"; n])),
                Arc::new(StringArray::from(vec!["cdx-00001.gz"; n])),
            ],
        )
        .unwrap();

        let mut sink = cc_index_core::sink::ParquetSink::new_at(path, &schema, 3).unwrap();
        sink.write_batch(&batch).unwrap();
        sink.finalize().unwrap();
    }

    fn test_config(dir: &Path) -> SortConfig {
        SortConfig {
            memory_budget_gb: 1.0,
            spill_dir: dir.join("spill"),
            threads: 1,
            tiebreak: Tiebreak::None,
        }
    }

    #[test]
    fn sorts_shard_in_place_and_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdx-00001.gz.parquet");
        write_unsorted_shard(&path, &["zzz.gov", "example.gov", "aaa.gov"]);

        let stats = sort_shard(&path, "CC-MAIN-2024-33", "cdx-00001.gz", &test_config(dir.path())).unwrap();
        assert_eq!(stats.rows, 3);
        assert!(!stats.already_sorted);
        assert!(is_sorted(&path));

        let conn = Connection::open_in_memory().unwrap();
        let host_revs: Vec<String> = conn
            .prepare(&format!("SELECT host_rev FROM read_parquet('{}') ORDER BY rowid", path.display()))
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let mut sorted = host_revs.clone();
        sorted.sort();
        assert_eq!(host_revs, sorted);
    }

    #[test]
    fn skips_already_sorted_shard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdx-00002.gz.parquet");
        write_unsorted_shard(&path, &["a.gov"]);
        let marker = sorted_marker_path(&path);
        std::fs::write(&marker, b"").unwrap();

        let stats = sort_shard(&path, "CC-MAIN-2024-33", "cdx-00002.gz", &test_config(dir.path())).unwrap();
        assert!(stats.already_sorted);
    }

    #[test]
    fn marker_path_appends_sorted_suffix() {
        let p = Path::new("/x/cdx-00001.gz.parquet");
        assert_eq!(sorted_marker_path(p), PathBuf::from("/x/cdx-00001.gz.parquet.sorted"));
    }
}
