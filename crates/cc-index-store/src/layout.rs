//! On-disk layout contract (§6): path builders over the three configured
//! roots. Nothing here touches the filesystem except `ensure_dirs` — every
//! other method is a pure path computation, so callers can reason about
//! layout without performing I/O.

use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;

/// Resolves collection/shard/year identifiers to concrete paths under the
/// three configured roots.
#[derive(Debug, Clone)]
pub struct Layout {
    ccindex_root: PathBuf,
    parquet_root: PathBuf,
    duckdb_root: PathBuf,
}

impl Layout {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            ccindex_root: config.ccindex_root.clone(),
            parquet_root: config.parquet_root.clone(),
            duckdb_root: config.duckdb_root.clone(),
        }
    }

    /// Create every root and collection-specific subdirectory this layout
    /// will write into. Idempotent.
    pub fn ensure_dirs(&self, collection: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.collection_ccindex_dir(collection))?;
        std::fs::create_dir_all(self.collection_parquet_dir(collection))?;
        std::fs::create_dir_all(self.collection_db_dir())?;
        std::fs::create_dir_all(self.year_db_dir())?;
        Ok(())
    }

    pub fn collection_ccindex_dir(&self, collection: &str) -> PathBuf {
        self.ccindex_root.join(collection)
    }

    pub fn collection_parquet_dir(&self, collection: &str) -> PathBuf {
        self.parquet_root.join(collection)
    }

    /// `CCINDEX_ROOT/<COLLECTION>/cdx-NNNNN.gz`
    pub fn shard_gz_path(&self, collection: &str, shard_idx: usize) -> PathBuf {
        self.collection_ccindex_dir(collection)
            .join(format!("cdx-{shard_idx:05}.gz"))
    }

    /// `CCINDEX_ROOT/<COLLECTION>/manifest`
    pub fn collection_manifest_path(&self, collection: &str) -> PathBuf {
        self.collection_ccindex_dir(collection).join("manifest")
    }

    /// `PARQUET_ROOT/<COLLECTION>/cdx-NNNNN.gz.parquet`
    pub fn shard_parquet_path(&self, collection: &str, shard_idx: usize) -> PathBuf {
        self.collection_parquet_dir(collection)
            .join(format!("cdx-{shard_idx:05}.gz.parquet"))
    }

    /// `PARQUET_ROOT/<COLLECTION>/cdx-NNNNN.gz.parquet.sorted`
    pub fn sorted_marker_path(&self, collection: &str, shard_idx: usize) -> PathBuf {
        let mut p = self.shard_parquet_path(collection, shard_idx).into_os_string();
        p.push(".sorted");
        PathBuf::from(p)
    }

    pub fn is_sorted(&self, collection: &str, shard_idx: usize) -> bool {
        self.sorted_marker_path(collection, shard_idx).exists()
    }

    fn collection_db_dir(&self) -> PathBuf {
        self.duckdb_root.join("cc_pointers_by_collection")
    }

    fn year_db_dir(&self) -> PathBuf {
        self.duckdb_root.join("cc_pointers_by_year")
    }

    /// `DUCKDB_ROOT/cc_pointers_by_collection/<COLLECTION>.duckdb`
    pub fn collection_db_path(&self, collection: &str) -> PathBuf {
        self.collection_db_dir().join(format!("{collection}.duckdb"))
    }

    /// `DUCKDB_ROOT/cc_pointers_by_year/<YYYY>.duckdb`
    pub fn year_db_path(&self, year: u16) -> PathBuf {
        self.year_db_dir().join(format!("{year}.duckdb"))
    }

    /// `DUCKDB_ROOT/cc_pointers_master/master.duckdb`
    pub fn master_db_path(&self) -> PathBuf {
        self.duckdb_root.join("cc_pointers_master").join("master.duckdb")
    }

    /// Derive the 4-digit year from a collection id like `CC-MAIN-2024-33`.
    pub fn year_of(collection: &str) -> Option<u16> {
        collection.split('-').nth(2)?.parse().ok()
    }

    /// List shard `.gz` paths actually present on disk for a collection,
    /// sorted by filename. Used by the validator, which discovers by
    /// listing rather than trusting an in-memory count.
    pub fn list_downloaded_shards(&self, collection: &str) -> std::io::Result<Vec<PathBuf>> {
        list_matching(&self.collection_ccindex_dir(collection), "gz")
    }

    /// List converted (parquet) shard paths present on disk for a collection.
    pub fn list_converted_shards(&self, collection: &str) -> std::io::Result<Vec<PathBuf>> {
        list_matching(&self.collection_parquet_dir(collection), "parquet")
    }

    /// `CCINDEX_ROOT/<COLLECTION>/cdx-NNNNN.gz.quarantined` — the durable
    /// marker a whole-shard decode failure leaves beside the source `.gz`
    /// (§4.1, §4.6 `QUARANTINED_SHARD`). Its existence, not an in-memory
    /// flag, is what excludes the shard from further phases.
    pub fn quarantine_marker_path(&self, collection: &str, shard_file: &str) -> PathBuf {
        self.collection_ccindex_dir(collection)
            .join(format!("{shard_file}.quarantined"))
    }

    /// List quarantine markers present for a collection, one per shard
    /// whose whole-file decode failed and hasn't since been re-downloaded.
    pub fn list_quarantined_shards(&self, collection: &str) -> std::io::Result<Vec<PathBuf>> {
        list_matching(&self.collection_ccindex_dir(collection), "quarantined")
    }
}

fn list_matching(dir: &Path, ext: &str) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    entries.sort();
    Ok(entries)
}
