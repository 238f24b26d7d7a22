//! Pipeline configuration — `pipeline.toml`, the recognized options from §6.
//!
//! Layered like the teacher's `run.toml`: a file on disk, parsed with serde
//! defaults for everything, overridable per-invocation by the CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level `pipeline.toml` structure.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Where the downloader collaborator delivers CDX `.gz` shards.
    #[serde(default = "default_ccindex_root")]
    pub ccindex_root: PathBuf,

    /// Where columnar (parquet) shards live.
    #[serde(default = "default_parquet_root")]
    pub parquet_root: PathBuf,

    /// Where collection/year/master index DBs live.
    #[serde(default = "default_duckdb_root")]
    pub duckdb_root: PathBuf,

    /// Default worker-pool size (W_io, W_cpu baseline).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Minimum free memory (GiB) required to launch a worker.
    #[serde(default = "default_memory_limit_gb")]
    pub memory_limit_gb: f64,

    /// Floor (GiB) of free scratch-disk space before sort backpressure.
    #[serde(default = "default_min_free_space_gb")]
    pub min_free_space_gb: f64,

    /// Per-sort-worker memory budget (GiB); `M` in §4.2.
    #[serde(default = "default_sort_memory_per_worker_gb")]
    pub sort_memory_per_worker_gb: f64,

    /// OS-reserved headroom (GiB) subtracted from availability before
    /// computing `W_sort_effective`.
    #[serde(default = "default_sort_reserve_gb")]
    pub sort_reserve_gb: f64,

    /// Fraction of filesystem-cache memory counted as reclaimable, in [0, 1].
    #[serde(default = "default_arc_fraction")]
    pub arc_fraction: f64,

    /// Optional glob restricting operations to matching collection IDs.
    pub collections_filter: Option<String>,

    /// Whether to delete source `.gz` shards once a collection reaches SORTED.
    #[serde(default)]
    pub cleanup_source_archives: bool,

    /// zstd compression level for columnar shard writes.
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,

    /// Requested sort-worker pool size before dynamic downshift (`W_sort_requested`).
    #[serde(default = "default_sort_workers_requested")]
    pub sort_workers_requested: usize,

    /// Heartbeat interval in seconds (§5, default 30-60s).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Number of missed heartbeat intervals before a worker is considered stalled.
    #[serde(default = "default_stall_intervals")]
    pub stall_intervals: u32,

    /// Sort/index/decode retry ceiling (`max_attempts`, default 4 per §7).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_ccindex_root() -> PathBuf {
    PathBuf::from("./data/ccindex")
}
fn default_parquet_root() -> PathBuf {
    PathBuf::from("./data/parquet")
}
fn default_duckdb_root() -> PathBuf {
    PathBuf::from("./data/duckdb")
}
fn default_max_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
fn default_memory_limit_gb() -> f64 {
    2.0
}
fn default_min_free_space_gb() -> f64 {
    20.0
}
fn default_sort_memory_per_worker_gb() -> f64 {
    4.0
}
fn default_sort_reserve_gb() -> f64 {
    4.0
}
fn default_arc_fraction() -> f64 {
    0.5
}
fn default_zstd_level() -> i32 {
    3
}
fn default_sort_workers_requested() -> usize {
    default_max_workers()
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_stall_intervals() -> u32 {
    3
}
fn default_max_attempts() -> u32 {
    4
}

impl PipelineConfig {
    /// Parse `pipeline.toml` from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse pipeline config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Locate `pipeline.toml` in the user's config directory as a fallback
    /// when no explicit `--config` path is given.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "ccindex", "ccindex")
            .map(|dirs| dirs.config_dir().join("pipeline.toml"))
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.arc_fraction) {
            anyhow::bail!("arc_fraction must be in [0, 1], got {}", self.arc_fraction);
        }
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }
        if self.sort_memory_per_worker_gb <= 0.0 {
            anyhow::bail!("sort_memory_per_worker_gb must be positive");
        }
        Ok(())
    }

    /// Whether a collection ID matches the configured filter (or all, if unset).
    pub fn collection_matches(&self, collection_id: &str) -> bool {
        match &self.collections_filter {
            None => true,
            Some(pattern) => glob::Pattern::new(pattern)
                .map(|p| p.matches(collection_id))
                .unwrap_or(false),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ccindex_root: default_ccindex_root(),
            parquet_root: default_parquet_root(),
            duckdb_root: default_duckdb_root(),
            max_workers: default_max_workers(),
            memory_limit_gb: default_memory_limit_gb(),
            min_free_space_gb: default_min_free_space_gb(),
            sort_memory_per_worker_gb: default_sort_memory_per_worker_gb(),
            sort_reserve_gb: default_sort_reserve_gb(),
            arc_fraction: default_arc_fraction(),
            collections_filter: None,
            cleanup_source_archives: false,
            zstd_level: default_zstd_level(),
            sort_workers_requested: default_sort_workers_requested(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stall_intervals: default_stall_intervals(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
ccindex_root = "/data/ccindex"
parquet_root = "/data/parquet"
duckdb_root = "/data/duckdb"
"#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.ccindex_root, PathBuf::from("/data/ccindex"));
        assert_eq!(config.max_workers, default_max_workers());
    }

    #[test]
    fn rejects_arc_fraction_out_of_range() {
        let mut config = PipelineConfig::default();
        config.arc_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_workers() {
        let mut config = PipelineConfig::default();
        config.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn collection_filter_matches_glob() {
        let mut config = PipelineConfig::default();
        config.collections_filter = Some("CC-MAIN-2024-*".into());
        assert!(config.collection_matches("CC-MAIN-2024-33"));
        assert!(!config.collection_matches("CC-MAIN-2023-10"));
    }

    #[test]
    fn no_filter_matches_everything() {
        let config = PipelineConfig::default();
        assert!(config.collection_matches("CC-MAIN-2024-33"));
        assert!(config.collection_matches("anything"));
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "max_workers = 8\n").unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.max_workers, 8);
    }

    #[test]
    fn from_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "arc_fraction = 2.0\n").unwrap();
        assert!(PipelineConfig::from_file(&path).is_err());
    }
}
