//! `ccindex config` — dump the effective configuration.

use anyhow::Result;

use cc_index_store::PipelineConfig;

pub fn run(config: &PipelineConfig) -> Result<()> {
    println!("ccindex_root:              {}", config.ccindex_root.display());
    println!("parquet_root:              {}", config.parquet_root.display());
    println!("duckdb_root:               {}", config.duckdb_root.display());
    println!("max_workers:               {}", config.max_workers);
    println!("memory_limit_gb:           {}", config.memory_limit_gb);
    println!("min_free_space_gb:         {}", config.min_free_space_gb);
    println!("sort_memory_per_worker_gb: {}", config.sort_memory_per_worker_gb);
    println!("sort_reserve_gb:           {}", config.sort_reserve_gb);
    println!("arc_fraction:              {}", config.arc_fraction);
    println!(
        "collections_filter:        {}",
        config.collections_filter.as_deref().unwrap_or("(none)")
    );
    println!("cleanup_source_archives:   {}", config.cleanup_source_archives);
    println!("zstd_level:                {}", config.zstd_level);
    println!("sort_workers_requested:    {}", config.sort_workers_requested);
    println!("heartbeat_interval_secs:   {}", config.heartbeat_interval_secs);
    println!("stall_intervals:           {}", config.stall_intervals);
    println!("max_attempts:              {}", config.max_attempts);
    Ok(())
}
