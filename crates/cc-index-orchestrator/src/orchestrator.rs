//! The driver that advances every matching collection through
//! convert -> sort -> index -> meta rebuild, skipping whatever phase a
//! collection has already completed.
//!
//! Each phase function re-derives its own work list from the filesystem on
//! every call (the same "discover, don't remember" discipline the validator
//! uses) rather than carrying state between runs — a crashed or `Ctrl-C`'d
//! run picks up exactly where the disk says it left off.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use cc_index_core::budget::{disk_free_gb, effective_sort_workers, MemorySnapshot};
use cc_index_core::error::PipelineError;
use cc_index_core::heartbeat::{Heartbeat, Phase};
use cc_index_core::progress::SharedProgress;
use cc_index_core::retry::retry_with_backoff;
use cc_index_core::shutdown::is_shutdown_requested;
use cc_index_sort::{SortConfig, Tiebreak};
use cc_index_store::{Layout, PipelineConfig};
use rayon::prelude::*;

/// Spawn a background thread that polls `heartbeats` every
/// `interval_secs` and logs any worker that has gone quiet for
/// `stall_intervals * interval_secs` (§5). Stops once `done` is set.
///
/// This repository's workers are synchronous rayon tasks, not cancellable
/// async futures, so there is no safe way to actually terminate a stalled
/// task mid-shard; the watchdog surfaces the stall in the log (§7's durable
/// event log) and leaves recovery to the next orchestrator pass, which will
/// retry the shard per `max_attempts` since it never reached `SORTED`.
fn spawn_stall_watchdog(
    heartbeats: Arc<Mutex<Vec<Heartbeat>>>,
    interval_secs: u64,
    stall_intervals: u32,
    done: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    let stall_after = Duration::from_secs(interval_secs.saturating_mul(stall_intervals as u64));
    let poll_interval = Duration::from_secs(interval_secs.max(1)).min(Duration::from_secs(1));
    std::thread::spawn(move || {
        let mut last_check = std::time::Instant::now();
        while !done.load(Ordering::Relaxed) {
            std::thread::sleep(poll_interval);
            if last_check.elapsed() < Duration::from_secs(interval_secs.max(1)) {
                continue;
            }
            last_check = std::time::Instant::now();
            for hb in heartbeats.lock().unwrap().iter() {
                if hb.is_stalled(stall_after) {
                    log::warn!("stalled worker, scheduling for retry next pass: {}", hb.snapshot());
                }
            }
        }
    })
}

/// List every collection directory under `ccindex_root` matching the
/// configured filter, sorted for determinism.
pub fn discover_collections(config: &PipelineConfig) -> Result<Vec<String>> {
    let root = &config.ccindex_root;
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut collections: Vec<String> = std::fs::read_dir(root)
        .with_context(|| format!("listing {}", root.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|id| config.collection_matches(id))
        .collect();
    collections.sort();
    Ok(collections)
}

/// Drive every matching collection forward once, then rebuild the year and
/// master meta-index levels over whatever collections changed.
pub fn run_ingest(
    config: &PipelineConfig,
    layout: &Layout,
    progress: &SharedProgress,
) -> Result<Vec<String>> {
    let collections = discover_collections(config)?;

    for collection in &collections {
        if is_shutdown_requested() {
            log::info!("shutdown requested, stopping before {collection}");
            break;
        }
        layout
            .ensure_dirs(collection)
            .with_context(|| format!("creating directories for {collection}"))?;
        advance_collection(config, layout, collection, progress)
            .with_context(|| format!("advancing {collection}"))?;
    }

    if !is_shutdown_requested() {
        rebuild_meta_levels(layout, &collections)?;
    }

    Ok(collections)
}

fn advance_collection(
    config: &PipelineConfig,
    layout: &Layout,
    collection: &str,
    progress: &SharedProgress,
) -> Result<()> {
    convert_phase(config, layout, collection, progress)?;
    if is_shutdown_requested() {
        return Ok(());
    }
    sort_phase(config, layout, collection, progress)?;
    if is_shutdown_requested() {
        return Ok(());
    }
    index_phase(config, layout, collection, progress)?;
    Ok(())
}

/// Convert every downloaded shard with no corresponding columnar shard
/// yet. Runs across `max_workers` via rayon's default global pool.
///
/// Shards already marked `.quarantined` are skipped unless the source
/// `.gz` has since been re-downloaded (modified after the marker was
/// written), in which case the stale marker is cleared and the shard gets
/// another chance.
fn convert_phase(
    config: &PipelineConfig,
    layout: &Layout,
    collection: &str,
    progress: &SharedProgress,
) -> Result<()> {
    let downloaded = layout
        .list_downloaded_shards(collection)
        .with_context(|| format!("listing downloaded shards for {collection}"))?;
    let parquet_dir = layout.collection_parquet_dir(collection);

    let pending: Vec<(PathBuf, PathBuf, String)> = downloaded
        .into_iter()
        .filter_map(|gz_path| {
            let shard_file = gz_path.file_name()?.to_str()?.to_string();
            let output_path = parquet_dir.join(format!("{shard_file}.parquet"));
            if output_path.exists() {
                return None;
            }
            if !clear_stale_quarantine(layout, collection, &gz_path, &shard_file) {
                return None;
            }
            Some((gz_path, output_path, shard_file))
        })
        .collect();

    if pending.is_empty() {
        return Ok(());
    }
    log::info!("{collection}: converting {} shard(s)", pending.len());

    let heartbeats: Arc<Mutex<Vec<Heartbeat>>> = Arc::new(Mutex::new(Vec::new()));
    let watchdog_done = Arc::new(AtomicBool::new(false));
    let watchdog = spawn_stall_watchdog(
        heartbeats.clone(),
        config.heartbeat_interval_secs,
        config.stall_intervals,
        watchdog_done.clone(),
    );

    let errors: Vec<PipelineError> = pending
        .into_par_iter()
        .filter_map(|(gz_path, output_path, shard_file)| {
            if is_shutdown_requested() {
                return None;
            }
            let pb = progress.shard_bar(&shard_file);
            let hb = Heartbeat::new(Phase::Decode, collection, shard_file.clone());
            heartbeats.lock().unwrap().push(hb.clone());
            let result = retry_with_backoff(&shard_file, config.max_attempts, &pb, || {
                cc_index_codec::convert_shard(
                    &gz_path,
                    &output_path,
                    collection,
                    &shard_file,
                    config.zstd_level,
                    &pb,
                    Some(&hb),
                )
            });
            pb.finish_and_clear();
            match result {
                Ok(_) => None,
                Err(e @ PipelineError::Decode { .. }) => {
                    let message = e.to_string();
                    if let Err(io_err) = quarantine_shard(layout, collection, &shard_file, &message) {
                        log::error!("{collection}/{shard_file}: failed to write quarantine marker: {io_err}");
                        return Some(e);
                    }
                    log::warn!(
                        "{collection}/{shard_file}: QUARANTINED_SHARD, whole-shard decode failure: {message}"
                    );
                    None
                }
                Err(e) => Some(e),
            }
        })
        .collect();

    watchdog_done.store(true, Ordering::Relaxed);
    let _ = watchdog.join();

    report_phase_errors(collection, "convert", errors)
}

/// Returns `true` if `shard_file` should be attempted this pass. A shard
/// with no quarantine marker is always attempted. A quarantined shard is
/// skipped unless `gz_path`'s mtime is newer than the marker's — meaning it
/// was re-downloaded since quarantine — in which case the stale marker is
/// removed and the shard is attempted again.
fn clear_stale_quarantine(layout: &Layout, collection: &str, gz_path: &Path, shard_file: &str) -> bool {
    let marker_path = layout.quarantine_marker_path(collection, shard_file);
    let Ok(marker_meta) = std::fs::metadata(&marker_path) else {
        return true;
    };
    let gz_newer = match (std::fs::metadata(gz_path).and_then(|m| m.modified()), marker_meta.modified()) {
        (Ok(gz_mtime), Ok(marker_mtime)) => gz_mtime > marker_mtime,
        _ => false,
    };
    if !gz_newer {
        return false;
    }
    if let Err(e) = std::fs::remove_file(&marker_path) {
        log::warn!("{collection}/{shard_file}: failed to clear stale quarantine marker: {e}");
        return false;
    }
    log::info!("{collection}/{shard_file}: re-downloaded since quarantine, retrying");
    true
}

/// Write the durable `.quarantined` marker beside a shard's source `.gz`
/// (sibling tmp file, fsync, rename — the same atomic-publish pattern as
/// the sort phase's `.sorted` marker) so the validator can surface
/// `QUARANTINED_SHARD` without re-attempting the decode on every run.
fn quarantine_shard(layout: &Layout, collection: &str, shard_file: &str, reason: &str) -> std::io::Result<()> {
    let marker_path = layout.quarantine_marker_path(collection, shard_file);
    let mut tmp = marker_path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        writeln!(f, "{reason}")?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, &marker_path)
}

/// Sort every converted shard that isn't yet marked `.sorted`, with a
/// worker pool sized from current `/proc/meminfo` pressure rather than the
/// requested count outright.
fn sort_phase(
    config: &PipelineConfig,
    layout: &Layout,
    collection: &str,
    progress: &SharedProgress,
) -> Result<()> {
    let converted = layout
        .list_converted_shards(collection)
        .with_context(|| format!("listing converted shards for {collection}"))?;
    let pending: Vec<(PathBuf, String)> = converted
        .into_iter()
        .filter(|p| !cc_index_sort::is_sorted(p))
        .filter_map(|p| {
            let shard_file = p.file_name()?.to_str()?.to_string();
            Some((p, shard_file))
        })
        .collect();

    if pending.is_empty() {
        return Ok(());
    }

    wait_for_disk_backpressure(config, collection);

    let snapshot = MemorySnapshot::read(config.arc_fraction);
    let worker_count = match snapshot {
        Some(snap) => effective_sort_workers(
            &snap,
            config.sort_workers_requested,
            config.sort_reserve_gb,
            config.sort_memory_per_worker_gb,
        ),
        None => {
            log::warn!("could not read /proc/meminfo, falling back to requested sort worker count");
            config.sort_workers_requested.max(1)
        }
    };
    log::info!(
        "{collection}: sorting {} shard(s) with {worker_count} worker(s)",
        pending.len()
    );

    let spill_dir = config.parquet_root.join(".sort_spill").join(collection);
    let sort_config = SortConfig {
        memory_budget_gb: config.sort_memory_per_worker_gb,
        spill_dir,
        threads: 1,
        tiebreak: Tiebreak::None,
    };

    // rayon's thread pools are immutable once built, so a downshifted worker
    // count means building a fresh scoped pool here rather than mutating a
    // global one, unlike the convert/index phases which use the ambient pool.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()
        .context("building sort worker pool")?;

    let errors: Vec<PipelineError> = pool.install(|| {
        pending
            .into_par_iter()
            .filter_map(|(shard_path, shard_file)| {
                if is_shutdown_requested() {
                    return None;
                }
                let pb = progress.shard_bar(&shard_file);
                let result = retry_with_backoff(&shard_file, config.max_attempts, &pb, || {
                    cc_index_sort::sort_shard(&shard_path, collection, &shard_file, &sort_config)
                });
                pb.finish_and_clear();
                result.err()
            })
            .collect()
    });

    report_phase_errors(collection, "sort", errors)
}

/// Index every sorted shard into the collection DB, then (if
/// configured) delete the shard's source `.gz` now that it has a durable
/// columnar+indexed representation.
fn index_phase(
    config: &PipelineConfig,
    layout: &Layout,
    collection: &str,
    progress: &SharedProgress,
) -> Result<()> {
    let year = Layout::year_of(collection).unwrap_or(0);
    let collection_db_path = layout.collection_db_path(collection);
    let sorted: Vec<(PathBuf, String)> = layout
        .list_converted_shards(collection)
        .with_context(|| format!("listing converted shards for {collection}"))?
        .into_iter()
        .filter(|p| cc_index_sort::is_sorted(p))
        .filter_map(|p| {
            let shard_file = p.file_name()?.to_str()?.to_string();
            Some((p, shard_file))
        })
        .collect();

    if sorted.is_empty() {
        return Ok(());
    }
    log::info!("{collection}: indexing {} shard(s)", sorted.len());

    let mut errors = Vec::new();
    for (shard_path, shard_file) in sorted {
        if is_shutdown_requested() {
            break;
        }
        let parquet_relpath = format!("{collection}/{shard_file}");
        let pb = progress.shard_bar(&shard_file);
        let result = retry_with_backoff(&shard_file, config.max_attempts, &pb, || {
            cc_index_shard::index_shard(
                &shard_path,
                &collection_db_path,
                collection,
                year,
                &shard_file,
                &parquet_relpath,
            )
        });
        pb.finish_and_clear();

        match result {
            Ok(stats) => {
                if config.cleanup_source_archives && !stats.already_indexed {
                    if let Some(gz_name) = shard_file.strip_suffix(".parquet") {
                        let gz_path = layout.collection_ccindex_dir(collection).join(gz_name);
                        if let Err(e) = std::fs::remove_file(&gz_path) {
                            if e.kind() != std::io::ErrorKind::NotFound {
                                log::warn!("{collection}/{gz_name}: failed to remove source archive: {e}");
                            }
                        }
                    }
                }
            }
            Err(e) => errors.push(e),
        }
    }

    report_phase_errors(collection, "index", errors)
}

/// Rebuild every year DB whose constituent collection DBs changed, then
/// the master DB if any year DB changed.
fn rebuild_meta_levels(layout: &Layout, collections: &[String]) -> Result<()> {
    let mut years: Vec<u16> = collections.iter().filter_map(|c| Layout::year_of(c)).collect();
    years.sort_unstable();
    years.dedup();

    let mut rebuilt_years = Vec::new();
    for year in &years {
        let sources: Vec<(String, PathBuf)> = collections
            .iter()
            .filter(|c| Layout::year_of(c) == Some(*year))
            .map(|c| (c.clone(), layout.collection_db_path(c)))
            .filter(|(_, path)| path.exists())
            .collect();
        if sources.is_empty() {
            continue;
        }

        let target = layout.year_db_path(*year);
        let source_paths: Vec<PathBuf> = sources.iter().map(|(_, p)| p.clone()).collect();
        if cc_index_meta::should_rebuild(&target, &source_paths)
            .with_context(|| format!("checking staleness of year db {year}"))?
        {
            log::info!("rebuilding year db {year} from {} collection(s)", sources.len());
            cc_index_meta::rebuild_year_db(&sources, &target)
                .with_context(|| format!("rebuilding year db {year}"))?;
        }
        rebuilt_years.push((year.to_string(), target));
    }

    if rebuilt_years.is_empty() {
        return Ok(());
    }

    let master_path = layout.master_db_path();
    let year_paths: Vec<PathBuf> = rebuilt_years.iter().map(|(_, p)| p.clone()).collect();
    if cc_index_meta::should_rebuild(&master_path, &year_paths)
        .context("checking staleness of master db")?
    {
        log::info!("rebuilding master db from {} year db(s)", rebuilt_years.len());
        cc_index_meta::rebuild_master_db(&rebuilt_years, &master_path).context("rebuilding master db")?;
    }

    Ok(())
}

/// §5 backpressure: pause the sort phase while free scratch-disk space is
/// below `min_free_space_gb`, emitting `BACKPRESSURE_DISK` (via log, since
/// the validator's structured status is the durable record per §7) once per
/// stall rather than once per poll. Returns as soon as space recovers or a
/// shutdown is requested; if the free-space probe itself is unavailable
/// (non-Linux, or the path doesn't resolve to a disk `sysinfo` can see), the
/// check is skipped rather than blocking forever on an unanswerable
/// question.
fn wait_for_disk_backpressure(config: &PipelineConfig, collection: &str) {
    let mut warned = false;
    loop {
        if is_shutdown_requested() {
            return;
        }
        let Some(free_gb) = disk_free_gb(&config.parquet_root) else {
            return;
        };
        if free_gb >= config.min_free_space_gb {
            if warned {
                log::info!("{collection}: disk backpressure cleared, {free_gb:.1}GiB free");
            }
            return;
        }
        if !warned {
            log::warn!(
                "{collection}: BACKPRESSURE_DISK, {free_gb:.1}GiB free < {:.1}GiB floor, pausing sort phase",
                config.min_free_space_gb
            );
            warned = true;
        }
        std::thread::sleep(std::time::Duration::from_secs(5));
    }
}

fn report_phase_errors(collection: &str, phase: &str, errors: Vec<PipelineError>) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    for e in &errors {
        log::error!("{collection}: {phase} phase error: {e}");
    }
    anyhow::bail!(
        "{collection}: {} shard(s) failed during {phase}; see log for details",
        errors.len()
    )
}
