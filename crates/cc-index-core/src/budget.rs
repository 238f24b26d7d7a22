//! Dynamic worker-sizing protocol (§5, §9): memory probes, swap probes, and
//! the reclaimable-cache fraction are part of the worker-launch contract,
//! not an ops afterthought. [`MemorySnapshot`] is read fresh before every
//! worker-pool build; [`effective_sort_workers`] is the pure function that
//! turns a snapshot into `W_sort_effective`.

/// A point-in-time read of system memory, in GiB. Parsed from `/proc/meminfo`
/// on Linux; callers on other platforms (or in tests) construct this by hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySnapshot {
    pub mem_available_gb: f64,
    pub swap_free_gb: f64,
    /// Page cache (`Cached` in `/proc/meminfo`), in GiB. The kernel already
    /// folds an estimate of this into `mem_available_gb`; `reclaimable_gb`
    /// re-discounts it by `arc_fraction` rather than trusting the kernel's
    /// assumption that all of it is reclaimable on demand.
    pub cached_gb: f64,
    /// Fraction of filesystem-cache memory counted as reclaimable
    /// (`arc_fraction` from the pipeline config).
    pub arc_fraction: f64,
}

/// Swap-free floor below which the sort pool is capped aggressively
/// regardless of how much `MemAvailable` would otherwise allow (§5).
const LOW_SWAP_THRESHOLD_GB: f64 = 1.0;

/// Aggressive cap applied when swap-free drops below [`LOW_SWAP_THRESHOLD_GB`].
const LOW_SWAP_CAP: usize = 2;

impl MemorySnapshot {
    /// Read `/proc/meminfo` for `MemAvailable`, `SwapFree`, and `Cached`.
    /// Returns `None` if the file is unreadable or `MemAvailable`/`SwapFree`
    /// are missing (e.g. non-Linux); `Cached` defaults to 0 if absent so a
    /// missing field degrades to the pre-cache-aware behavior rather than
    /// failing the whole read.
    pub fn read(arc_fraction: f64) -> Option<Self> {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        let mem_available_kb = meminfo_field(&content, "MemAvailable:")?;
        let swap_free_kb = meminfo_field(&content, "SwapFree:")?;
        let cached_kb = meminfo_field(&content, "Cached:").unwrap_or(0.0);
        Some(Self {
            mem_available_gb: mem_available_kb / (1024.0 * 1024.0),
            swap_free_gb: swap_free_kb / (1024.0 * 1024.0),
            cached_gb: cached_kb / (1024.0 * 1024.0),
            arc_fraction,
        })
    }

    /// Reclaimable memory, after reserving `reserve_gb` for the OS and other
    /// processes. `mem_available_gb` already folds the kernel's own page
    /// cache estimate in at face value; here the cache portion is split back
    /// out and re-scaled by `arc_fraction` so a conservative operator can
    /// discount it instead of trusting every cached page to free
    /// instantly under pressure. Never negative.
    fn reclaimable_gb(&self, reserve_gb: f64) -> f64 {
        let true_free = (self.mem_available_gb - self.cached_gb).max(0.0);
        let reclaimable_cache = self.cached_gb * self.arc_fraction;
        (true_free + reclaimable_cache - reserve_gb).max(0.0)
    }
}

/// Compute `W_sort_effective` per §4.2/§5:
///
/// `W_sort_effective = max(1, floor((MemAvailable - Reserve) / MemPerSortWorker))`
///
/// capped by `requested`, and capped aggressively (default 2) if
/// `swap_free_gb` is below the low-swap threshold.
pub fn effective_sort_workers(
    snapshot: &MemorySnapshot,
    requested: usize,
    reserve_gb: f64,
    mem_per_worker_gb: f64,
) -> usize {
    if mem_per_worker_gb <= 0.0 {
        return requested.max(1);
    }
    let reclaimable = snapshot.reclaimable_gb(reserve_gb);
    let by_memory = (reclaimable / mem_per_worker_gb).floor() as i64;
    let mut effective = by_memory.max(1) as usize;
    effective = effective.min(requested.max(1));

    if snapshot.swap_free_gb < LOW_SWAP_THRESHOLD_GB {
        effective = effective.min(LOW_SWAP_CAP);
        log::warn!(
            "swap_free={:.2}GiB below {:.2}GiB threshold, capping sort pool to {}",
            snapshot.swap_free_gb,
            LOW_SWAP_THRESHOLD_GB,
            effective
        );
    }

    effective.max(1)
}

/// Parse a `Key:    12345 kB` line out of `/proc/meminfo` content, returning
/// the value in kB.
fn meminfo_field(content: &str, key: &str) -> Option<f64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?;
        rest.trim().split_whitespace().next()?.parse::<f64>().ok()
    })
}

/// Free space (GiB) on the filesystem backing `path`'s nearest existing
/// ancestor, for the §5 scratch-disk backpressure check. Walks up from
/// `path` until it finds a directory that exists (a scratch dir may not be
/// created yet), then picks the disk whose mount point is the longest
/// prefix match — the same approach `df` uses.
pub fn disk_free_gb(path: &std::path::Path) -> Option<f64> {
    let existing = path.ancestors().find(|p| p.exists())?;
    let resolved = existing.canonicalize().ok()?;

    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut best: Option<(&std::path::Path, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if resolved.starts_with(mount) {
            let better = match best {
                Some((current, _)) => mount.as_os_str().len() > current.as_os_str().len(),
                None => true,
            };
            if better {
                best = Some((mount, disk.available_space()));
            }
        }
    }
    best.map(|(_, bytes)| bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(mem_available_gb: f64, swap_free_gb: f64) -> MemorySnapshot {
        MemorySnapshot {
            mem_available_gb,
            swap_free_gb,
            cached_gb: 0.0,
            arc_fraction: 0.5,
        }
    }

    #[test]
    fn oom_downshift_scenario_from_spec() {
        // §8 scenario 6: W_sort_requested=8, sort_memory_per_worker_gb=12,
        // available memory 40 GiB, default reserve 4 GiB -> W_sort_effective=3.
        let snap = snapshot(40.0, 10.0);
        let effective = effective_sort_workers(&snap, 8, 4.0, 12.0);
        assert_eq!(effective, 3);
    }

    #[test]
    fn never_below_one() {
        let snap = snapshot(1.0, 10.0);
        let effective = effective_sort_workers(&snap, 8, 4.0, 12.0);
        assert_eq!(effective, 1);
    }

    #[test]
    fn capped_by_requested() {
        let snap = snapshot(400.0, 10.0);
        let effective = effective_sort_workers(&snap, 4, 4.0, 1.0);
        assert_eq!(effective, 4);
    }

    #[test]
    fn low_swap_caps_aggressively() {
        let snap = snapshot(400.0, 0.1);
        let effective = effective_sort_workers(&snap, 16, 4.0, 1.0);
        assert_eq!(effective, LOW_SWAP_CAP);
    }

    #[test]
    fn zero_memory_per_worker_falls_back_to_requested() {
        let snap = snapshot(40.0, 10.0);
        let effective = effective_sort_workers(&snap, 5, 4.0, 0.0);
        assert_eq!(effective, 5);
    }

    #[test]
    fn meminfo_field_parses_kb_value() {
        let content = "MemTotal:       16384000 kB\nMemAvailable:    8192000 kB\nSwapFree:        2048000 kB\n";
        assert_eq!(meminfo_field(content, "MemAvailable:"), Some(8192000.0));
        assert_eq!(meminfo_field(content, "SwapFree:"), Some(2048000.0));
    }

    #[test]
    fn meminfo_field_missing_key() {
        let content = "MemTotal:       16384000 kB\n";
        assert_eq!(meminfo_field(content, "MemAvailable:"), None);
    }

    #[test]
    fn meminfo_field_parses_cached_value() {
        let content = "MemAvailable:    8192000 kB\nCached:          4096000 kB\n";
        assert_eq!(meminfo_field(content, "Cached:"), Some(4096000.0));
    }

    #[test]
    fn arc_fraction_discounts_cache_portion_of_available_memory() {
        // 40 GiB available, of which 20 GiB is page cache. At
        // arc_fraction=1.0 the cache counts in full, matching plain
        // MemAvailable; at arc_fraction=0.0 only the non-cache 20 GiB
        // counts. The two must differ for arc_fraction to be doing
        // anything.
        let full_trust = MemorySnapshot {
            mem_available_gb: 40.0,
            swap_free_gb: 10.0,
            cached_gb: 20.0,
            arc_fraction: 1.0,
        };
        let no_trust = MemorySnapshot {
            mem_available_gb: 40.0,
            swap_free_gb: 10.0,
            cached_gb: 20.0,
            arc_fraction: 0.0,
        };
        assert_eq!(full_trust.reclaimable_gb(0.0), 40.0);
        assert_eq!(no_trust.reclaimable_gb(0.0), 20.0);
        assert!(full_trust.reclaimable_gb(0.0) > no_trust.reclaimable_gb(0.0));
    }

    #[test]
    fn disk_free_gb_resolves_for_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let free = disk_free_gb(dir.path());
        assert!(free.is_none() || free.unwrap() >= 0.0);
    }

    #[test]
    fn disk_free_gb_walks_up_to_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not/yet/created");
        let free = disk_free_gb(&missing);
        assert!(free.is_none() || free.unwrap() >= 0.0);
    }
}
