//! cc-index-search: C5, the search engine (§4.5).
//!
//! `search()` walks master -> year -> collection -> row group, pruning by
//! `host_rev` range at every level, and returns a lazy iterator over
//! [`Pointer`] rows for the final, most expensive step (opening a parquet
//! row group). The first three steps are cheap DuckDB range queries and run
//! eagerly when the iterator is constructed; the row-group scans they
//! surface run one at a time as the caller pulls from the iterator, so a
//! caller that takes only `limit` results or drops the iterator early never
//! pays for row groups beyond what it consumed.

mod descent;
mod scan;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use cc_index_store::Layout;

/// Exact domain match, or prefix match covering every subdomain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Prefix,
}

/// A `(lower, upper)` bound on `host_rev`, inclusive on both ends (the upper
/// bound for a prefix query already has `prefix_upper_bound` applied).
#[derive(Debug, Clone)]
pub struct HostRevRange {
    pub lower: String,
    pub upper: String,
}

/// A single resolved capture: enough to fetch its WARC bytes via range
/// request (§6).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Pointer {
    pub url: String,
    pub ts: String,
    pub warc_filename: String,
    pub warc_offset: u64,
    pub warc_length: u64,
    pub collection: String,
}

/// Year descent order. Default is descending: recent captures arrive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearOrder {
    Descending,
    Ascending,
}

impl Default for YearOrder {
    fn default() -> Self {
        Self::Descending
    }
}

/// A search request (§6 query interface).
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub domain: String,
    pub mode: MatchMode,
    pub year_filter: Option<u16>,
    pub limit: Option<usize>,
    pub year_order: YearOrder,
}

impl SearchQuery {
    pub fn new(domain: impl Into<String>, mode: MatchMode) -> Self {
        Self {
            domain: domain.into(),
            mode,
            year_filter: None,
            limit: None,
            year_order: YearOrder::default(),
        }
    }

    pub fn year_filter(mut self, year: u16) -> Self {
        self.year_filter = Some(year);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ascending_years(mut self) -> Self {
        self.year_order = YearOrder::Ascending;
        self
    }
}

/// One row group queued for scanning, in visit order.
struct ScanJob {
    parquet_path: std::path::PathBuf,
    row_group: usize,
}

/// Run the pruned descent (§4.5 steps 1-3) and return a lazy iterator over
/// its pointers (step 4). Cancellation is checked before every row group is
/// opened: once `cancel` reads true, the iterator yields nothing further.
pub fn search<'a>(layout: &Layout, query: &SearchQuery, cancel: &'a AtomicBool) -> Result<SearchResults<'a>> {
    let range = descent::host_rev_range(&query.domain, query.mode);
    let descending = matches!(query.year_order, YearOrder::Descending);

    let years = descent::candidate_years(layout, &range, query.year_filter, descending)?;

    let mut jobs = VecDeque::new();
    for year in &years {
        let collections = descent::candidate_collections(layout, &year.db_path, &range)?;
        for collection in &collections {
            let row_groups =
                descent::candidate_row_groups(layout, &collection.collection, &collection.db_path, &range)?;
            for rg in row_groups {
                jobs.push_back(ScanJob {
                    parquet_path: rg.parquet_path,
                    row_group: rg.row_group as usize,
                });
            }
        }
    }

    log::debug!(
        "search({}): {} candidate row groups across {} candidate years",
        query.domain,
        jobs.len(),
        years.len(),
    );

    Ok(SearchResults {
        range,
        jobs,
        buffered: VecDeque::new(),
        cancel,
        limit_remaining: query.limit,
        done: false,
    })
}

/// Lazy sequence of [`Pointer`]s produced by [`search`]. Each `next()` call
/// either drains an already-scanned row group's buffer or opens the next
/// candidate row group.
pub struct SearchResults<'a> {
    range: HostRevRange,
    jobs: VecDeque<ScanJob>,
    buffered: VecDeque<Pointer>,
    cancel: &'a AtomicBool,
    limit_remaining: Option<usize>,
    done: bool,
}

impl Iterator for SearchResults<'_> {
    type Item = Result<Pointer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(0) = self.limit_remaining {
            self.done = true;
            return None;
        }

        loop {
            if let Some(p) = self.buffered.pop_front() {
                if let Some(remaining) = &mut self.limit_remaining {
                    *remaining -= 1;
                }
                return Some(Ok(p));
            }

            if self.cancel.load(Ordering::Relaxed) {
                self.done = true;
                return None;
            }

            let job = match self.jobs.pop_front() {
                Some(job) => job,
                None => {
                    self.done = true;
                    return None;
                }
            };

            match scan::scan_row_group(&job.parquet_path, job.row_group, &self.range) {
                Ok(rows) => {
                    self.buffered.extend(rows);
                    continue;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Consume a search result stream and return it sorted by `(collection,
/// url, ts)` — the "total ordering" a caller can request instead of the
/// cheaper shard-visit order (§4.5).
pub fn total_order(results: impl Iterator<Item = Result<Pointer>>) -> Result<Vec<Pointer>> {
    let mut pointers: Vec<Pointer> = results.collect::<Result<_>>()?;
    pointers.sort_by(|a, b| (&a.collection, &a.url, &a.ts).cmp(&(&b.collection, &b.url, &b.ts)));
    Ok(pointers)
}
