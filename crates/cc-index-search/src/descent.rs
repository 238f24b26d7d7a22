//! The three pruning queries that walk master -> year -> collection (§4.5,
//! steps 1-3). Each returns the child locations a later step must visit;
//! none of them touches a parquet file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use cc_index_store::Layout;
use duckdb::Connection;

use crate::{HostRevRange, MatchMode};

pub fn host_rev_range(domain: &str, mode: MatchMode) -> HostRevRange {
    let hr = cc_index_core::host::reverse_host(domain);
    match mode {
        MatchMode::Exact => HostRevRange {
            lower: hr.clone(),
            upper: hr,
        },
        MatchMode::Prefix => {
            let upper = cc_index_core::host::prefix_upper_bound(&hr);
            HostRevRange { lower: hr, upper }
        }
    }
}

/// One candidate year surfaced by the master descent.
pub struct YearCandidate {
    pub year: u16,
    pub db_path: PathBuf,
}

/// Step 1: open the master DB (if present) and select candidate years.
pub fn candidate_years(
    layout: &Layout,
    range: &HostRevRange,
    year_filter: Option<u16>,
    descending: bool,
) -> Result<Vec<YearCandidate>> {
    let master_path = layout.master_db_path();
    if !master_path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open(&master_path)
        .with_context(|| format!("opening master db {}", master_path.display()))?;

    let order = if descending { "DESC" } else { "ASC" };
    let years: Vec<u16> = if let Some(y) = year_filter {
        if within_range(&conn, &range.lower, &range.upper, Some(y))? {
            vec![y]
        } else {
            Vec::new()
        }
    } else {
        let sql = format!(
            "SELECT DISTINCT year FROM domain_shards
             WHERE host_rev BETWEEN ? AND ?
             ORDER BY year {order}"
        );
        let mut stmt = conn.prepare(&sql).context("preparing master year query")?;
        stmt.query_map(duckdb::params![range.lower, range.upper], |row| row.get(0))
            .context("querying master year candidates")?
            .collect::<Result<_, _>>()
            .context("reading master year candidates")?
    };

    Ok(years
        .into_iter()
        .map(|year| YearCandidate {
            year,
            db_path: layout.year_db_path(year),
        })
        .collect())
}

fn within_range(conn: &Connection, lower: &str, upper: &str, year: Option<u16>) -> Result<bool> {
    let count: i64 = match year {
        Some(y) => conn
            .query_row(
                "SELECT COUNT(*) FROM domain_shards WHERE host_rev BETWEEN ? AND ? AND year = ?",
                duckdb::params![lower, upper, y],
                |r| r.get(0),
            )
            .context("checking year presence in master db")?,
        None => conn
            .query_row(
                "SELECT COUNT(*) FROM domain_shards WHERE host_rev BETWEEN ? AND ?",
                duckdb::params![lower, upper],
                |r| r.get(0),
            )
            .context("checking presence in master db")?,
    };
    Ok(count > 0)
}

/// One candidate collection surfaced by a year descent.
pub struct CollectionCandidate {
    pub collection: String,
    pub db_path: PathBuf,
}

/// Step 2: open a year DB and select candidate collections.
pub fn candidate_collections(
    layout: &Layout,
    year_db_path: &std::path::Path,
    range: &HostRevRange,
) -> Result<Vec<CollectionCandidate>> {
    if !year_db_path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open(year_db_path)
        .with_context(|| format!("opening year db {}", year_db_path.display()))?;

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT collection FROM domain_shards
             WHERE host_rev BETWEEN ? AND ?
             ORDER BY collection",
        )
        .context("preparing year collection query")?;
    let collections: Vec<String> = stmt
        .query_map(duckdb::params![range.lower, range.upper], |row| row.get(0))
        .context("querying year collection candidates")?
        .collect::<Result<_, _>>()
        .context("reading year collection candidates")?;

    Ok(collections
        .into_iter()
        .map(|collection| CollectionCandidate {
            db_path: layout.collection_db_path(&collection),
            collection,
        })
        .collect())
}

/// One candidate row group surfaced by a collection descent, paired with the
/// absolute parquet path it lives in.
pub struct RowGroupCandidate {
    pub parquet_path: PathBuf,
    pub row_group: u32,
    pub row_start: u64,
}

/// Step 3: open a collection DB and select candidate shards/row groups whose
/// `[host_rev_min, host_rev_max]` overlaps the query range.
pub fn candidate_row_groups(
    layout: &Layout,
    collection: &str,
    collection_db_path: &std::path::Path,
    range: &HostRevRange,
) -> Result<Vec<RowGroupCandidate>> {
    if !collection_db_path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open(collection_db_path)
        .with_context(|| format!("opening collection db {}", collection_db_path.display()))?;

    let mut stmt = conn
        .prepare(
            "SELECT parquet_relpath, row_group, row_start FROM parquet_rowgroups
             WHERE host_rev_max >= ? AND host_rev_min <= ?
             ORDER BY parquet_relpath, row_group",
        )
        .context("preparing row-group candidate query")?;
    let rows: Vec<(String, u32, u64)> = stmt
        .query_map(duckdb::params![range.lower, range.upper], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .context("querying row-group candidates")?
        .collect::<Result<_, _>>()
        .context("reading row-group candidates")?;

    Ok(rows
        .into_iter()
        .map(|(relpath, row_group, row_start)| RowGroupCandidate {
            parquet_path: layout.collection_parquet_dir(collection).join(
                std::path::Path::new(&relpath)
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new(&relpath)),
            ),
            row_group,
            row_start,
        })
        .collect())
}
