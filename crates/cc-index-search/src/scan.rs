//! Step 4 of the descent (§4.5): scan one candidate row group, filtering to
//! rows whose `host_rev` satisfies the query predicate and stopping early
//! once a sorted shard's rows fall past the upper bound.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{StringArray, UInt64Array};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::{HostRevRange, Pointer};

const PROJECTED_COLS: &[&str] = &[
    "host_rev",
    "url",
    "ts",
    "warc_filename",
    "warc_offset",
    "warc_length",
    "collection",
];

/// Read every row of row group `row_group` in `parquet_path` that falls
/// within `range`, in file order. Returns as soon as `host_rev` sorts past
/// `range.upper`, since the shard is globally sorted by `host_rev`.
pub fn scan_row_group(parquet_path: &Path, row_group: usize, range: &HostRevRange) -> Result<Vec<Pointer>> {
    let file = std::fs::File::open(parquet_path)
        .with_context(|| format!("opening {}", parquet_path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("building arrow reader")?
        .with_row_groups(vec![row_group]);

    let arrow_schema = builder.schema().clone();
    let indices: Vec<usize> = PROJECTED_COLS
        .iter()
        .map(|name| {
            arrow_schema
                .index_of(name)
                .with_context(|| format!("schema missing {name} column"))
        })
        .collect::<Result<_>>()?;
    let mask = ProjectionMask::leaves(builder.parquet_schema(), indices);
    let reader = builder.with_projection(mask).build().context("building record batch reader")?;

    let mut out = Vec::new();
    'batches: for batch in reader {
        let batch = batch.context("reading record batch")?;
        let col = |name: &str| -> Result<Arc<dyn arrow::array::Array>> {
            Ok(batch
                .column(batch.schema().index_of(name).with_context(|| format!("batch missing {name}"))?)
                .clone())
        };
        let host_rev_col = col("host_rev")?;
        let host_rev_col = host_rev_col
            .as_any()
            .downcast_ref::<StringArray>()
            .context("host_rev is not utf8")?;
        let url_col = col("url")?;
        let url_col = url_col.as_any().downcast_ref::<StringArray>().context("url is not utf8")?;
        let ts_col = col("ts")?;
        let ts_col = ts_col.as_any().downcast_ref::<StringArray>().context("ts is not utf8")?;
        let warc_filename_col = col("warc_filename")?;
        let warc_filename_col = warc_filename_col
            .as_any()
            .downcast_ref::<StringArray>()
            .context("warc_filename is not utf8")?;
        let warc_offset_col = col("warc_offset")?;
        let warc_offset_col = warc_offset_col
            .as_any()
            .downcast_ref::<UInt64Array>()
            .context("warc_offset is not u64")?;
        let warc_length_col = col("warc_length")?;
        let warc_length_col = warc_length_col
            .as_any()
            .downcast_ref::<UInt64Array>()
            .context("warc_length is not u64")?;
        let collection_col = col("collection")?;
        let collection_col = collection_col
            .as_any()
            .downcast_ref::<StringArray>()
            .context("collection is not utf8")?;

        for i in 0..batch.num_rows() {
            let host_rev = host_rev_col.value(i);
            if host_rev > range.upper.as_str() {
                // Sorted ascending within the row group: nothing past this
                // point can fall back into range.
                break 'batches;
            }
            if host_rev < range.lower.as_str() {
                continue;
            }
            out.push(Pointer {
                url: url_col.value(i).to_string(),
                ts: ts_col.value(i).to_string(),
                warc_filename: warc_filename_col.value(i).to_string(),
                warc_offset: warc_offset_col.value(i),
                warc_length: warc_length_col.value(i),
                collection: collection_col.value(i).to_string(),
            });
        }
    }
    Ok(out)
}
