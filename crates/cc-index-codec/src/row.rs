//! The CDX row type and its Arrow accumulator.

use std::sync::Arc;

use arrow::array::{RecordBatch, StringBuilder, UInt16Builder, UInt64Builder};
use arrow::datatypes::Schema;
use arrow::error::ArrowError;
use cc_index_core::accumulator::{Accumulator, DEFAULT_BATCH_SIZE};
use cc_index_core::schema::cdx_row_schema_ref;
use serde::Deserialize;

/// A single decoded CDX row, plus the two fields this shard carries
/// (`collection`, `shard_file`).
#[derive(Debug, Clone, PartialEq)]
pub struct CdxRow {
    pub surt: String,
    pub ts: String,
    pub url: String,
    pub host: String,
    pub host_rev: String,
    pub status: Option<u16>,
    pub mime: Option<String>,
    pub digest: Option<String>,
    pub warc_filename: String,
    pub warc_offset: u64,
    pub warc_length: u64,
    pub collection: String,
    pub shard_file: String,
}

/// JSON tail of a CDX line: `url, status, mime, digest, filename, offset,
/// length`. Common Crawl's CDX emits numeric-looking fields as
/// strings, so `status`/`offset`/`length` are read as strings and parsed
/// explicitly rather than relying on serde's numeric coercion.
#[derive(Debug, Deserialize)]
pub(crate) struct CdxTail {
    pub url: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    pub filename: String,
    pub offset: String,
    pub length: String,
}

/// Batch accumulator building Arrow columns for the 13-field CDX schema
/// (see `cc_index_core::schema::cdx_row_schema`).
pub struct CdxAccumulator {
    schema: Arc<Schema>,
    surt: StringBuilder,
    ts: StringBuilder,
    url: StringBuilder,
    host: StringBuilder,
    host_rev: StringBuilder,
    status: UInt16Builder,
    mime: StringBuilder,
    digest: StringBuilder,
    warc_filename: StringBuilder,
    warc_offset: UInt64Builder,
    warc_length: UInt64Builder,
    collection: StringBuilder,
    shard_file: StringBuilder,
    len: usize,
}

impl CdxAccumulator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BATCH_SIZE)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            schema: cdx_row_schema_ref(),
            surt: StringBuilder::with_capacity(cap, cap * 32),
            ts: StringBuilder::with_capacity(cap, cap * 16),
            url: StringBuilder::with_capacity(cap, cap * 64),
            host: StringBuilder::with_capacity(cap, cap * 32),
            host_rev: StringBuilder::with_capacity(cap, cap * 32),
            status: UInt16Builder::with_capacity(cap),
            mime: StringBuilder::with_capacity(cap, cap * 16),
            digest: StringBuilder::with_capacity(cap, cap * 16),
            warc_filename: StringBuilder::with_capacity(cap, cap * 32),
            warc_offset: UInt64Builder::with_capacity(cap),
            warc_length: UInt64Builder::with_capacity(cap),
            collection: StringBuilder::with_capacity(cap, cap * 16),
            shard_file: StringBuilder::with_capacity(cap, cap * 16),
            len: 0,
        }
    }
}

impl Default for CdxAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator for CdxAccumulator {
    type Row = CdxRow;

    fn push(&mut self, row: CdxRow) {
        self.surt.append_value(&row.surt);
        self.ts.append_value(&row.ts);
        self.url.append_value(&row.url);
        self.host.append_value(&row.host);
        self.host_rev.append_value(&row.host_rev);
        self.status.append_option(row.status);
        self.mime.append_option(row.mime.as_deref());
        self.digest.append_option(row.digest.as_deref());
        self.warc_filename.append_value(&row.warc_filename);
        self.warc_offset.append_value(row.warc_offset);
        self.warc_length.append_value(row.warc_length);
        self.collection.append_value(&row.collection);
        self.shard_file.append_value(&row.shard_file);
        self.len += 1;
    }

    fn len(&self) -> usize {
        self.len
    }

    fn take_batch(&mut self) -> Result<RecordBatch, ArrowError> {
        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(self.surt.finish()),
                Arc::new(self.ts.finish()),
                Arc::new(self.url.finish()),
                Arc::new(self.host.finish()),
                Arc::new(self.host_rev.finish()),
                Arc::new(self.status.finish()),
                Arc::new(self.mime.finish()),
                Arc::new(self.digest.finish()),
                Arc::new(self.warc_filename.finish()),
                Arc::new(self.warc_offset.finish()),
                Arc::new(self.warc_length.finish()),
                Arc::new(self.collection.finish()),
                Arc::new(self.shard_file.finish()),
            ],
        )?;
        self.len = 0;
        Ok(batch)
    }
}
