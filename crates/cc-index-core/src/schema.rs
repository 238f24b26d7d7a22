//! Arrow schema for the columnar CDX shard (the "columnar shard" of the data model)

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};

/// Column order is fixed; every crate that builds or reads a [`RecordBatch`]
/// against this schema indexes columns positionally against these constants.
pub mod col {
    pub const SURT: usize = 0;
    pub const TS: usize = 1;
    pub const URL: usize = 2;
    pub const HOST: usize = 3;
    pub const HOST_REV: usize = 4;
    pub const STATUS: usize = 5;
    pub const MIME: usize = 6;
    pub const DIGEST: usize = 7;
    pub const WARC_FILENAME: usize = 8;
    pub const WARC_OFFSET: usize = 9;
    pub const WARC_LENGTH: usize = 10;
    pub const COLLECTION: usize = 11;
    pub const SHARD_FILE: usize = 12;
}

/// Schema for a CDX row as stored in a columnar shard (post C1, pre- or post-sort).
pub fn cdx_row_schema() -> Schema {
    Schema::new(vec![
        Field::new("surt", DataType::Utf8, false),
        Field::new("ts", DataType::Utf8, false),
        Field::new("url", DataType::Utf8, false),
        Field::new("host", DataType::Utf8, false),
        Field::new("host_rev", DataType::Utf8, false),
        Field::new("status", DataType::UInt16, true),
        Field::new("mime", DataType::Utf8, true),
        Field::new("digest", DataType::Utf8, true),
        Field::new("warc_filename", DataType::Utf8, false),
        Field::new("warc_offset", DataType::UInt64, false),
        Field::new("warc_length", DataType::UInt64, false),
        Field::new("collection", DataType::Utf8, false),
        Field::new("shard_file", DataType::Utf8, false),
    ])
}

/// Shared `Arc` handle to the schema, for cheap cloning into `RecordBatch`/`ArrowWriter`.
pub fn cdx_row_schema_ref() -> Arc<Schema> {
    Arc::new(cdx_row_schema())
}

/// Row group size target (bounded so min/max stats stay useful, per the data model).
pub const ROW_GROUP_SIZE: usize = 100_000;
