//! cc-index-codec: the CDX shard codec.
//!
//! Parses CDX lines — SURT, timestamp, JSON tail — from a gzipped shard into
//! the 13-column row schema and emits an unsorted columnar shard. Malformed
//! rows are counted, never fatal; a whole-shard decode failure (truncated or
//! non-gzip input) is reported as [`PipelineError::Decode`] so the
//! orchestrator can quarantine the shard and re-request it.

pub mod parse;
pub mod row;

use std::path::Path;

use cc_index_core::error::PipelineError;
use cc_index_core::gzip::{looks_like_gzip, open_gzip_file};
use cc_index_core::heartbeat::Heartbeat;
use cc_index_core::sink::ParquetSink;
use cc_index_core::{accumulator::process_lines, schema::cdx_row_schema};
use indicatif::ProgressBar;

pub use row::{CdxAccumulator, CdxRow};

/// Outcome of converting one `.gz` CDX shard into a columnar shard.
#[derive(Debug)]
pub struct ConvertStats {
    pub lines_scanned: usize,
    pub rows_written: usize,
    pub rows_malformed: usize,
}

/// Convert a single CDX `.gz` shard at `gz_path` into a columnar shard at
/// `output_path` (the exact final path; a sibling `.tmp` is used and
/// atomically renamed on success).
///
/// The output is never marked sorted here — only the sorter is allowed to
/// write a `.sorted` marker.
pub fn convert_shard(
    gz_path: &Path,
    output_path: &Path,
    collection: &str,
    shard_file: &str,
    zstd_level: i32,
    pb: &ProgressBar,
    heartbeat: Option<&Heartbeat>,
) -> Result<ConvertStats, PipelineError> {
    if !looks_like_gzip(gz_path).map_err(|e| decode_err(collection, shard_file, &e.to_string()))? {
        return Err(PipelineError::Decode {
            collection: collection.to_string(),
            shard: Some(shard_file.to_string()),
            message: format!("{} is not a valid gzip file (truncated or wrong format)", gz_path.display()),
        });
    }

    let (mut reader, counter, total_bytes) =
        open_gzip_file(gz_path).map_err(|e| decode_err(collection, shard_file, &e.to_string()))?;
    cc_index_core::progress::upgrade_to_bar(pb, total_bytes);
    pb.set_message("decoding...");

    let schema = cdx_row_schema();
    let mut sink = ParquetSink::new_at(output_path, &schema, zstd_level)
        .map_err(|e| decode_err(collection, shard_file, &e.to_string()))?;
    let mut acc = CdxAccumulator::new();

    let stats = process_lines(
        &mut reader,
        &counter,
        &mut acc,
        |b| sink.write_batch(b),
        |line| match parse::parse_cdx_line(line, collection, shard_file) {
            Ok(row) => Ok(Some(row)),
            Err(reason) => Err(reason),
        },
        pb,
        heartbeat,
    )
    .map_err(|e| decode_err(collection, shard_file, &e.to_string()))?;

    sink.finalize().map_err(|e| decode_err(collection, shard_file, &e.to_string()))?;

    if stats.rows_malformed > 0 {
        log::warn!(
            "{collection}/{shard_file}: {} malformed rows out of {} lines scanned",
            stats.rows_malformed,
            stats.lines_scanned
        );
    }

    Ok(ConvertStats {
        lines_scanned: stats.lines_scanned,
        rows_written: stats.rows_written,
        rows_malformed: stats.rows_malformed,
    })
}

fn decode_err(collection: &str, shard_file: &str, message: &str) -> PipelineError {
    PipelineError::Decode {
        collection: collection.to_string(),
        shard: Some(shard_file.to_string()),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_gz_shard(path: &Path, lines: &[&str]) {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let file = std::fs::File::create(path).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        for line in lines {
            writeln!(enc, "{line}").unwrap();
        }
        enc.finish().unwrap();
    }

    #[test]
    fn converts_valid_shard_and_counts_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("cdx-00001.gz");
        write_gz_shard(
            &gz_path,
            &[
                r#"gov,example)/ 20240101000000 {"url": "https://example.gov/", "status": "200", "filename": "cdx-00001.gz", "offset": "0", "length": "512"}"#,
                "not a valid cdx line at all",
                r#"gov,example,www)/ 20240102000000 {"url": "https://www.example.gov/", "status": "200", "filename": "cdx-00001.gz", "offset": "512", "length": "256"}"#,
            ],
        );
        let out_path = dir.path().join("cdx-00001.gz.parquet");
        let pb = ProgressBar::hidden();

        let stats = convert_shard(&gz_path, &out_path, "CC-MAIN-2024-33", "cdx-00001.gz", 3, &pb, None)
            .unwrap();

        assert_eq!(stats.lines_scanned, 3);
        assert_eq!(stats.rows_written, 2);
        assert_eq!(stats.rows_malformed, 1);
        assert!(out_path.exists());
        assert!(cc_index_core::sink::is_valid_parquet(&out_path));
        assert!(!dir.path().join("cdx-00001.gz.parquet.tmp").exists());
    }

    #[test]
    fn non_gzip_input_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("cdx-00002.gz");
        std::fs::write(&gz_path, b"plain text, not gzip").unwrap();
        let out_path = dir.path().join("cdx-00002.gz.parquet");
        let pb = ProgressBar::hidden();

        let err = convert_shard(&gz_path, &out_path, "CC-MAIN-2024-33", "cdx-00002.gz", 3, &pb, None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
        assert!(!err.is_retryable(), "whole-shard decode failures quarantine instead of retrying");
    }
}
