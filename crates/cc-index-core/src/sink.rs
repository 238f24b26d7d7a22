//! Output sink — buffered Parquet writer with atomic tmp-then-rename publish

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// Buffered parquet writer with atomic tmp→rename
pub struct ParquetSink {
    writer: ArrowWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl ParquetSink {
    /// Create a new sink writing to a temporary file, deriving the filename
    /// from a dataset/shard-index pair.
    pub fn new(
        dataset: &str,
        shard_idx: usize,
        output_dir: &Path,
        schema: &Schema,
        zstd_level: i32,
    ) -> Result<Self, std::io::Error> {
        let filename = format!("{dataset}_{shard_idx:04}.parquet");
        Self::new_at(&output_dir.join(filename), schema, zstd_level)
    }

    /// Create a new sink writing to an exact final path (e.g. the layout's
    /// `shard_parquet_path`), via a sibling `.tmp` file in the same
    /// directory so the publish-time rename stays on one filesystem.
    pub fn new_at(
        final_path: &Path,
        schema: &Schema,
        zstd_level: i32,
    ) -> Result<Self, std::io::Error> {
        let final_path = final_path.to_path_buf();
        let mut tmp_name = final_path
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "final_path has no filename"))?
            .to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = final_path.with_file_name(tmp_name);

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        let level = ZstdLevel::try_new(zstd_level)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(crate::schema::ROW_GROUP_SIZE)
            .build();

        let writer = ArrowWriter::try_new(file, Arc::new(schema.clone()), Some(props))
            .map_err(std::io::Error::other)?;

        Ok(Self {
            writer,
            tmp_path,
            final_path,
            row_count: 0,
        })
    }

    /// Write a record batch
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), std::io::Error> {
        self.row_count += batch.num_rows();
        self.writer.write(batch).map_err(std::io::Error::other)
    }

    /// Finalize: flush footer, fsync the tmp file, then atomically rename tmp → final.
    ///
    /// The fsync happens before the rename, not after, so a crash can never
    /// leave `final_path` pointing at a file whose footer didn't make it to
    /// disk — the rename is the only step allowed to be torn by a crash.
    pub fn finalize(self) -> Result<usize, std::io::Error> {
        let row_count = self.row_count;
        self.writer.close().map_err(std::io::Error::other)?;
        File::open(&self.tmp_path)?.sync_all()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(row_count)
    }
}

/// Check if a completed parquet file exists and has a valid footer
pub fn is_valid_parquet(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    parquet::file::reader::SerializedFileReader::new(file).is_ok()
}

/// Remove stale .tmp files in the output directory
pub fn cleanup_tmp_files(output_dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn is_valid_parquet_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(!is_valid_parquet(&dir.path().join("nope.parquet")));
    }

    #[test]
    fn is_valid_parquet_not_parquet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.parquet");
        std::fs::write(&path, b"this is not parquet").unwrap();
        assert!(!is_valid_parquet(&path));
    }

    #[test]
    fn is_valid_parquet_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.parquet");
        std::fs::write(&path, b"").unwrap();
        assert!(!is_valid_parquet(&path));
    }

    #[test]
    fn is_valid_parquet_real_file() {
        let dir = TempDir::new().unwrap();
        let schema = arrow::datatypes::Schema::new(vec![arrow::datatypes::Field::new(
            "id",
            arrow::datatypes::DataType::Int64,
            false,
        )]);
        let batch = arrow::array::RecordBatch::try_new(
            std::sync::Arc::new(schema.clone()),
            vec![std::sync::Arc::new(arrow::array::Int64Array::from(vec![
                1, 2, 3,
            ]))],
        )
        .unwrap();

        let path = dir.path().join("valid.parquet");
        let file = File::create(&path).unwrap();
        let mut writer =
            parquet::arrow::ArrowWriter::try_new(file, std::sync::Arc::new(schema), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        assert!(is_valid_parquet(&path));
    }

    #[test]
    fn cleanup_tmp_files_removes_only_tmp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.tmp"), b"stale").unwrap();
        std::fs::write(dir.path().join("b.parquet"), b"keep").unwrap();
        std::fs::write(dir.path().join("c.tmp"), b"stale2").unwrap();

        cleanup_tmp_files(dir.path()).unwrap();

        assert!(!dir.path().join("a.tmp").exists());
        assert!(dir.path().join("b.parquet").exists());
        assert!(!dir.path().join("c.tmp").exists());
    }

    #[test]
    fn parquet_sink_finalize_writes_then_renames() {
        let dir = TempDir::new().unwrap();
        let schema = crate::schema::cdx_row_schema();
        let mut sink = ParquetSink::new("cdx", 0, dir.path(), &schema, 3).unwrap();

        let batch = RecordBatch::try_new(
            Arc::new(schema.clone()),
            vec![
                Arc::new(arrow::array::StringArray::from(vec!["gov,example"])),
                Arc::new(arrow::array::StringArray::from(vec!["20240101000000"])),
                Arc::new(arrow::array::StringArray::from(vec![
                    "https://example.gov/",
                ])),
                Arc::new(arrow::array::StringArray::from(vec!["example.gov"])),
                Arc::new(arrow::array::StringArray::from(vec!["gov,example"])),
                Arc::new(arrow::array::UInt16Array::from(vec![Some(200)])),
                Arc::new(arrow::array::StringArray::from(vec![Some("text/html")])),
                Arc::new(arrow::array::StringArray::from(vec![Some("ABC123")])),
                Arc::new(arrow::array::StringArray::from(vec!["cdx-00001.gz"])),
                Arc::new(arrow::array::UInt64Array::from(vec![0u64])),
                Arc::new(arrow::array::UInt64Array::from(vec![512u64])),
                Arc::new(arrow::array::StringArray::from(vec!["CC-MAIN-2024-33"])),
                Arc::new(arrow::array::StringArray::from(vec!["cdx-00001.gz"])),
            ],
        )
        .unwrap();

        sink.write_batch(&batch).unwrap();
        let rows = sink.finalize().unwrap();

        assert_eq!(rows, 1);
        let final_path = dir.path().join("cdx_0000.parquet");
        assert!(final_path.exists());
        assert!(is_valid_parquet(&final_path));
        assert!(!dir.path().join("cdx_0000.parquet.tmp").exists());
    }
}
