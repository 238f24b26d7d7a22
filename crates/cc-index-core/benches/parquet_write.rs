use std::sync::Arc;

use arrow::array::{RecordBatch, StringArray, UInt16Array, UInt64Array};
use cc_index_core::ParquetSink;
use cc_index_core::schema::cdx_row_schema;

fn synthetic_batch(n: usize) -> RecordBatch {
    let schema = Arc::new(cdx_row_schema());
    let idx: Vec<usize> = (0..n).collect();
    let url = |i: &usize| format!("https://host{i}.example.gov/path/{i}");
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                idx.iter().map(|i| format!("gov,example,host{i}")).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(vec!["20240101000000"; n])),
            Arc::new(StringArray::from(idx.iter().map(url).collect::<Vec<_>>())),
            Arc::new(StringArray::from(
                idx.iter().map(|i| format!("host{i}.example.gov")).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                idx.iter().map(|i| format!("gov,example,host{i}")).collect::<Vec<_>>(),
            )),
            Arc::new(UInt16Array::from(vec![Some(200u16); n])),
            Arc::new(StringArray::from(vec![Some("text/html"); n])),
            Arc::new(StringArray::from(vec![Some("ABCDEF1234567890"); n])),
            Arc::new(StringArray::from(vec!["cdx-00001.gz"; n])),
            Arc::new(UInt64Array::from(idx.iter().map(|i| (*i as u64) * 512).collect::<Vec<_>>())),
            Arc::new(UInt64Array::from(vec![512u64; n])),
            Arc::new(StringArray::from(vec!["CC-MAIN-2024-33"; n])),
            Arc::new(StringArray::from(vec!["cdx-00001.gz"; n])),
        ],
    );
    batch.unwrap()
}

#[divan::bench(args = [1, 3, 6])]
fn parquet_write_zstd(bencher: divan::Bencher, zstd_level: i32) {
    let batch = synthetic_batch(8192);
    let schema = batch.schema();
    let dir = tempfile::tempdir().unwrap();
    bencher.bench(|| {
        let mut sink =
            ParquetSink::new("bench", 0, dir.path(), schema.as_ref(), zstd_level).unwrap();
        sink.write_batch(&batch).unwrap();
        sink.finalize().unwrap();
    });
}

fn main() {
    divan::main();
}
