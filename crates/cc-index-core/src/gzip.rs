//! Local-file gzip decompression with byte counting.
//!
//! The downloader collaborator (see spec §6) delivers CDX shards onto disk
//! under `CCINDEX_ROOT`; this crate never fetches over the network, so the
//! reader here opens a local `File` rather than bridging an async HTTP
//! response the way an ingest-from-network pipeline would.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;

/// Buffer size for the gzip stream reader (256KB).
const GZIP_BUF_SIZE: usize = 256 * 1024;

/// Buffered reader over a gzipped local file, with byte counting for progress.
pub type GzipFileReader = BufReader<GzDecoder<CountingReader<File>>>;

/// Shared byte counter for progress tracking.
pub type ByteCounter = Arc<AtomicU64>;

/// Open a local `.gz` file for streaming decompression.
///
/// Returns the reader plus a live byte counter tracking compressed bytes
/// consumed so far, and the file's on-disk size (the gzip "total bytes"
/// hint, used to size progress bars).
pub fn open_gzip_file(path: &Path) -> io::Result<(GzipFileReader, ByteCounter, u64)> {
    let file = File::open(path)?;
    let total_bytes = file.metadata()?.len();

    let counter = Arc::new(AtomicU64::new(0));
    let counting = CountingReader {
        inner: file,
        count: counter.clone(),
    };
    let gz = GzDecoder::new(counting);
    let buf = BufReader::with_capacity(GZIP_BUF_SIZE, gz);

    Ok((buf, counter, total_bytes))
}

/// Reader wrapper that tracks bytes read.
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Detect whether a file is non-gzip or truncated before even attempting a
/// full read — used by C1 to distinguish "quarantine the shard" from a
/// recoverable row-level decode error.
pub fn looks_like_gzip(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == [0x1f, 0x8b]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_gzip(path: &Path, data: &[u8]) {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let file = File::create(path).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap();
    }

    #[test]
    fn open_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.gz");
        write_gzip(&path, b"line one\nline two\n");

        let (mut reader, counter, total) = open_gzip_file(&path).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();

        assert_eq!(out, "line one\nline two\n");
        assert!(counter.load(Ordering::Relaxed) > 0);
        assert!(total > 0);
    }

    #[test]
    fn looks_like_gzip_true_for_real_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.gz");
        write_gzip(&path, b"data");
        assert!(looks_like_gzip(&path).unwrap());
    }

    #[test]
    fn looks_like_gzip_false_for_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.gz");
        std::fs::write(&path, b"not gzip data").unwrap();
        assert!(!looks_like_gzip(&path).unwrap());
    }

    #[test]
    fn looks_like_gzip_false_for_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.gz");
        std::fs::write(&path, b"").unwrap();
        assert!(!looks_like_gzip(&path).unwrap());
    }

    #[test]
    fn looks_like_gzip_false_for_one_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gz");
        std::fs::write(&path, [0x1f]).unwrap();
        assert!(!looks_like_gzip(&path).unwrap());
    }
}
