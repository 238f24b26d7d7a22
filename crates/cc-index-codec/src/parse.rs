//! CDX line decoding: `SURT TIMESTAMP {json tail}` -> [`CdxRow`].
//!
//! Malformed rows (bad JSON, missing required field) are reported as `Err`
//! and counted by the caller (`cc_index_core::accumulator::process_lines`);
//! they never abort the shard.

use cc_index_core::host::{host_from_url, reverse_host};

use crate::row::{CdxRow, CdxTail};

/// Parse one CDX line into a row, or a reason string for a malformed line.
pub fn parse_cdx_line(line: &str, collection: &str, shard_file: &str) -> Result<CdxRow, String> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut parts = line.splitn(3, ' ');
    let surt = parts.next().filter(|s| !s.is_empty()).ok_or("missing SURT field")?;
    let ts = parts.next().filter(|s| !s.is_empty()).ok_or("missing timestamp field")?;
    let json_str = parts.next().ok_or("missing JSON tail")?;

    let tail: CdxTail = serde_json::from_str(json_str).map_err(|e| format!("bad JSON tail: {e}"))?;

    let host = host_from_url(&tail.url).ok_or("no host in url")?;
    let host_rev = reverse_host(&host);

    let warc_offset: u64 = tail
        .offset
        .parse()
        .map_err(|_| format!("non-numeric offset: {}", tail.offset))?;
    let warc_length: u64 = tail
        .length
        .parse()
        .map_err(|_| format!("non-numeric length: {}", tail.length))?;

    // status is nullable in the schema; an unparsable value is dropped
    // rather than rejecting the whole row.
    let status = tail.status.as_deref().and_then(|s| s.parse::<u16>().ok());

    Ok(CdxRow {
        surt: surt.to_string(),
        ts: ts.to_string(),
        url: tail.url,
        host,
        host_rev,
        status,
        mime: tail.mime.filter(|m| !m.is_empty()),
        digest: tail.digest.filter(|d| !d.is_empty()),
        warc_filename: tail.filename,
        warc_offset,
        warc_length,
        collection: collection.to_string(),
        shard_file: shard_file.to_string(),
    })
}
