//! Chunk codec: pure splitting and joining of byte ranges.
//!
//! No I/O lives here. `split` partitions a length into ordered, contiguous
//! ranges; `join` concatenates already-ordered part payloads. Ordering
//! (numeric part suffix, never lexical filename order) is the orchestrator's
//! responsibility, but the name format and parser live here next to the
//! range math they belong with.

use bytes::{Bytes, BytesMut};

/// One contiguous slice of a file, identified by its 1-based sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRange {
    pub seq: u32,
    pub offset: u64,
    pub len: u64,
}

/// Partitions `[0, total_size)` into ranges of `chunk_size` bytes, the last
/// range carrying the remainder. A zero-length input yields no ranges, and
/// an exact multiple yields no trailing empty range.
pub fn split(total_size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    assert!(chunk_size > 0, "chunk_size must be non-zero");

    let mut ranges = Vec::new();
    let mut offset = 0u64;
    let mut seq = 1u32;
    while offset < total_size {
        let len = chunk_size.min(total_size - offset);
        ranges.push(ChunkRange { seq, offset, len });
        offset += len;
        seq += 1;
    }
    ranges
}

/// Concatenates part payloads supplied in ascending sequence order.
pub fn join<I>(parts: I) -> Bytes
where
    I: IntoIterator<Item = Bytes>,
{
    let mut out = BytesMut::new();
    for part in parts {
        out.extend_from_slice(&part);
    }
    out.freeze()
}

/// Deterministic part attachment name: `{base}.part{seq}`, 1-based, unpadded.
pub fn part_name(base: &str, seq: u32) -> String {
    format!("{}.part{}", base, seq)
}

/// Recovers the sequence number from a part attachment name.
///
/// Strict on both ends: the name must start with exactly `{base}.part` and
/// everything after it must be digits. Returns `None` for unrelated
/// attachments so scan filtering can use this directly.
pub fn parse_part_seq(filename: &str, base: &str) -> Option<u32> {
    let suffix = filename.strip_prefix(base)?.strip_prefix(".part")?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
