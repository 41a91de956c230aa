// Chunk ambiguity scanning
//
// Classifies chunk prefixes for the speculative-parallel Stage 1 path: a
// prefix is unambiguous when its quote sequence admits exactly one answer to
// "does this chunk start inside a quoted field?". Two byte patterns decide
// it:
//
// - Qo: a quote followed by a byte that is neither quote, delimiter nor
//   newline, meaning that quote opened a field.
// - oQ: such a byte followed by a quote, meaning that quote closed a field.
//
// A prefix with at least one of the patterns (or no quotes at all) is
// unambiguous; otherwise Stage 1 must run serially, which is always correct.
// Chunks classify independently, so a pass over a large blob fans out on a
// rayon pool sized to the chunk count; small blobs are scanned serially.

use memchr::{memchr, memrchr};
use rayon::prelude::*;

/// Prefix length examined per chunk.
pub const PREFIX_SIZE: usize = 64 * 1024;

/// Whether a chunk's initial quote state could be decided locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Unambiguous,
    Ambiguous,
}

/// Per-chunk classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Chunk index within the blob.
    pub part: usize,
    /// Leading bytes that belong to a row begun in the previous chunk.
    pub widow: usize,
    /// Trailing bytes of a row that continues into the next chunk.
    pub orphan: usize,
    pub status: ChunkStatus,
}

/// Fewer chunks than this and a classification pass runs serially; each
/// per-chunk scan touches at most `PREFIX_SIZE` bytes, so spinning up
/// threads costs more than the scans themselves.
const SERIAL_CHUNK_LIMIT: usize = 4;

/// Threads for one classification pass: one per chunk, capped at the
/// machine size. Classification is a one-shot analysis over a known chunk
/// count, so the pool is sized to that count rather than to a generic
/// parsing workload.
fn classification_threads(chunks: usize) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |p| p.get());
    chunks.min(cores).max(1)
}

#[inline]
fn is_plain(b: u8, delimiter: u8) -> bool {
    b != b'"' && b != delimiter && b != b'\n'
}

/// Quote-then-other: some quote in the prefix opened a field.
fn has_quote_other(prefix: &[u8], delimiter: u8) -> bool {
    prefix
        .windows(2)
        .any(|w| w[0] == b'"' && is_plain(w[1], delimiter))
}

/// Other-then-quote: some quote in the prefix closed a field.
fn has_other_quote(prefix: &[u8], delimiter: u8) -> bool {
    prefix
        .windows(2)
        .any(|w| is_plain(w[0], delimiter) && w[1] == b'"')
}

/// Classify a chunk prefix. Only the first `PREFIX_SIZE` bytes are examined.
pub fn classify_prefix(chunk: &[u8], delimiter: u8) -> ChunkStatus {
    let prefix = &chunk[..chunk.len().min(PREFIX_SIZE)];
    if memchr(b'"', prefix).is_none() {
        return ChunkStatus::Unambiguous;
    }
    if has_quote_other(prefix, delimiter) || has_other_quote(prefix, delimiter) {
        ChunkStatus::Unambiguous
    } else {
        ChunkStatus::Ambiguous
    }
}

/// Summarize one chunk: classification plus widow/orphan sizes.
pub fn summarize_chunk(part: usize, chunk: &[u8], delimiter: u8) -> ChunkSummary {
    let widow = memchr(b'\n', chunk).unwrap_or(chunk.len());
    let orphan = match memrchr(b'\n', chunk) {
        Some(p) => chunk.len() - 1 - p,
        None => chunk.len(),
    };
    ChunkSummary {
        part,
        widow,
        orphan,
        status: classify_prefix(chunk, delimiter),
    }
}

/// Classify every chunk of a blob, in parallel when the chunk count makes
/// that worthwhile.
pub fn summarize_blob(blob: &[u8], chunk_size: usize, delimiter: u8) -> Vec<ChunkSummary> {
    if blob.is_empty() {
        return Vec::new();
    }

    let chunks = blob.len().div_ceil(chunk_size);
    if chunks < SERIAL_CHUNK_LIMIT {
        return blob
            .chunks(chunk_size)
            .enumerate()
            .map(|(part, chunk)| summarize_chunk(part, chunk, delimiter))
            .collect();
    }

    let scan = || {
        blob.par_chunks(chunk_size)
            .enumerate()
            .map(|(part, chunk)| summarize_chunk(part, chunk, delimiter))
            .collect()
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(classification_threads(chunks))
        .thread_name(|i| format!("chunk-scan-{i}"))
        .build();
    match pool {
        Ok(pool) => pool.install(scan),
        // under thread exhaustion the global rayon pool still works
        Err(_) => scan(),
    }
}
