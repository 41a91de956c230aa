// Error types for the reader and pipeline.
//
// Pipeline workers never panic across the channel boundary: every failure is
// carried as a `RecordsOutput` with sequence -1 and one of these variants.

use thiserror::Error;

/// Errors surfaced by the reader.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured field or comment delimiter is unusable (quote, CR, LF,
    /// NUL, or non-ASCII). Rejected before the pipeline starts.
    #[error("invalid field or comment delimiter")]
    InvalidDelimiter,

    /// A record did not match the committed number of fields per record.
    /// The line number is 1-based and relative to the chunk that detected
    /// the mismatch.
    #[error("record on line {line}: wrong number of fields")]
    FieldCount { line: usize },

    /// The reference parser rejected a region the engine had surrendered.
    #[error("reference parse failed: {0}")]
    Parse(#[from] csv::Error),

    /// The underlying input source failed mid-stream.
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
