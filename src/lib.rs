// maskcsv - two-stage bit-parallel CSV reading
//
// Stage 1 turns each 64-byte window of input into three bitmasks with quote
// context already resolved; Stage 2 parses structure from the masks alone.
// A streaming pipeline (one producer, one serial Stage 1 worker, a pool of
// Stage 2 workers, an ordering consumer) glues the stages together over
// bounded channels. Regions the engine cannot handle (rows spanning chunk
// boundaries, structurally inconsistent payloads) go through a scalar
// reference parser.
//
// No unwrap/expect outside tests; fallible paths return Result.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod core;
pub mod error;
pub mod fallback;
pub mod pipeline;

pub use error::{Error, Result};
pub use pipeline::streaming::{Records, RecordsOutput};

use crossbeam_channel::Receiver;
use pipeline::streaming::PipelineOptions;
use std::io::Read;

/// Default chunk size handed to one Stage 2 worker (already a multiple of
/// the 64-byte window).
pub const DEFAULT_CHUNK_SIZE: usize = 320 * 1024;

/// Default number of Stage 2 workers.
pub const DEFAULT_WORKERS: usize = 2;

/// Default capacity of each pipeline channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Configures and creates `Reader`s.
#[derive(Debug, Clone)]
pub struct ReaderBuilder {
    delimiter: u8,
    comment: Option<u8>,
    trim_leading_space: bool,
    fields_per_record: i64,
    chunk_size: usize,
    workers: usize,
    channel_capacity: usize,
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderBuilder {
    pub fn new() -> Self {
        ReaderBuilder {
            delimiter: b',',
            comment: None,
            trim_leading_space: false,
            fields_per_record: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Field delimiter. Must be ASCII and none of `"`, `\r`, `\n`, NUL.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Comment byte: records whose first field starts with it are dropped.
    /// A quoted first field never matches.
    pub fn comment(mut self, comment: Option<u8>) -> Self {
        self.comment = comment;
        self
    }

    /// Strip leading Unicode whitespace from every field.
    pub fn trim_leading_space(mut self, trim: bool) -> Self {
        self.trim_leading_space = trim;
        self
    }

    /// Expected fields per record: negative disables the check, zero pins
    /// it to the first record read, positive enforces the given count.
    pub fn fields_per_record(mut self, fields: i64) -> Self {
        self.fields_per_record = fields;
        self
    }

    /// Bytes per pipeline chunk; rounded up to a multiple of 64.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Number of Stage 2 workers.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Capacity of each internal channel.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Validate the configuration and wrap `input`.
    pub fn from_reader<R: Read>(&self, input: R) -> Result<Reader<R>> {
        if !valid_delimiter(self.delimiter) {
            return Err(Error::InvalidDelimiter);
        }
        if let Some(comment) = self.comment {
            if !valid_delimiter(comment) || comment == self.delimiter {
                return Err(Error::InvalidDelimiter);
            }
        }
        Ok(Reader {
            opts: self.pipeline_options(),
            input,
        })
    }

    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            delimiter: self.delimiter,
            comment: self.comment,
            trim_leading_space: self.trim_leading_space,
            fields_per_record: self.fields_per_record,
            chunk_size: self.chunk_size.max(1).div_ceil(64) * 64,
            workers: self.workers.max(1),
            capacity: self.channel_capacity.max(1),
        }
    }
}

/// The mask path only understands single ASCII bytes, and quote, CR and LF
/// are structural.
fn valid_delimiter(b: u8) -> bool {
    b != 0 && b != b'"' && b != b'\r' && b != b'\n' && b.is_ascii()
}

/// Reads CSV records from a byte stream.
pub struct Reader<R> {
    opts: PipelineOptions,
    input: R,
}

impl<R: Read> Reader<R> {
    /// A reader with the default configuration.
    pub fn new(input: R) -> Reader<R> {
        Reader {
            opts: ReaderBuilder::new().pipeline_options(),
            input,
        }
    }
}

impl<R: Read + Send> Reader<R> {
    /// Read every remaining record, in input order.
    pub fn read_all(&mut self) -> Result<Vec<Vec<String>>> {
        pipeline::streaming::read_to_end(&mut self.input, &self.opts)
    }
}

impl<R: Read + Send + 'static> Reader<R> {
    /// Consume the reader and iterate rows in input order while the
    /// pipeline runs in the background.
    pub fn into_records(self) -> Records {
        Records::new(pipeline::streaming::spawn_pipeline(self.input, self.opts))
    }

    /// Consume the reader and expose the raw output channel: one
    /// `RecordsOutput` per chunk, tagged with its sequence, in whatever
    /// order the workers finish. A sequence of -1 carries a terminal error.
    pub fn read_all_streaming(self) -> Receiver<RecordsOutput> {
        pipeline::streaming::spawn_pipeline(self.input, self.opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reader_defaults() {
        let mut reader = Reader::new(Cursor::new(b"a,b\n1,2\n".to_vec()));
        let records = reader.read_all().unwrap();
        assert_eq!(records, vec![vec!["a", "b"], vec!["1", "2"]]);
    }

    #[test]
    fn test_builder_rejects_structural_delimiters() {
        for bad in [b'"', b'\r', b'\n', 0u8, 0x80] {
            let result = ReaderBuilder::new()
                .delimiter(bad)
                .from_reader(Cursor::new(Vec::new()));
            assert!(
                matches!(result, Err(Error::InvalidDelimiter)),
                "delimiter {bad:#x} must be rejected"
            );
        }
    }

    #[test]
    fn test_builder_rejects_comment_equal_to_delimiter() {
        let result = ReaderBuilder::new()
            .delimiter(b';')
            .comment(Some(b';'))
            .from_reader(Cursor::new(Vec::new()));
        assert!(matches!(result, Err(Error::InvalidDelimiter)));
    }

    #[test]
    fn test_chunk_size_rounded_to_window_multiple() {
        let opts = ReaderBuilder::new().chunk_size(1000).pipeline_options();
        assert_eq!(opts.chunk_size % 64, 0);
        assert!(opts.chunk_size >= 1000);

        let opts = ReaderBuilder::new().chunk_size(0).pipeline_options();
        assert_eq!(opts.chunk_size, 64);
    }

    #[test]
    fn test_custom_delimiter() {
        let mut reader = ReaderBuilder::new()
            .delimiter(b';')
            .from_reader(Cursor::new(b"a;b\n\"c;d\";e\n".to_vec()))
            .unwrap();
        let records = reader.read_all().unwrap();
        assert_eq!(records, vec![vec!["a", "b"], vec!["c;d", "e"]]);
    }
}
