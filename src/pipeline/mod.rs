// Streaming pipeline and chunk analysis.

pub mod chunker;
pub mod streaming;

pub use chunker::{ChunkStatus, ChunkSummary};
pub use streaming::{Records, RecordsOutput};
