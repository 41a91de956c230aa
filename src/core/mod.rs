// Core primitives: mask building, quote-context resolution, structural
// parsing, and post-processing. Everything here is pure and single-threaded;
// the pipeline module wires it together.

pub mod masks;
pub mod postproc;
pub mod stage1;
pub mod stage2;

pub use masks::*;
pub use stage1::*;
pub use stage2::*;
