//! Incremental extraction of streamed responses from a mutating rendered
//! document: markup flattening plus the prefix-diff state machine that turns
//! observation ticks into output chunks and terminal signals.

pub mod extractor;
pub mod flatten;

pub use extractor::{ExtractEvent, StreamExtractor};
pub use flatten::flatten_rendered;
