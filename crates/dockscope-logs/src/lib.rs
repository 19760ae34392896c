//! Log processing for dockscope
//!
//! This crate provides log normalization, buffering, search and filtering,
//! and per-container streaming.

mod buffer;
mod filter;
pub mod normalize;
mod search;
mod stream;

pub use buffer::{LevelCounts, LogBuffer, LogBufferReader, LogSnapshot};
pub use filter::{CompiledFilter, FilterTerm, SearchMode, parse_terms};
pub use normalize::{ContinuationRule, Normalizer, Recognizer, normalize, strip_ansi};
pub use search::{SearchEngine, SearchMatch, SearchState};
pub use stream::{LogSession, LogStreamManager, StreamConfig};

// Re-export types used in our public API
pub use dockscope_types::{
    ArcLogLine, LineFormat, LogLevel, LogLine, NormalizedLine, StreamError, StreamStatus, TextView,
};
