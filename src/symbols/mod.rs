// =============================================================================
// Symbols Module
// =============================================================================
//
// Instrument lookup for the console:
// - Fuzzy string scoring (exact / prefix / substring bonuses + edit distance)
// - In-memory symbol catalog with a merge-invalidated query cache
// - Search-bar flow: local results first, remote round trip, merge, re-rank

pub mod index;
pub mod record;
pub mod scorer;
pub mod search;

pub use index::SymbolIndex;
pub use record::{RawSymbolRecord, SymbolRecord};
pub use search::{SearchOutcome, SymbolSearch};
