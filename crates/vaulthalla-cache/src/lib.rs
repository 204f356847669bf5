//! Process-wide entry cache (C6) mirroring the catalog store's entries.

pub mod cache;
pub mod stats;

pub use cache::EntryCache;
pub use stats::EntryCacheStats;
