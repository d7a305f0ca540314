//! Local cache for downloaded datasets.
//!
//! This module provides:
//! - Two physical backends: a directory store and a SQLite record store
//! - A read-only decoder for the chunked flat format of older releases
//! - An in-memory metadata index so listings never re-scan the backend
//! - Integrity checks that delete corrupted entries on read

mod directory;
mod index;
pub mod key;
mod layer;
mod legacy;
mod storage;
mod traits;

pub use directory::DirectoryBackend;
pub use index::CacheSummary;
pub use key::CacheKey;
pub use layer::{CacheEvent, CacheOptions, HybridCache};
pub use legacy::LegacyStore;
pub use storage::SqliteBackend;
pub use traits::{CacheType, EntryMeta, StorageBackend, StoredEntry};
