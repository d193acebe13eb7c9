//! Versioned, namespaced persistent store of request→response snapshots.
//!
//! Entries are scoped to a named cache generation. Exactly one generation is
//! active per namespace at a time; superseded generations are deleted
//! wholesale during activation, never patched in place.

mod store;

pub use store::{CacheEntry, CacheStore, SqliteStore};
