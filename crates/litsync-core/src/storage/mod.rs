//! # Storage Module
//!
//! Persistent storage backends for litsync.
//!
//! The volatile `MemoryStore` lives in `store`; this module holds the
//! disk-backed implementations of `RecordStore`.

mod redb_store;

pub use redb_store::RedbStore;
