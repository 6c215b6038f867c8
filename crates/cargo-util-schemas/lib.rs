//! Deserialization schema for the lockfile: canonical shape, legacy-shape
//! migration, and the term-format reader/writer (spec §4F).

mod lock;

pub use lock::{LockEntry, LockReadError, Lockfile};
