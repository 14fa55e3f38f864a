//! Durable store: write-ahead log, snapshots and crash recovery.

pub mod engine;
pub mod serialization;
pub mod snapshot;
pub mod wal;
