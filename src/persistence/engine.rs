//! Storage engine: combines WAL + snapshots into a crash-safe backing store.

use crate::error::Result;
use crate::persistence::serialization::DatabaseSnapshot;
use crate::persistence::snapshot::SnapshotManager;
use crate::persistence::wal::{WalRecord, WriteAheadLog};
use crate::store::{CommitLog, TableOp, TableStore, Tables};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration for the storage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Checkpoint after this many committed transactions.
    pub checkpoint_interval: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 1000,
        }
    }
}

/// Commit log writing every transaction to the WAL and checkpointing
/// periodically.
pub struct DurableLog {
    wal: WriteAheadLog,
    snapshot_mgr: SnapshotManager,
    data_dir: PathBuf,
    /// Sequence number of the last record written.
    sequence: u64,
    wal_count: usize,
    config: EngineConfig,
}

impl DurableLog {
    /// Snapshot `tables` and truncate the WAL.
    fn checkpoint(&mut self, tables: &Tables) -> Result<()> {
        self.snapshot_mgr.save(&DatabaseSnapshot {
            sequence: self.sequence,
            tables: tables.clone(),
        })?;
        self.wal.truncate()?;
        self.wal_count = 0;
        info!(
            data_dir = %self.data_dir.display(),
            sequence = self.sequence,
            "checkpoint written"
        );
        Ok(())
    }
}

impl CommitLog for DurableLog {
    fn record(&mut self, tables: &Tables, ops: &[TableOp]) -> Result<()> {
        let sequence = self.sequence + 1;
        self.wal.append(&WalRecord {
            sequence,
            ops: ops.to_vec(),
        })?;
        self.sequence = sequence;
        self.wal_count += 1;

        // The record is durable at this point; a failed checkpoint only
        // means the WAL keeps growing until the next one succeeds.
        if self.wal_count >= self.config.checkpoint_interval {
            if let Err(e) = self.checkpoint(tables) {
                warn!("checkpoint failed, keeping WAL: {}", e);
            }
        }
        Ok(())
    }
}

/// Backing store persisted under a data directory.
pub type FileStore = TableStore<DurableLog>;

impl TableStore<DurableLog> {
    /// Open or create a persistent store at the given directory.
    pub fn open(data_dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let snapshot_mgr = SnapshotManager::new(&data_dir)?;
        let wal = WriteAheadLog::open(data_dir.join("wal.log"))?;

        let (mut tables, mut sequence) = match snapshot_mgr.load()? {
            Some(snapshot) => (snapshot.tables, snapshot.sequence),
            None => (Tables::new(), 0),
        };

        // Records at or below the snapshot sequence are already in it; they
        // survive only when a crash hit between snapshot and truncation.
        let records = wal.replay()?;
        let snapshot_sequence = sequence;
        let mut replayed = 0;
        for record in records.iter().filter(|r| r.sequence > snapshot_sequence) {
            for op in &record.ops {
                tables.apply(op)?;
            }
            sequence = record.sequence;
            replayed += 1;
        }
        info!(
            data_dir = %data_dir.display(),
            sequence,
            replayed,
            "store opened"
        );

        let log = DurableLog {
            wal,
            snapshot_mgr,
            data_dir,
            sequence,
            wal_count: records.len(),
            config,
        };
        Ok(Self::from_parts(tables, log))
    }

    /// Force a checkpoint: snapshot + truncate WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let inner = &mut *inner;
        inner.log.checkpoint(&inner.tables)
    }

    /// Directory this store persists to.
    pub fn data_dir(&self) -> Result<PathBuf> {
        Ok(self.lock()?.log.data_dir.clone())
    }
}
