//! Snapshot: save/load full store state to/from disk.

use crate::error::Result;
use crate::persistence::serialization::{self, DatabaseSnapshot};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Human-readable summary written next to every snapshot.
#[derive(Debug, Serialize)]
struct Manifest<'a> {
    sequence: u64,
    tables: Vec<ManifestTable<'a>>,
}

#[derive(Debug, Serialize)]
struct ManifestTable<'a> {
    name: &'a str,
    physical_tables: [&'a str; 4],
    dimension: usize,
    centroid_count: usize,
    schema_version: u32,
    row_count: usize,
}

/// Manages saving and loading store snapshots.
pub struct SnapshotManager {
    dir: PathBuf,
}

impl SnapshotManager {
    /// Create a snapshot manager for the given directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("snapshot.bin")
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    /// Save a snapshot. The previous snapshot stays readable until the new
    /// one is completely written.
    pub fn save(&self, snapshot: &DatabaseSnapshot) -> Result<()> {
        let data = serialization::to_bincode(snapshot)?;
        let tmp = self.dir.join("snapshot.bin.tmp");
        fs::write(&tmp, &data)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, self.snapshot_path())?;

        let manifest = Manifest {
            sequence: snapshot.sequence,
            tables: snapshot
                .tables
                .iter()
                .map(|state| ManifestTable {
                    name: &state.meta().name,
                    physical_tables: state.names().all(),
                    dimension: state.meta().dimension,
                    centroid_count: state.meta().centroid_count,
                    schema_version: state.meta().schema_version,
                    row_count: state.row_count(),
                })
                .collect(),
        };
        fs::write(self.manifest_path(), serialization::to_json(&manifest)?)?;

        Ok(())
    }

    /// Load the snapshot, or return None if none has been written.
    pub fn load(&self) -> Result<Option<DatabaseSnapshot>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let snapshot: DatabaseSnapshot = serialization::from_bincode(&data)?;
        Ok(Some(snapshot))
    }

    /// Check if a snapshot exists.
    pub fn exists(&self) -> bool {
        self.snapshot_path().exists()
    }
}
