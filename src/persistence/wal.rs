//! Write-Ahead Log (WAL) for crash recovery.
//!
//! Each committed transaction is one record:
//! [length: u32][crc32: u32][payload: bincode(WalRecord)]
//! The WAL is append-only and fsynced after each write. A record that was
//! only partly written is dropped as a whole on replay, so a transaction is
//! either fully recovered or not at all.

use crate::error::{Result, VectorTableError};
use crate::persistence::serialization;
use crate::store::TableOp;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// The ops of one committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub sequence: u64,
    pub ops: Vec<TableOp>,
}

/// Write-Ahead Log file manager.
pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
    /// Set when a failed append could not be cut back off the file.
    broken: bool,
    /// Makes the next append write only this many bytes and then fail.
    #[cfg(test)]
    pub(crate) torn_write: Option<usize>,
}

impl WriteAheadLog {
    /// Open (or create) a WAL file at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            broken: false,
            #[cfg(test)]
            torn_write: None,
        })
    }

    /// Append a record to the WAL and fsync.
    ///
    /// On failure the file is cut back to its length before the call, so a
    /// record that was not acknowledged never reaches replay. If that cut
    /// fails too, every later append is refused.
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        if self.broken {
            return Err(VectorTableError::TransportError(format!(
                "WAL {} holds an unacknowledged record",
                self.path.display()
            )));
        }

        let payload = serialization::to_bincode(record)?;
        let crc = crc32fast::hash(&payload);
        let len = payload.len() as u32;

        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        let start = self.file.metadata()?.len();
        if let Err(e) = self.write_frame(&frame) {
            let cut = self
                .file
                .set_len(start)
                .and_then(|()| self.file.sync_all());
            if let Err(cut_err) = cut {
                warn!(
                    path = %self.path.display(),
                    "could not remove failed WAL record: {}", cut_err
                );
                self.broken = true;
            }
            return Err(e);
        }
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(written) = self.take_torn_write() {
            self.file.write_all(&frame[..written.min(frame.len())])?;
            return Err(VectorTableError::TransportError(
                "write interrupted".to_string(),
            ));
        }
        self.file.write_all(frame)?;
        self.sync()
    }

    #[cfg(test)]
    fn take_torn_write(&mut self) -> Option<usize> {
        self.torn_write.take()
    }

    #[cfg(not(test))]
    fn take_torn_write(&mut self) -> Option<usize> {
        None
    }

    /// Fsync the WAL file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replay all valid records from the WAL.
    /// Stops at the first corrupted or incomplete record and cuts the file
    /// back to the end of the last valid one, so later appends stay
    /// reachable.
    pub fn replay(&self) -> Result<Vec<WalRecord>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len: u64 = 0;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut crc_buf = [0u8; 4];
            if reader.read_exact(&mut crc_buf).is_err() {
                warn!(path = %self.path.display(), "WAL ends in a truncated header");
                break;
            }
            let expected_crc = u32::from_le_bytes(crc_buf);

            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).is_err() {
                warn!(path = %self.path.display(), "WAL ends in a truncated record");
                break;
            }

            if crc32fast::hash(&payload) != expected_crc {
                warn!(path = %self.path.display(), "WAL record failed its checksum");
                break;
            }

            match serialization::from_bincode::<WalRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %self.path.display(), "undecodable WAL record: {}", e);
                    break;
                }
            }
            valid_len += 8 + len as u64;
        }

        if self.file.metadata()?.len() > valid_len {
            self.file.set_len(valid_len)?;
            self.file.sync_all()?;
        }
        Ok(records)
    }

    /// Truncate the WAL file (after a successful checkpoint). An empty log
    /// accepts appends again even after a failed rollback.
    pub fn truncate(&mut self) -> Result<()> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file.sync_all()?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.broken = false;
        Ok(())
    }
}
