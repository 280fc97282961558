//! Append-only operation log.
//!
//! Every mutation of a persistent store is appended here before it becomes
//! visible. On open the log is replayed to rebuild the in-memory state.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded LogEntry]
//! [ENTRY 2: codec-encoded LogEntry]
//! ...
//! ```
//!
//! Replay stops at the first truncated or corrupt entry and the file is cut
//! back to the last good entry, so a torn write loses at most that write.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::Document;

use super::codec;

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    CreateCollection { name: String },
    DeleteCollection { name: String },
    /// Upsert of a whole batch.
    Put {
        collection: String,
        documents: Vec<Document>,
    },
    /// Removal of a whole batch.
    Remove { collection: String, ids: Vec<String> },
}

/// A record with its position and write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonically increasing, starting at 1 in each log file.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub record: LogRecord,
}

/// What [`OperationLog::open`] found on disk.
#[derive(Debug, Default)]
pub struct Replay {
    /// Entries that decoded cleanly, in order.
    pub entries: Vec<LogEntry>,
    /// Bytes cut from the tail because they did not decode.
    pub discarded_bytes: u64,
}

fn lock_poisoned() -> std::io::Error {
    std::io::Error::new(ErrorKind::Other, "operation log lock poisoned")
}

/// The operation log of one database directory.
pub struct OperationLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_on_write: bool,
}

struct LogWriter {
    file: BufWriter<File>,
    sequence: u64,
}

impl OperationLog {
    /// Open or create the log at `path`, replaying existing entries.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Replay)> {
        let existing = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let replay = if existing < codec::HEADER_LEN {
            let mut file = File::create(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            Replay::default()
        } else {
            Self::replay(path)?
        };

        let sequence = replay.entries.last().map_or(0, |e| e.sequence);
        let file = OpenOptions::new().append(true).open(path)?;
        let log = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                file: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        };
        Ok((log, replay))
    }

    fn replay(path: &Path) -> IoResult<Replay> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;

        let mut entries = Vec::new();
        let mut good_offset = codec::HEADER_LEN;
        while good_offset < file_size {
            match codec::decode::<LogEntry>(&mut reader) {
                Ok(entry) => {
                    entries.push(entry);
                    good_offset = reader.stream_position()?;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset = good_offset,
                        error = %e,
                        "operation log corrupt; discarding tail"
                    );
                    break;
                }
            }
        }
        drop(reader);

        let discarded_bytes = file_size.saturating_sub(good_offset);
        if discarded_bytes > 0 {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(good_offset)?;
            file.sync_all()?;
        }
        debug!(entries = entries.len(), discarded_bytes, "operation log replayed");
        Ok(Replay {
            entries,
            discarded_bytes,
        })
    }

    /// Append one record, returning its sequence number.
    ///
    /// The record is durable on return when `sync_on_write` is set. If any
    /// step fails the file is cut back to its length before the call, so a
    /// failed append never leaves bytes that a later append would follow.
    pub fn append(&self, record: LogRecord) -> IoResult<u64> {
        let mut writer = self.writer.lock().map_err(|_| lock_poisoned())?;
        let entry = LogEntry {
            sequence: writer.sequence + 1,
            timestamp: Utc::now(),
            record,
        };
        let encoded = codec::encode(&entry)?;
        let start = writer.file.get_ref().metadata()?.len();

        let written = writer
            .file
            .write_all(&encoded)
            .and_then(|()| writer.file.flush())
            .and_then(|()| {
                if self.sync_on_write {
                    writer.file.get_ref().sync_data()
                } else {
                    Ok(())
                }
            });
        if let Err(e) = written {
            if let Err(rollback) = self.rollback(&mut writer, start) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back operation log after append error"
                );
            }
            return Err(e);
        }

        writer.sequence = entry.sequence;
        Ok(entry.sequence)
    }

    /// Drops buffered bytes and truncates the file to `len`.
    fn rollback(&self, writer: &mut LogWriter, len: u64) -> IoResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut writer.file, BufWriter::new(file));
        // Taking the parts discards the buffer instead of flushing it on drop.
        let _ = stale.into_parts();
        writer.file.get_ref().set_len(len)?;
        writer.file.get_ref().sync_data()?;
        debug!(path = %self.path.display(), len, "operation log rolled back");
        Ok(())
    }

    /// Atomically replace the whole log with `records`.
    ///
    /// The new log is written to a temporary file, synced, and renamed over
    /// the old one. If anything fails before the rename the old log is left
    /// untouched.
    pub fn rewrite(&self, records: Vec<LogRecord>) -> IoResult<()> {
        let mut writer = self.writer.lock().map_err(|_| lock_poisoned())?;
        writer.file.flush()?;

        let tmp_path = self.path.with_extension("compact");
        let result = Self::write_fresh(&tmp_path, records);
        let sequence = match result {
            Ok(sequence) => sequence,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        fs::rename(&tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        writer.file = BufWriter::new(file);
        writer.sequence = sequence;
        Ok(())
    }

    fn write_fresh(path: &Path, records: Vec<LogRecord>) -> IoResult<u64> {
        let mut out = BufWriter::new(File::create(path)?);
        codec::write_header(&mut out)?;
        let timestamp = Utc::now();
        let mut sequence = 0;
        for record in records {
            sequence += 1;
            let entry = LogEntry {
                sequence,
                timestamp,
                record,
            };
            out.write_all(&codec::encode(&entry)?)?;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(sequence)
    }

    /// Sequence number of the last appended entry.
    pub fn sequence(&self) -> IoResult<u64> {
        Ok(self.writer.lock().map_err(|_| lock_poisoned())?.sequence)
    }

    /// Current size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> IoResult<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> IoResult<()> {
    Ok(())
}
