//! Append-only audit logging.
//!
//! Records profile operations and every step of an upload session. Sinks are
//! injected into [`ProfileService`](crate::profile::ProfileService) and
//! [`UploadSession`](crate::session::UploadSession); there is no global log.
//!
//! The `UploadAttempted` record doubles as a write-ahead entry: a session
//! appends it before the remote call and refuses to proceed if the sink
//! reports an error.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::profile::OpenMode;
use crate::session::AbortReason;

/// A sink that receives audit records. Implement this to forward records
/// to a file, database, or other persistent store.
pub trait AuditSink: Send + Sync {
    /// Append a record. Returns only once the record is as durable as the
    /// sink can make it.
    fn append(&self, record: &AuditRecord) -> io::Result<()>;
}

/// A permanent record of one audited event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// What happened. Never carries PINs, keys or file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ProfileCreated { workspaces: Vec<String> },
    ProfileOpened { workspaces: Vec<String>, mode: OpenMode },
    ProfilesCombined { workspaces: Vec<String> },
    ContainerCreated { workspace: String, container: String },
    UploadAttempted { container: String, file: String },
    FileUploaded { container: String, file: String },
    FileFailed { container: String, file: String, reason: String },
    ManifestWritten { container: String, blob: String },
    ContainerCommitted { container: String },
    CommitFailed { container: String, reason: String },
    SessionAborted { container: String, reason: AbortReason },
}

/// An append-only in-memory log.
/// Can forward records to additional sinks via `add_forward_sink`.
#[derive(Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
    forward_sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &self.len())
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to receive a copy of every record. Forward sinks are
    /// attached before the log is shared.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.push(sink);
    }

    fn records(&self) -> MutexGuard<'_, Vec<AuditRecord>> {
        // A poisoned log still holds every record appended before the panic.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the number of records in the log.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Copy of the records in append order.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records().clone()
    }

    /// Events in append order, without timestamps.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.records().iter().map(|r| r.event.clone()).collect()
    }
}

impl AuditSink for AuditLog {
    /// Forward first, then record locally. A failing forward sink fails the
    /// append and the record is not kept.
    fn append(&self, record: &AuditRecord) -> io::Result<()> {
        for sink in &self.forward_sinks {
            sink.append(record)?;
        }
        self.records().push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes audit records as JSON lines (one per record) to a file.
/// Creates the file if it doesn't exist; appends if it does. Every record is
/// synced to disk before `append` returns.
pub struct FileAuditSink {
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Open or create a file for append-only audit logging.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Read back every record written to `path`, oldest first.
    ///
    /// A final line that does not parse is a write cut short by a crash and
    /// is skipped. Any earlier unparsable line is `InvalidData`.
    pub fn read_records(path: impl AsRef<Path>) -> io::Result<Vec<AuditRecord>> {
        let lines = BufReader::new(File::open(path)?)
            .lines()
            .collect::<io::Result<Vec<_>>>()?;
        let last = lines.iter().rposition(|line| !line.trim().is_empty());

        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(err) if Some(index) == last => {
                    warn!(line = index + 1, error = %err, "skipping torn final audit line");
                }
                Err(err) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("audit line {}: {err}", index + 1),
                    ));
                }
            }
        }
        Ok(records)
    }
}

/// `(container, file)` pairs that have an `UploadAttempted` record but no
/// later `FileUploaded` or `FileFailed`, in attempt order. After a crash
/// these are the blobs whose remote state is unknown.
pub fn unconfirmed_uploads(records: &[AuditRecord]) -> Vec<(String, String)> {
    let mut open: Vec<(String, String)> = Vec::new();
    for record in records {
        match &record.event {
            AuditEvent::UploadAttempted { container, file } => {
                open.push((container.clone(), file.clone()));
            }
            AuditEvent::FileUploaded { container, file }
            | AuditEvent::FileFailed {
                container, file, ..
            } => open.retain(|(c, f)| !(c == container && f == file)),
            _ => {}
        }
    }
    open
}

impl AuditSink for FileAuditSink {
    fn append(&self, record: &AuditRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit file lock poisoned"))?;
        writeln!(file, "{line}")?;
        file.flush()?;
        file.sync_data()
    }
}
