//! Upload sessions.
//!
//! A session drives one remote container through its lifecycle:
//!
//! ```text
//! start ─► Created ─upload_next─► Uploading ─finalize─► Committed
//!
//! Uploading ─file fails──► Aborted(FileFailed)
//! Uploading ─commit fails► Aborted(CommitFailed) ─finalize─► Committed
//! Created | Uploading ─abort─► Aborted(Cancelled)
//! ```
//!
//! Files go up strictly one at a time in the order given to `start`. The
//! first failure aborts the session; later files are never attempted. The
//! manifest is always the last blob written, so a committed container's
//! manifest lists exactly the data blobs it holds.
//!
//! An aborted session leaves its container allocated but uncommitted on the
//! remote side. Nothing here deletes it; [`UploadReport::orphaned`] says so.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::error::CourierError;
use crate::remote::{ContainerHandle, RemoteContainer, RemoteError};

/// Why a session stopped without committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// A data file could not be read or uploaded.
    FileFailed,
    /// The manifest upload or the commit failed. `finalize` may be retried.
    CommitFailed,
    /// The caller called `abort`.
    Cancelled,
}

/// Lifecycle state of an [`UploadSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Uploading,
    Committed,
    Aborted(AbortReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Uploading => write!(f, "uploading"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted(AbortReason::FileFailed) => write!(f, "aborted (file failed)"),
            Self::Aborted(AbortReason::CommitFailed) => write!(f, "aborted (commit failed)"),
            Self::Aborted(AbortReason::Cancelled) => write!(f, "aborted (cancelled)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Uploaded,
    Failed,
}

/// One local file in a session and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    path: PathBuf,
    blob_name: String,
    status: FileStatus,
}

impl FileEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The name the file is stored under: its base name.
    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }
}

/// What to upload, where, and on whose behalf.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub workspace: String,
    pub uploader: String,
    pub files: Vec<PathBuf>,
}

/// The result of one successful [`UploadSession::upload_next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub blob_name: String,
    pub bytes: usize,
}

/// The listing written as the final blob of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    uploader: String,
    files: Vec<String>,
}

impl Manifest {
    fn new(uploader: &str) -> Self {
        Self {
            uploader: uploader.to_string(),
            files: Vec::new(),
        }
    }

    /// Blob name of the manifest: the uploader name with everything except
    /// ASCII alphanumerics, spaces and underscores replaced by `_`.
    pub fn blob_name(&self) -> String {
        manifest_blob_name(&self.uploader)
    }

    pub fn uploader(&self) -> &str {
        &self.uploader
    }

    /// Uploaded blob names in upload order.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn render(&self, at: DateTime<Utc>) -> String {
        let mut text = format!(
            "Uploaded by: {}\nUploaded on: {} UTC\n\nList of all the uploaded files:\n",
            self.uploader,
            at.format("%Y-%m-%d %H:%M:%S")
        );
        for file in &self.files {
            text.push_str("- ");
            text.push_str(file);
            text.push('\n');
        }
        text
    }
}

pub fn manifest_blob_name(uploader: &str) -> String {
    let stem: String = uploader
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.txt")
}

/// Title given to a new container: `"{%Y%m%d %H%M%S} {workspace}"`.
pub fn container_title(workspace: &str, at: DateTime<Utc>) -> String {
    format!("{} {workspace}", at.format("%Y%m%d %H%M%S"))
}

/// A point-in-time view of a session for callers deciding what to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub workspace: String,
    pub container_location: String,
    pub container_id: String,
    pub state: SessionState,
    /// Every file in the request, in order, with its status.
    pub files: Vec<(String, FileStatus)>,
    /// True when the container is allocated but will not be committed by
    /// this session unless `finalize` is retried.
    pub orphaned: bool,
}

impl UploadReport {
    pub fn uploaded(&self) -> Vec<&str> {
        self.with_status(FileStatus::Uploaded)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.with_status(FileStatus::Failed)
    }

    pub fn pending(&self) -> Vec<&str> {
        self.with_status(FileStatus::Pending)
    }

    fn with_status(&self, wanted: FileStatus) -> Vec<&str> {
        self.files
            .iter()
            .filter(|(_, status)| *status == wanted)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// One upload transaction against one remote container.
pub struct UploadSession<R: RemoteContainer> {
    remote: R,
    handle: ContainerHandle,
    files: Vec<FileEntry>,
    manifest: Manifest,
    /// Rendered once, on the first `finalize`, and reused on retries.
    manifest_text: Option<String>,
    manifest_stored: bool,
    state: SessionState,
    audit: Arc<dyn AuditSink>,
}

impl<R: RemoteContainer> fmt::Debug for UploadSession<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSession")
            .field("handle", &self.handle)
            .field("files", &self.files)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn blob_name_for(path: &Path) -> Result<String, CourierError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CourierError::LocalFileNotFound(path.to_path_buf()))
}

impl<R: RemoteContainer> UploadSession<R> {
    /// Allocate a container and return a session ready to upload
    /// `request.files`.
    ///
    /// The workspace, the uploader and the blob names are checked before
    /// anything is allocated, so a rejected request leaves nothing behind on
    /// the remote side.
    pub fn start(
        remote: R,
        request: UploadRequest,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, CourierError> {
        if request.workspace.is_empty() {
            return Err(CourierError::EmptyField("workspace"));
        }
        if request.uploader.is_empty() {
            return Err(CourierError::EmptyField("uploader"));
        }
        let manifest = Manifest::new(&request.uploader);
        let manifest_name = manifest.blob_name();

        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(request.files.len());
        for path in request.files {
            let blob_name = blob_name_for(&path)?;
            if blob_name == manifest_name || !seen.insert(blob_name.clone()) {
                return Err(CourierError::DuplicateFileName(blob_name));
            }
            files.push(FileEntry {
                path,
                blob_name,
                status: FileStatus::Pending,
            });
        }

        let title = container_title(&request.workspace, Utc::now());
        let handle = remote
            .create_container(&request.workspace, &title)
            .map_err(|source| CourierError::ContainerAllocationFailure {
                workspace: request.workspace.clone(),
                source,
            })?;

        info!(
            workspace = %request.workspace,
            container = handle.id(),
            files = files.len(),
            "upload session started"
        );
        let session = Self {
            remote,
            handle,
            files,
            manifest,
            manifest_text: None,
            manifest_stored: false,
            state: SessionState::Created,
            audit,
        };
        session.record(AuditEvent::ContainerCreated {
            workspace: request.workspace,
            container: session.handle.location().to_string(),
        });
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Best-effort audit write.
    fn record(&self, event: AuditEvent) {
        if let Err(err) = self.audit.append(&AuditRecord::now(event)) {
            warn!(container = self.handle.id(), error = %err, "failed to write audit record");
        }
    }

    fn container(&self) -> String {
        self.handle.location().to_string()
    }

    fn uploaded_names(&self) -> Vec<String> {
        self.manifest.files.clone()
    }

    /// Mark file `index` failed and abort the session.
    fn fail_file(&mut self, index: usize, reason: String) {
        self.files[index].status = FileStatus::Failed;
        self.state = SessionState::Aborted(AbortReason::FileFailed);
        let file = self.files[index].blob_name.clone();
        warn!(
            container = self.handle.id(),
            file = %file,
            reason = %reason,
            "file failed, session aborted; container left uncommitted"
        );
        self.record(AuditEvent::FileFailed {
            container: self.container(),
            file,
            reason,
        });
        self.record(AuditEvent::SessionAborted {
            container: self.container(),
            reason: AbortReason::FileFailed,
        });
    }

    /// Upload the next pending file.
    ///
    /// Returns `Ok(None)` once every file is uploaded. The `UploadAttempted`
    /// record is made durable before the remote call; if that fails nothing
    /// is sent and the file stays pending.
    pub fn upload_next(&mut self) -> Result<Option<UploadOutcome>, CourierError> {
        if !matches!(self.state, SessionState::Created | SessionState::Uploading) {
            return Err(CourierError::InvalidState(self.state));
        }
        let Some(index) = self
            .files
            .iter()
            .position(|f| f.status == FileStatus::Pending)
        else {
            return Ok(None);
        };
        self.state = SessionState::Uploading;

        let path = self.files[index].path.clone();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.fail_file(index, "local file not found".into());
                return Err(CourierError::LocalFileNotFound(path));
            }
            Err(source) => {
                self.fail_file(index, source.to_string());
                return Err(CourierError::LocalFileRead { path, source });
            }
        };

        let blob_name = self.files[index].blob_name.clone();
        self.audit
            .append(&AuditRecord::now(AuditEvent::UploadAttempted {
                container: self.container(),
                file: blob_name.clone(),
            }))
            .map_err(CourierError::AuditFailure)?;

        debug!(container = self.handle.id(), file = %blob_name, size = bytes.len(), "uploading");
        match self.remote.put_blob(&self.handle, &blob_name, &bytes) {
            Ok(()) => {
                self.files[index].status = FileStatus::Uploaded;
                self.manifest.files.push(blob_name.clone());
                self.record(AuditEvent::FileUploaded {
                    container: self.container(),
                    file: blob_name.clone(),
                });
                Ok(Some(UploadOutcome {
                    blob_name,
                    bytes: bytes.len(),
                }))
            }
            Err(source) => {
                self.fail_file(index, source.to_string());
                Err(CourierError::FileUploadFailure {
                    file: blob_name,
                    uploaded: self.uploaded_names(),
                    source,
                })
            }
        }
    }

    /// Upload every remaining file, stopping at the first error.
    pub fn upload_all(&mut self) -> Result<(), CourierError> {
        while self.upload_next()?.is_some() {}
        Ok(())
    }

    fn commit_failed(&mut self, source: RemoteError) -> CourierError {
        self.state = SessionState::Aborted(AbortReason::CommitFailed);
        warn!(
            container = self.handle.id(),
            error = %source,
            "commit failed; data blobs are stored, finalize may be retried"
        );
        self.record(AuditEvent::CommitFailed {
            container: self.container(),
            reason: source.to_string(),
        });
        CourierError::CommitFailure {
            container: self.handle.id().to_string(),
            source,
        }
    }

    /// Write the manifest, commit the container, and return its id.
    ///
    /// Calling again after success returns the same id without touching the
    /// remote side. After a `CommitFailure` it may be called again: the
    /// manifest is not re-uploaded if it was already stored, and the commit
    /// is reissued.
    pub fn finalize(&mut self) -> Result<String, CourierError> {
        match self.state {
            SessionState::Committed => return Ok(self.handle.id().to_string()),
            SessionState::Created
            | SessionState::Uploading
            | SessionState::Aborted(AbortReason::CommitFailed) => {}
            state => return Err(CourierError::InvalidState(state)),
        }
        let pending = self
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Pending)
            .count();
        if pending > 0 {
            return Err(CourierError::IncompleteUpload { pending });
        }

        if !self.manifest_stored {
            let text = self
                .manifest_text
                .get_or_insert_with(|| self.manifest.render(Utc::now()))
                .clone();
            let blob = self.manifest.blob_name();
            if let Err(source) = self.remote.put_blob(&self.handle, &blob, text.as_bytes()) {
                return Err(self.commit_failed(source));
            }
            self.manifest_stored = true;
            self.record(AuditEvent::ManifestWritten {
                container: self.container(),
                blob,
            });
        }

        if let Err(source) = self.remote.commit_container(&self.handle) {
            return Err(self.commit_failed(source));
        }
        self.state = SessionState::Committed;
        info!(
            container = self.handle.id(),
            files = self.manifest.files.len(),
            "container committed"
        );
        self.record(AuditEvent::ContainerCommitted {
            container: self.container(),
        });
        Ok(self.handle.id().to_string())
    }

    /// Cancel the session without committing. The container is not deleted.
    /// No-op once the session is terminal.
    pub fn abort(&mut self) {
        if self.state.is_terminal() {
            debug!(state = %self.state, "abort on terminal session ignored");
            return;
        }
        self.state = SessionState::Aborted(AbortReason::Cancelled);
        warn!(
            container = self.handle.id(),
            "session cancelled; container left uncommitted"
        );
        self.record(AuditEvent::SessionAborted {
            container: self.container(),
            reason: AbortReason::Cancelled,
        });
    }

    pub fn report(&self) -> UploadReport {
        UploadReport {
            workspace: self.handle.workspace().to_string(),
            container_location: self.container(),
            container_id: self.handle.id().to_string(),
            state: self.state,
            files: self
                .files
                .iter()
                .map(|f| (f.blob_name.clone(), f.status))
                .collect(),
            orphaned: matches!(self.state, SessionState::Aborted(_)),
        }
    }
}
