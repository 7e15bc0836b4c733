//! Error types for workspace-courier.
//!
//! Cryptographic and codec failures are distinct variants so callers can tell
//! "wrong PIN" apart from "corrupted file" and "wrong kind of file". Messages
//! never include PINs, keys or plaintext.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;
use crate::session::SessionState;

/// The single error type for all workspace-courier operations.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The PIN was empty and cannot be used for key derivation.
    #[error("invalid pin")]
    InvalidPin,

    /// The PIN is shorter than the configured minimum.
    #[error("pin must be at least {min} characters long")]
    WeakPin { min: usize },

    /// The artifact is too short to contain a salt, nonce and tag, or its
    /// transport encoding is broken.
    #[error("malformed artifact")]
    MalformedArtifact,

    /// The authentication tag did not verify. Covers both a wrong PIN and
    /// tampered or corrupted ciphertext; the two are deliberately not told apart.
    #[error("authentication failed: wrong pin or corrupted file")]
    AuthenticationFailure,

    /// The decrypted payload is not a credential bundle.
    #[error("malformed credential bundle: {0}")]
    MalformedBundle(String),

    /// A combined bundle was supplied where a single-workspace one is required.
    #[error(
        "this is a combined configuration file with {0} workspaces; \
         use a single-workspace file here"
    )]
    SchemaViolation(usize),

    /// Two bundles being combined share a workspace name.
    #[error("duplicate workspace: {0}")]
    DuplicateWorkspace(String),

    /// A credential field was empty.
    #[error("credential field `{0}` must not be empty")]
    EmptyField(&'static str),

    /// The AEAD seal operation failed.
    #[error("encryption failed")]
    EncryptionFailure,

    /// The system random number generator failed.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// The remote service could not allocate a container.
    #[error("could not allocate a container in workspace {workspace}: {source}")]
    ContainerAllocationFailure {
        workspace: String,
        #[source]
        source: RemoteError,
    },

    /// A data blob was rejected. `uploaded` lists the blobs stored before it.
    #[error("upload of {file} failed: {source}")]
    FileUploadFailure {
        file: String,
        uploaded: Vec<String>,
        #[source]
        source: RemoteError,
    },

    /// Writing the manifest or committing the container failed. The data
    /// blobs are in place; `finalize` may be retried.
    #[error("commit of container {container} failed: {source}")]
    CommitFailure {
        container: String,
        #[source]
        source: RemoteError,
    },

    /// A file in the upload list does not exist.
    #[error("local file not found: {}", .0.display())]
    LocalFileNotFound(PathBuf),

    /// A file in the upload list exists but could not be read.
    #[error("could not read {}: {source}", .path.display())]
    LocalFileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Two files in one session map to the same blob name.
    #[error("duplicate file name in upload: {0}")]
    DuplicateFileName(String),

    /// `finalize` was called while files were still pending.
    #[error("{pending} file(s) have not been uploaded yet")]
    IncompleteUpload { pending: usize },

    /// The operation is not valid in the session's current state.
    #[error("operation not valid in session state {0}")]
    InvalidState(SessionState),

    /// The write-ahead audit record could not be made durable.
    #[error("audit sink write failed: {0}")]
    AuditFailure(#[source] io::Error),

    /// The configuration is unreadable or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}
