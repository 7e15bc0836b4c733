//! # workspace-courier
//!
//! PIN-sealed workspace credential profiles and transactional uploads into
//! remote workspace containers.
//!
//! A profile bundles a workspace name, workspace key, subscription key and
//! uploader name, sealed under a short PIN into a portable artifact. An
//! upload session uses those credentials to allocate a remote container,
//! push files into it one at a time, write a manifest, and commit.
//!
//! ## Public API
//!
//! - [`ProfileService`]: `create_profile`, `open_profile`, `combine_profiles`
//! - [`PinCipher`]: raw `seal` / `open` of the artifact format
//! - [`bundle`]: the plaintext credential codec
//! - [`UploadSession`]: `start`, `upload_next`, `finalize`, `abort`, `report`
//! - [`remote`]: the container capability and its backends
//! - [`audit`]: injected audit sinks
//!
//! Key derivation is internal; derived keys never leave the crate.

// Module declarations.
pub mod audit;
pub mod bundle;
pub mod config;
pub mod crypto;
pub mod error;
pub(crate) mod keys;
pub mod profile;
pub mod remote;
pub mod session;

pub use audit::{AuditEvent, AuditLog, AuditRecord, AuditSink, FileAuditSink};
pub use bundle::{CredentialBundle, WorkspaceCredentials};
pub use config::CourierConfig;
pub use crypto::{EncryptedArtifact, PinCipher};
pub use error::CourierError;
pub use profile::{NewProfile, OpenMode, ProfileService};
pub use remote::{ContainerHandle, RemoteContainer, RemoteError, RemoteErrorKind};
pub use session::{
    AbortReason, FileStatus, SessionState, UploadReport, UploadRequest, UploadSession,
};
