//! The remote container capability.
//!
//! An upload session only needs three operations from the storage service:
//! allocate a container, store a named blob in it, and commit it. Backends:
//!
//! - [`http::HttpContainerService`]: the workspace API over HTTPS
//! - [`memory::InMemoryContainers`]: an in-process fake with failure injection
//! - [`retry::Retrying`]: wraps any backend and retries transient failures

pub mod http;
pub mod memory;
pub mod retry;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque location of an allocated container.
///
/// Not `Clone`: a handle belongs to exactly one upload session.
#[derive(Debug, PartialEq, Eq)]
pub struct ContainerHandle {
    workspace: String,
    location: String,
}

impl ContainerHandle {
    pub fn new(workspace: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            location: location.into(),
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// The location token returned at allocation.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The container identifier: the last path segment of the location,
    /// ignoring any query string.
    pub fn id(&self) -> &str {
        let path = self
            .location
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.location);
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(path)
    }
}

/// How a remote failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Timeouts, connection failures, 5xx and throttling. Worth retrying.
    Transient,
    /// The service refused the request. Retrying will not help.
    Rejected,
    /// The service answered in a way the client does not understand.
    Protocol,
}

/// A failure reported by a remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    kind: RemoteErrorKind,
    message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Protocol, message)
    }

    pub fn kind(&self) -> RemoteErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RemoteErrorKind::Transient => "transient",
            RemoteErrorKind::Rejected => "rejected",
            RemoteErrorKind::Protocol => "protocol",
        };
        write!(f, "{kind} remote error: {}", self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Create, populate and commit remote containers.
///
/// Calls are synchronous and may block on the network. Implementations own
/// their timeout policy and report failures instead of swallowing them.
/// `commit_container` must be idempotent.
pub trait RemoteContainer {
    fn create_container(&self, workspace: &str, title: &str)
        -> Result<ContainerHandle, RemoteError>;

    fn put_blob(&self, handle: &ContainerHandle, name: &str, bytes: &[u8])
        -> Result<(), RemoteError>;

    fn commit_container(&self, handle: &ContainerHandle) -> Result<(), RemoteError>;
}

impl<T: RemoteContainer + ?Sized> RemoteContainer for &T {
    fn create_container(
        &self,
        workspace: &str,
        title: &str,
    ) -> Result<ContainerHandle, RemoteError> {
        (**self).create_container(workspace, title)
    }

    fn put_blob(
        &self,
        handle: &ContainerHandle,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), RemoteError> {
        (**self).put_blob(handle, name, bytes)
    }

    fn commit_container(&self, handle: &ContainerHandle) -> Result<(), RemoteError> {
        (**self).commit_container(handle)
    }
}

impl<T: RemoteContainer + ?Sized> RemoteContainer for Arc<T> {
    fn create_container(
        &self,
        workspace: &str,
        title: &str,
    ) -> Result<ContainerHandle, RemoteError> {
        (**self).create_container(workspace, title)
    }

    fn put_blob(
        &self,
        handle: &ContainerHandle,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), RemoteError> {
        (**self).put_blob(handle, name, bytes)
    }

    fn commit_container(&self, handle: &ContainerHandle) -> Result<(), RemoteError> {
        (**self).commit_container(handle)
    }
}
