//! Retry adapter for remote backends.
//!
//! Upload sessions never retry on their own. Wrapping a backend in
//! [`Retrying`] retries transient failures before the session sees them;
//! rejected and protocol errors pass through on the first attempt.

use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use tracing::warn;

use super::{ContainerHandle, RemoteContainer, RemoteError};
use crate::config::RetryConfig;

/// How many times to try a call and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroU32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: NonZeroU32::new(config.max_attempts).unwrap_or(NonZeroU32::MIN),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// A [`RemoteContainer`] that retries transient failures of `inner`.
#[derive(Debug)]
pub struct Retrying<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: RemoteContainer> Retrying<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    fn run<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let max = self.policy.max_attempts.get();
        let mut attempt = 1;
        loop {
            match call() {
                Err(err) if err.is_transient() && attempt < max => {
                    warn!(operation, attempt, max, error = %err, "transient remote failure, retrying");
                    attempt += 1;
                    if !self.policy.backoff.is_zero() {
                        thread::sleep(self.policy.backoff);
                    }
                }
                outcome => return outcome,
            }
        }
    }
}

impl<R: RemoteContainer> RemoteContainer for Retrying<R> {
    fn create_container(
        &self,
        workspace: &str,
        title: &str,
    ) -> Result<ContainerHandle, RemoteError> {
        // A create that timed out may still have allocated a container; the
        // retry then leaves an orphan, same as an aborted session.
        self.run("create_container", || self.inner.create_container(workspace, title))
    }

    fn put_blob(
        &self,
        handle: &ContainerHandle,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), RemoteError> {
        self.run("put_blob", || self.inner.put_blob(handle, name, bytes))
    }

    fn commit_container(&self, handle: &ContainerHandle) -> Result<(), RemoteError> {
        self.run("commit_container", || self.inner.commit_container(handle))
    }
}
