//! In-process container backend.
//!
//! Keeps every container and blob in memory, records the order blobs
//! arrive in, and can be told to fail allocation, specific blobs, or
//! commits. Used by the test suite and for dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{ContainerHandle, RemoteContainer, RemoteError, RemoteErrorKind};

#[derive(Debug, Default)]
struct StoredContainer {
    workspace: String,
    title: String,
    blobs: Vec<(String, Vec<u8>)>,
    commits: u32,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    kind: RemoteErrorKind,
    /// `None` fails forever.
    remaining: Option<u32>,
}

impl Failure {
    /// Consume one failure. Returns true if this call should fail.
    fn fire(&mut self) -> bool {
        match &mut self.remaining {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    containers: BTreeMap<String, StoredContainer>,
    create_failure: Option<Failure>,
    blob_failures: HashMap<String, Failure>,
    commit_failure: Option<Failure>,
    calls: u64,
}

/// An in-memory [`RemoteContainer`].
#[derive(Debug, Default)]
pub struct InMemoryContainers {
    state: Mutex<State>,
}

impl InMemoryContainers {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject every container allocation.
    pub fn fail_create(&self) {
        self.state().create_failure = Some(Failure {
            kind: RemoteErrorKind::Rejected,
            remaining: None,
        });
    }

    /// Reject every upload of a blob named `name`.
    pub fn fail_blob(&self, name: &str) {
        self.state().blob_failures.insert(
            name.to_string(),
            Failure {
                kind: RemoteErrorKind::Rejected,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` uploads of `name` with a transient error.
    pub fn fail_blob_transiently(&self, name: &str, times: u32) {
        self.state().blob_failures.insert(
            name.to_string(),
            Failure {
                kind: RemoteErrorKind::Transient,
                remaining: Some(times),
            },
        );
    }

    /// Fail the next `times` commits with a transient error.
    pub fn fail_next_commits(&self, times: u32) {
        self.state().commit_failure = Some(Failure {
            kind: RemoteErrorKind::Transient,
            remaining: Some(times),
        });
    }

    /// Number of containers allocated so far.
    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn title(&self, location: &str) -> Option<String> {
        self.state().containers.get(location).map(|c| c.title.clone())
    }

    pub fn workspace(&self, location: &str) -> Option<String> {
        self.state()
            .containers
            .get(location)
            .map(|c| c.workspace.clone())
    }

    /// Blob names in the order they were stored.
    pub fn blob_names(&self, location: &str) -> Vec<String> {
        self.state()
            .containers
            .get(location)
            .map(|c| c.blobs.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    /// Contents of the most recent upload of `name`.
    pub fn blob(&self, location: &str, name: &str) -> Option<Vec<u8>> {
        self.state().containers.get(location).and_then(|c| {
            c.blobs
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, bytes)| bytes.clone())
        })
    }

    pub fn commit_count(&self, location: &str) -> u32 {
        self.state()
            .containers
            .get(location)
            .map_or(0, |c| c.commits)
    }

    pub fn is_committed(&self, location: &str) -> bool {
        self.commit_count(location) > 0
    }

    /// Total remote calls received, failed ones included.
    pub fn call_count(&self) -> u64 {
        self.state().calls
    }
}

fn check(failure: &mut Option<Failure>, what: &str) -> Result<(), RemoteError> {
    if let Some(f) = failure.as_mut() {
        if f.fire() {
            return Err(RemoteError::new(f.kind, format!("injected {what} failure")));
        }
    }
    Ok(())
}

impl RemoteContainer for InMemoryContainers {
    fn create_container(
        &self,
        workspace: &str,
        title: &str,
    ) -> Result<ContainerHandle, RemoteError> {
        let mut state = self.state();
        state.calls += 1;
        check(&mut state.create_failure, "create")?;

        state.next_id += 1;
        let location = format!(
            "memory://{workspace}/containers/{:08}",
            state.next_id
        );
        state.containers.insert(
            location.clone(),
            StoredContainer {
                workspace: workspace.to_string(),
                title: title.to_string(),
                ..StoredContainer::default()
            },
        );
        Ok(ContainerHandle::new(workspace, location))
    }

    fn put_blob(
        &self,
        handle: &ContainerHandle,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls += 1;
        let mut failure = state.blob_failures.get(name).copied();
        let outcome = check(&mut failure, "blob");
        if let Some(f) = failure {
            state.blob_failures.insert(name.to_string(), f);
        }
        outcome?;

        let container = state
            .containers
            .get_mut(handle.location())
            .ok_or_else(|| RemoteError::rejected("unknown container"))?;
        container.blobs.push((name.to_string(), bytes.to_vec()));
        Ok(())
    }

    fn commit_container(&self, handle: &ContainerHandle) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls += 1;
        check(&mut state.commit_failure, "commit")?;

        let container = state
            .containers
            .get_mut(handle.location())
            .ok_or_else(|| RemoteError::rejected("unknown container"))?;
        container.commits += 1;
        Ok(())
    }
}
