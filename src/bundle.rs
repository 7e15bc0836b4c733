//! Credential bundles and their plaintext form.
//!
//! A bundle maps workspace names to the credentials needed to upload into
//! that workspace. The plaintext fed to the cipher is JSON of the shape
//!
//! ```text
//! { "workspaces": { <name>: { "workspace_key": str,
//!                             "subscription_key": str,
//!                             "uploader_name": str } } }
//! ```
//!
//! Single-profile artifacts hold exactly one entry. Combined artifacts hold
//! one or more, each independently valid.

use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CourierError;

/// Access credentials for one workspace. Zeroised on drop; `Debug` redacts
/// the keys.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct WorkspaceCredentials {
    pub workspace_key: String,
    pub subscription_key: String,
    pub uploader_name: String,
}

impl WorkspaceCredentials {
    pub fn new(
        workspace_key: impl Into<String>,
        subscription_key: impl Into<String>,
        uploader_name: impl Into<String>,
    ) -> Self {
        Self {
            workspace_key: workspace_key.into(),
            subscription_key: subscription_key.into(),
            uploader_name: uploader_name.into(),
        }
    }

    fn validate(&self) -> Result<(), CourierError> {
        if self.workspace_key.is_empty() {
            return Err(CourierError::EmptyField("workspace_key"));
        }
        if self.subscription_key.is_empty() {
            return Err(CourierError::EmptyField("subscription_key"));
        }
        if self.uploader_name.is_empty() {
            return Err(CourierError::EmptyField("uploader_name"));
        }
        Ok(())
    }
}

impl fmt::Debug for WorkspaceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceCredentials")
            .field("workspace_key", &"<redacted>")
            .field("subscription_key", &"<redacted>")
            .field("uploader_name", &self.uploader_name)
            .finish()
    }
}

/// A set of workspace credentials keyed by workspace name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    workspaces: BTreeMap<String, WorkspaceCredentials>,
}

impl CredentialBundle {
    /// A bundle holding one workspace.
    pub fn single(workspace_name: impl Into<String>, credentials: WorkspaceCredentials) -> Self {
        let mut workspaces = BTreeMap::new();
        workspaces.insert(workspace_name.into(), credentials);
        Self { workspaces }
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    pub fn get(&self, workspace_name: &str) -> Option<&WorkspaceCredentials> {
        self.workspaces.get(workspace_name)
    }

    /// Workspace names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.workspaces.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WorkspaceCredentials)> {
        self.workspaces.iter().map(|(name, creds)| (name.as_str(), creds))
    }

    /// The sole entry of a single-workspace bundle.
    pub fn sole_workspace(&self) -> Option<(&str, &WorkspaceCredentials)> {
        if self.workspaces.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }

    /// Merge bundles into one. Fails on the first workspace name that
    /// appears in more than one input.
    pub fn merge<'a>(
        bundles: impl IntoIterator<Item = &'a CredentialBundle>,
    ) -> Result<Self, CourierError> {
        let mut merged = BTreeMap::new();
        for bundle in bundles {
            for (name, creds) in &bundle.workspaces {
                match merged.entry(name.clone()) {
                    Entry::Occupied(_) => {
                        return Err(CourierError::DuplicateWorkspace(name.clone()))
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(creds.clone());
                    }
                }
            }
        }
        if merged.is_empty() {
            return Err(CourierError::MalformedBundle("nothing to combine".into()));
        }
        Ok(Self { workspaces: merged })
    }

    fn validate(&self) -> Result<(), CourierError> {
        if self.workspaces.is_empty() {
            return Err(CourierError::MalformedBundle("no workspaces".into()));
        }
        for (name, creds) in &self.workspaces {
            if name.is_empty() {
                return Err(CourierError::MalformedBundle("empty workspace name".into()));
            }
            creds.validate().map_err(|err| {
                CourierError::MalformedBundle(format!("workspace {name}: {err}"))
            })?;
        }
        Ok(())
    }
}

/// Serialise a bundle to its plaintext form.
pub fn encode(bundle: &CredentialBundle) -> Result<Zeroizing<Vec<u8>>, CourierError> {
    serde_json::to_vec(bundle)
        .map(Zeroizing::new)
        .map_err(|err| CourierError::MalformedBundle(err.to_string()))
}

/// Build and serialise a one-entry bundle.
pub fn encode_single(
    workspace_name: &str,
    workspace_key: &str,
    subscription_key: &str,
    uploader_name: &str,
) -> Result<Zeroizing<Vec<u8>>, CourierError> {
    if workspace_name.is_empty() {
        return Err(CourierError::EmptyField("workspace_name"));
    }
    let credentials = WorkspaceCredentials::new(workspace_key, subscription_key, uploader_name);
    credentials.validate()?;
    encode(&CredentialBundle::single(workspace_name, credentials))
}

/// Merge several bundles and serialise the result.
pub fn encode_combined(bundles: &[CredentialBundle]) -> Result<Zeroizing<Vec<u8>>, CourierError> {
    encode(&CredentialBundle::merge(bundles)?)
}

/// Parse a plaintext bundle. Unknown fields are ignored; missing or empty
/// required fields are not.
pub fn decode(bytes: &[u8]) -> Result<CredentialBundle, CourierError> {
    let bundle: CredentialBundle = serde_json::from_slice(bytes)
        .map_err(|err| CourierError::MalformedBundle(err.to_string()))?;
    bundle.validate()?;
    Ok(bundle)
}

/// Require exactly one workspace.
pub fn enforce_single(bundle: CredentialBundle) -> Result<CredentialBundle, CourierError> {
    match bundle.len() {
        1 => Ok(bundle),
        count => Err(CourierError::SchemaViolation(count)),
    }
}
