//! Encrypted credential profiles.
//!
//! [`ProfileService`] composes key derivation, the cipher and the bundle
//! codec:
//!
//! ```text
//! fields -> bundle::encode_single -> PinCipher::seal -> EncryptedArtifact
//! EncryptedArtifact -> PinCipher::open -> bundle::decode [-> enforce_single]
//! ```

use std::num::NonZeroU32;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::bundle::{self, CredentialBundle};
use crate::config::CourierConfig;
use crate::crypto::{EncryptedArtifact, PinCipher};
use crate::error::CourierError;

/// Shortest PIN accepted when creating a profile.
pub const MIN_PIN_LEN: usize = 6;

/// How an artifact is expected to be shaped when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// A personal profile: exactly one workspace.
    Single,
    /// A combined profile: one or more workspaces.
    Combined,
}

/// The fields a user enters to create a profile.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub workspace_name: String,
    pub workspace_key: String,
    pub subscription_key: String,
    pub uploader_name: String,
}

/// File name offered when a profile is downloaded.
pub fn suggested_file_name(workspace_name: &str, uploader_name: &str) -> String {
    format!("{workspace_name}-{uploader_name}.mydre")
}

/// Creates, opens and combines PIN-sealed profiles.
pub struct ProfileService {
    cipher: PinCipher,
    min_pin_len: usize,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for ProfileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileService")
            .field("cipher", &self.cipher)
            .field("min_pin_len", &self.min_pin_len)
            .finish_non_exhaustive()
    }
}

impl ProfileService {
    /// A service with default KDF cost and PIN policy.
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            cipher: PinCipher::default(),
            min_pin_len: MIN_PIN_LEN,
            audit,
        }
    }

    /// A service using the `[kdf]` and `[profile]` sections of `config`.
    pub fn from_config(
        config: &CourierConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, CourierError> {
        config.validate()?;
        let iterations = NonZeroU32::new(config.kdf.iterations)
            .ok_or_else(|| CourierError::Config("kdf.iterations must be non-zero".into()))?;
        Ok(Self {
            cipher: PinCipher::with_iterations(iterations),
            min_pin_len: config.profile.min_pin_len,
            audit,
        })
    }

    fn check_pin_strength(&self, pin: &str) -> Result<(), CourierError> {
        if pin.chars().count() < self.min_pin_len {
            return Err(CourierError::WeakPin {
                min: self.min_pin_len,
            });
        }
        Ok(())
    }

    fn record(&self, event: AuditEvent) {
        if let Err(err) = self.audit.append(&AuditRecord::now(event)) {
            warn!(error = %err, "failed to write profile audit record");
        }
    }

    /// Seal a single-workspace profile under `pin`.
    pub fn create_profile(
        &self,
        fields: &NewProfile,
        pin: &str,
    ) -> Result<EncryptedArtifact, CourierError> {
        self.check_pin_strength(pin)?;
        let plaintext = bundle::encode_single(
            &fields.workspace_name,
            &fields.workspace_key,
            &fields.subscription_key,
            &fields.uploader_name,
        )?;
        let artifact = self.cipher.seal(&plaintext, pin)?;

        debug!(workspace = %fields.workspace_name, "profile created");
        self.record(AuditEvent::ProfileCreated {
            workspaces: vec![fields.workspace_name.clone()],
        });
        Ok(artifact)
    }

    /// Open an artifact. In `Single` mode a combined profile is rejected with
    /// `SchemaViolation` carrying its workspace count.
    pub fn open_profile(
        &self,
        artifact: &[u8],
        pin: &str,
        mode: OpenMode,
    ) -> Result<CredentialBundle, CourierError> {
        let plaintext = self.cipher.open(artifact, pin)?;
        let mut bundle = bundle::decode(&plaintext)?;
        if mode == OpenMode::Single {
            bundle = bundle::enforce_single(bundle)?;
        }

        debug!(workspaces = bundle.len(), ?mode, "profile opened");
        self.record(AuditEvent::ProfileOpened {
            workspaces: bundle.names(),
            mode,
        });
        Ok(bundle)
    }

    /// Open several single-workspace profiles sealed under `pin` and seal
    /// their union as one combined profile under the same PIN.
    pub fn combine_profiles(
        &self,
        artifacts: &[EncryptedArtifact],
        pin: &str,
    ) -> Result<EncryptedArtifact, CourierError> {
        self.check_pin_strength(pin)?;
        let bundles = artifacts
            .iter()
            .map(|artifact| {
                let plaintext = self.cipher.open(artifact.as_bytes(), pin)?;
                bundle::enforce_single(bundle::decode(&plaintext)?)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let combined = CredentialBundle::merge(&bundles)?;
        let plaintext = bundle::encode(&combined)?;
        let artifact = self.cipher.seal(&plaintext, pin)?;

        debug!(workspaces = combined.len(), "profiles combined");
        self.record(AuditEvent::ProfilesCombined {
            workspaces: combined.names(),
        });
        Ok(artifact)
    }
}
