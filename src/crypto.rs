//! PIN-sealed authenticated encryption.
//!
//! This module is one of exactly two places in the crate that import `ring`
//! directly (the other is `keys`). All other modules seal and open payloads
//! exclusively through [`PinCipher`].
//!
//! Primitive choices:
//! - **KDF**: PBKDF2-HMAC-SHA256 with a fresh 16-byte salt per artifact
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit, generated fresh per operation via `SystemRandom`
//!
//! # Artifact layout
//! ```text
//! [ salt (16) ][ nonce (12) ][ ciphertext ][ GCM tag (16) ]
//!              \_______________ cipher frame _____________/
//! ```

use std::num::NonZeroU32;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::CourierError;
use crate::keys::{self, Salt, DEFAULT_ITERATIONS, SALT_LEN};

/// The AEAD algorithm used for every artifact.
static ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Shortest byte string that can be an artifact (empty plaintext).
pub const MIN_ARTIFACT_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// An encrypted, self-describing credential artifact.
///
/// Opaque to everything outside this module: the salt, nonce and tag are
/// carried inline, so the bytes alone plus the PIN are enough to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedArtifact(Vec<u8>);

impl EncryptedArtifact {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Standard-alphabet base64, for carrying the artifact in a JSON field.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Parse the output of [`to_base64`](Self::to_base64).
    pub fn from_base64(encoded: &str) -> Result<Self, CourierError> {
        STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|_| CourierError::MalformedArtifact)
    }
}

impl From<Vec<u8>> for EncryptedArtifact {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for EncryptedArtifact {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Seals and opens payloads under a PIN.
///
/// Stateless apart from the iteration count, so one value can be shared
/// across threads and used for any number of concurrent calls.
#[derive(Debug, Clone, Copy)]
pub struct PinCipher {
    iterations: NonZeroU32,
}

impl Default for PinCipher {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl PinCipher {
    /// Build a cipher with an explicit iteration count. Configuration is
    /// validated against `keys::MIN_ITERATIONS` before reaching this point.
    pub(crate) fn with_iterations(iterations: NonZeroU32) -> Self {
        Self { iterations }
    }

    pub fn iterations(&self) -> NonZeroU32 {
        self.iterations
    }

    /// Encrypt `plaintext` under `pin`.
    ///
    /// A fresh salt and nonce are drawn on every call, so sealing the same
    /// plaintext twice never produces the same artifact.
    pub fn seal(&self, plaintext: &[u8], pin: &str) -> Result<EncryptedArtifact, CourierError> {
        let salt = Salt::generate()?;
        let key = keys::derive_key(pin, &salt, self.iterations)?;
        let key = LessSafeKey::new(
            UnboundKey::new(ALGORITHM, key.as_bytes()).map_err(|_| CourierError::EncryptionFailure)?,
        );

        let nonce_bytes = generate_nonce()?;
        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| CourierError::EncryptionFailure)?;

        let mut output = Vec::with_capacity(SALT_LEN + NONCE_LEN + in_out.len());
        output.extend_from_slice(salt.as_bytes());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&in_out);
        Ok(EncryptedArtifact(output))
    }

    /// Decrypt an artifact produced by [`seal`](Self::seal).
    ///
    /// A wrong PIN and a tampered artifact both surface as
    /// `AuthenticationFailure`. The caller never receives partial plaintext.
    pub fn open(
        &self,
        artifact: &[u8],
        pin: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CourierError> {
        if artifact.len() < MIN_ARTIFACT_LEN {
            return Err(CourierError::MalformedArtifact);
        }
        let (salt_bytes, frame) = artifact.split_at(SALT_LEN);
        let (nonce_bytes, sealed) = frame.split_at(NONCE_LEN);

        let salt_bytes: [u8; SALT_LEN] = salt_bytes
            .try_into()
            .map_err(|_| CourierError::MalformedArtifact)?;
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CourierError::MalformedArtifact)?;

        let key = keys::derive_key(pin, &Salt::from_bytes(salt_bytes), self.iterations)?;
        let key = LessSafeKey::new(
            UnboundKey::new(ALGORITHM, key.as_bytes())
                .map_err(|_| CourierError::AuthenticationFailure)?,
        );

        let mut payload = Zeroizing::new(sealed.to_vec());
        let plaintext_len = key
            .open_in_place(nonce, Aad::empty(), &mut payload)
            .map_err(|_| CourierError::AuthenticationFailure)?
            .len();
        payload.truncate(plaintext_len);
        Ok(payload)
    }
}

fn generate_nonce() -> Result<[u8; NONCE_LEN], CourierError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf)
        .map_err(|_| CourierError::RandomnessFailure)?;
    Ok(buf)
}
