//! PIN-based key derivation.
//!
//! This is one of exactly two modules permitted to import `ring` directly
//! (the other is `crypto`). The derivation runs PBKDF2-HMAC-SHA256 over the
//! PIN with a per-artifact random salt.
//!
//! ```text
//! PBKDF2-HMAC-SHA256(
//!     password   = pin (UTF-8 bytes),
//!     salt       = 16 random bytes stored in front of the ciphertext,
//!     iterations = 100 000 by default,
//!     dk_len     = 32
//! )
//! ```

use std::num::NonZeroU32;

use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CourierError;

/// Size of the salt in bytes.
pub const SALT_LEN: usize = 16;

/// Size of a derived key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Lowest iteration count the crate accepts from configuration.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Iteration count used when none is configured.
pub const DEFAULT_ITERATIONS: NonZeroU32 = match NonZeroU32::new(MIN_ITERATIONS) {
    Some(n) => n,
    None => unreachable!(),
};

/// A random salt, generated fresh for every seal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Draw a new salt from the system RNG.
    pub fn generate() -> Result<Self, CourierError> {
        let rng = SystemRandom::new();
        let mut buf = [0u8; SALT_LEN];
        rng.fill(&mut buf)
            .map_err(|_| CourierError::RandomnessFailure)?;
        Ok(Self(buf))
    }

    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

/// A key derived from a PIN and salt.
///
/// - Not `Clone`. Each derived key serves one seal or open call.
/// - Zeroised on drop.
/// - Never logged or serialised; raw bytes stay inside the crate.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

/// Derive a key from `pin` and `salt`.
///
/// Deterministic for a given (pin, salt, iterations). An empty PIN is the
/// only input rejected here; length policy belongs to the profile layer.
pub fn derive_key(
    pin: &str,
    salt: &Salt,
    iterations: NonZeroU32,
) -> Result<DerivedKey, CourierError> {
    if pin.is_empty() {
        return Err(CourierError::InvalidPin);
    }

    let mut key = DerivedKey {
        bytes: [0u8; KEY_LEN],
    };
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt.as_bytes(),
        pin.as_bytes(),
        &mut key.bytes,
    );
    Ok(key)
}
