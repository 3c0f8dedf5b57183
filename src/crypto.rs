//! Link encryption primitives and identity derivation.
//!
//! Provides the AES-256-GCM encrypt/decrypt operations used for every
//! payload that crosses the signaling server, plus derivation of the
//! [`LinkId`] and [`EncryptionKey`] from the out-of-band connection secret.
//!
//! # Wire Format
//!
//! Ciphertexts are self-contained: a fresh 12-byte random nonce is generated
//! per call and prepended to the AES-GCM output, so decryption needs nothing
//! beyond the key:
//!
//! ```text
//! [nonce: 12 bytes][ciphertext + 16-byte auth tag]
//! ```
//!
//! The signaling layer hex-encodes this blob into `encryptedPayload`.
//! Because the nonce is random, encrypting the same plaintext twice yields
//! different ciphertexts; callers must not rely on deterministic output.

// Rust guideline compliant 2026-02

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::Result;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size.
const TAG_SIZE: usize = 16;

/// Connection secret size (256-bit connection password from the pairing QR).
pub const SECRET_SIZE: usize = 32;

/// The shared connection secret exchanged out-of-band (pairing QR code).
///
/// Both the wallet and the extension derive the same [`LinkId`] and
/// [`EncryptionKey`] from this value. Zeroed on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ConnectionSecret([u8; SECRET_SIZE]);

impl ConnectionSecret {
    /// Wrap raw secret bytes.
    #[must_use]
    pub fn new(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse the hex form carried by the pairing QR / connection password.
    ///
    /// # Errors
    ///
    /// Returns [`SecretParseError`] if the input is not valid hex or does
    /// not decode to exactly 32 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self, SecretParseError> {
        let decoded = hex::decode(hex_str.trim()).map_err(|_| SecretParseError::Encoding)?;
        let bytes: [u8; SECRET_SIZE] = decoded
            .try_into()
            .map_err(|_| SecretParseError::Length)?;
        Ok(Self(bytes))
    }

    /// Derive the stable link identifier: hex(SHA-256(secret)).
    ///
    /// Deterministic by construction; both peers compute the same id.
    #[must_use]
    pub fn derive_link_id(&self) -> LinkId {
        let digest = Sha256::digest(self.0);
        LinkId(hex::encode(digest))
    }

    /// Derive the symmetric key. The 256-bit secret is used directly as
    /// the AES-256-GCM key.
    #[must_use]
    pub fn derive_encryption_key(&self) -> EncryptionKey {
        EncryptionKey(self.0)
    }
}

impl std::fmt::Debug for ConnectionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material
        f.write_str("ConnectionSecret(..)")
    }
}

/// Symmetric key for one link. Read-only after derivation; shared freely
/// between the Signaling Client and Peer Transport of that link.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; SECRET_SIZE]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Stable identifier for one link, derived from the connection secret.
///
/// Doubles as the `connectionId` query value / envelope field on the
/// signaling wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    /// The hex string form used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Truncate for log readability
        if self.0.len() > 16 {
            write!(f, "{}...", &self.0[..16])
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Failed to parse a connection secret from its text form.
#[derive(Debug, PartialEq, Eq)]
pub enum SecretParseError {
    /// Input was not valid hex.
    Encoding,
    /// Decoded to something other than 32 bytes.
    Length,
}

impl std::fmt::Display for SecretParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoding => write!(f, "connection secret is not valid hex"),
            Self::Length => write!(f, "connection secret must decode to 32 bytes"),
        }
    }
}

impl std::error::Error for SecretParseError {}

/// Decryption failure. Recovered locally: a failed decrypt downgrades one
/// message, it never tears down the link by itself.
#[derive(Debug, PartialEq, Eq)]
pub enum DecryptError {
    /// Ciphertext shorter than nonce + auth tag; malformed or truncated.
    Truncated,
    /// Authentication tag mismatch: wrong key or tampered payload.
    Authentication,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "ciphertext truncated"),
            Self::Authentication => write!(f, "authentication failed"),
        }
    }
}

impl std::error::Error for DecryptError {}

/// Encrypt plaintext under the link key with a fresh random nonce.
///
/// Output is `nonce || ciphertext` (see module docs). Two calls with the
/// same inputs produce different outputs.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext` blob produced by [`encrypt`].
pub fn decrypt(key: &EncryptionKey, data: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(DecryptError::Truncated);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| DecryptError::Authentication)
}
