// Transfer-channel cipher: PBKDF2-HMAC-SHA256 key stretching + AES-256-GCM
//
// Flow:
// 1. key = PBKDF2-HMAC-SHA256(session_key, salt, 100 iterations, 32 bytes)
// 2. Encrypt: random 12-byte nonce, seal, emit nonce || ciphertext || tag
// 3. Decrypt: split the nonce off the front, open the rest
//
// The salt is generated by the sender (8 random bytes) and travels through
// the rendezvous in the clear.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// PBKDF2 iteration count. Changing this breaks compatibility with every peer.
pub const PBKDF2_ITERATIONS: u32 = 100;
/// Salt length in bytes.
pub const SALT_LEN: usize = 8;
/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// AES-GCM tag length in bytes.
pub const TAG_LEN: usize = 16;

const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("Invalid key length")]
    InvalidKey,
    #[error("Salt must be {SALT_LEN} bytes, got {0}")]
    InvalidSalt(usize),
    #[error("Frame too short to be a sealed message: {0} bytes")]
    Truncated(usize),
    #[error("Encryption failed")]
    Encrypt,
    #[error("Authentication tag mismatch")]
    Decrypt,
}

/// Generate a fresh random salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Stretch the PAKE session output into the AES-256 key.
fn derive_key(session_key: &[u8], salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(session_key, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Symmetric cipher bound to one transfer session.
///
/// Both the rendezvous channel and the direct channel of a transfer are
/// keyed from the same `(session_key, salt)` pair, so cloning is cheap and
/// expected.
#[derive(Clone)]
pub struct Cipher {
    aead: Aes256Gcm,
}

impl Cipher {
    /// Build a cipher from the PAKE session key and the transferred salt.
    pub fn new(session_key: &[u8], salt: &[u8]) -> Result<Self, CipherError> {
        if salt.len() != SALT_LEN {
            return Err(CipherError::InvalidSalt(salt.len()));
        }

        let mut key = derive_key(session_key, salt);
        let aead = Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::InvalidKey);
        key.zeroize();

        Ok(Self { aead: aead? })
    }

    /// Seal `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .aead
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a `nonce || ciphertext || tag` frame.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated(sealed.len()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.aead
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Decrypt)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
