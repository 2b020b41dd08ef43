//! Secret encryption using AES-256-GCM
//!
//! The key is the SHA-256 digest of a passphrase. Ciphertexts are stored as
//! base64 of `nonce || ciphertext`.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::backend::{StoreError, StoreResult};

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
const KEY_SIZE: usize = 32;

/// Encrypts and decrypts secret values with a passphrase-derived key
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; KEY_SIZE],
}

impl SecretCipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let key: [u8; KEY_SIZE] = Sha256::digest(passphrase.as_bytes()).into();
        Self { key }
    }

    fn cipher(&self) -> StoreResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| StoreError::Secret(format!("Failed to create cipher: {e}")))
    }

    /// Encrypt a value; every call uses a fresh random nonce
    pub fn encrypt(&self, plaintext: &str) -> StoreResult<String> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::Secret(format!("Encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a value produced by [`SecretCipher::encrypt`]
    pub fn decrypt(&self, sealed: &str) -> StoreResult<String> {
        let cipher = self.cipher()?;

        let sealed = BASE64
            .decode(sealed)
            .map_err(|e| StoreError::Secret(format!("Invalid ciphertext base64: {e}")))?;

        if sealed.len() < NONCE_SIZE {
            return Err(StoreError::Secret("Ciphertext is too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                StoreError::Secret("Decryption failed (wrong passphrase?)".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| StoreError::Secret(format!("Invalid UTF-8 in decrypted value: {e}")))
    }
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}
