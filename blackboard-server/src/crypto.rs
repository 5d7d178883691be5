//! AES-256-GCM encryption at rest for protected-token payloads.
//!
//! A protected token's `encrypted_payload` is `nonce || ciphertext`; the
//! nonce is generated fresh per encryption and never reused for a given key.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use blackboard_core::{CoreError, CoreResult};

const NONCE_LEN: usize = 12;

pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> CoreResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CoreError::internal("failed to encrypt protected token payload"))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt(key: &[u8; 32], payload: &[u8]) -> CoreResult<Vec<u8>> {
    if payload.len() < NONCE_LEN {
        return Err(CoreError::invalid_token("protected token payload truncated"));
    }
    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CoreError::invalid_token("protected token decryption failed"))
}
