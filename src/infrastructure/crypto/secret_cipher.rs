//! AES-256-GCM cipher keyed by the SHA-256 digest of an application passphrase.
//!
//! Stored format is `base64(nonce || ciphertext)` with a 96-bit random nonce.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("Encryption key is empty")]
    EmptyKey,
    #[error("Ciphertext is not valid base64: {0}")]
    InvalidEncoding(String),
    #[error("Ciphertext is too short")]
    Truncated,
    #[error("Encryption failed")]
    EncryptFailed,
    #[error("Decryption failed: wrong key or corrupted data")]
    DecryptFailed,
    #[error("Decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretCipher { .. }")
    }
}

impl SecretCipher {
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CipherError> {
        if passphrase.is_empty() {
            return Err(CipherError::EmptyKey);
        }
        let digest = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest).map_err(|_| CipherError::EmptyKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptFailed)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let payload = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidEncoding(e.to_string()))?;
        if payload.len() <= NONCE_LEN {
            return Err(CipherError::Truncated);
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = SecretCipher::from_passphrase("app-wide passphrase").unwrap();
        let sealed = cipher.encrypt("AIzaSy-user-key").unwrap();
        assert_ne!(sealed, "AIzaSy-user-key");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "AIzaSy-user-key");
    }

    #[test]
    fn test_nonce_is_random() {
        let cipher = SecretCipher::from_passphrase("k").unwrap();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SecretCipher::from_passphrase("right").unwrap().encrypt("secret").unwrap();
        let other = SecretCipher::from_passphrase("wrong").unwrap();
        assert_eq!(other.decrypt(&sealed), Err(CipherError::DecryptFailed));
    }

    #[test]
    fn test_malformed_input() {
        let cipher = SecretCipher::from_passphrase("k").unwrap();
        assert!(matches!(cipher.decrypt("%%%"), Err(CipherError::InvalidEncoding(_))));
        assert_eq!(cipher.decrypt(&STANDARD.encode([0u8; 8])), Err(CipherError::Truncated));
        assert_eq!(SecretCipher::from_passphrase("").unwrap_err(), CipherError::EmptyKey);
    }
}
