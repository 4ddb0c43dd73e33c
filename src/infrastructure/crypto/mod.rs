//! Symmetric encryption of user-owned secrets.

pub mod secret_cipher;

pub use secret_cipher::{CipherError, SecretCipher};
