use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Encrypted per-user secrets. Values go in and come out as ciphertext;
/// decryption is the caller's concern.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn encrypted_secret(&self, user_id: &str, name: &str) -> DomainResult<Option<String>>;

    async fn put_encrypted_secret(
        &self,
        user_id: &str,
        name: &str,
        ciphertext: &str,
    ) -> DomainResult<()>;

    async fn delete_secret(&self, user_id: &str, name: &str) -> DomainResult<bool>;
}
