use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Read access to recorded audio.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the bytes stored at `path`.
    async fn get(&self, path: &str) -> DomainResult<Vec<u8>>;
}

/// Map a stored object path onto a client-fetchable URL.
pub fn public_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
