//! Filesystem-backed object store rooted at a directory.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::ObjectStore;

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` under the root, refusing anything that would escape it.
    fn resolve(&self, path: &str) -> DomainResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(DomainError::ValidationFailed(format!(
                        "invalid object path: {path}"
                    )))
                }
            }
        }
        if resolved == self.root {
            return Err(DomainError::ValidationFailed("empty object path".to_string()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, path: &str) -> DomainResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DomainError::ObjectNotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
