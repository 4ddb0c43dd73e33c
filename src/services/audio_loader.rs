//! Fetches recordings for a job from object storage.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Segment;
use crate::domain::ports::{public_url, Attachment, ObjectStore};

#[derive(Clone)]
pub struct AudioLoader {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl AudioLoader {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into(),
        }
    }

    /// Download every segment. Downloads run concurrently but the returned
    /// attachments keep the order of `segments`. Any failure fails the whole load.
    pub async fn load(&self, segments: &[Segment]) -> DomainResult<Vec<Attachment>> {
        let downloads = segments.iter().map(|segment| async move {
            let data = self.store.get(&segment.audio_path).await.inspect_err(|e| {
                warn!(segment_id = %segment.id, path = %segment.audio_path, error = %e, "Recording download failed");
            })?;
            debug!(segment_id = %segment.id, bytes = data.len(), "Recording downloaded");
            Ok::<_, DomainError>(Attachment {
                segment_id: segment.id.clone(),
                mime_type: segment.mime_type.clone(),
                data,
            })
        });
        try_join_all(downloads).await
    }

    /// Client-fetchable URLs in segment order.
    pub fn public_urls(&self, segments: &[Segment]) -> Vec<String> {
        segments
            .iter()
            .map(|s| public_url(&self.public_base_url, &s.audio_path))
            .collect()
    }
}
