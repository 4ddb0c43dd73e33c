//! Model client port - interface for the generative model endpoint.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Binary input handed to the model, in submission order.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Segment the bytes belong to
    pub segment_id: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("segment_id", &self.segment_id)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One generation call's payload, independent of credential and model.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub attachments: Vec<Attachment>,
    pub instruction: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Failure of a single model call as seen at the wire boundary.
///
/// `status` is `None` for transport failures that never produced a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("model call failed (status {status:?}): {message}")]
pub struct ModelCallError {
    pub status: Option<u16>,
    pub message: String,
    /// Delay the server asked for before retrying
    pub retry_after: Option<Duration>,
}

impl ModelCallError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Generative model backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Call `model` with `api_key`, returning the raw text output.
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<String, ModelCallError>;
}
