//! Mock model client for testing.
//!
//! Replies are scripted per (api key, model) pair and consumed in order;
//! when a pair's script runs dry the default reply is used. Every call is
//! recorded so tests can assert which keys and models were tried and in
//! what order attachments arrived.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::ports::{GenerationRequest, ModelCallError, ModelClient};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Error(ModelCallError),
    /// Sleep, then answer with the inner reply
    Delayed(Duration, Box<MockReply>),
    /// Panic inside the call, as a buggy backend would
    Panic(String),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn error(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Error(ModelCallError::new(status, message))
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::Error(
            ModelCallError::new(Some(429), "Resource has been exhausted, please retry")
                .with_retry_after(retry_after),
        )
    }

    pub fn quota_exhausted() -> Self {
        Self::Error(ModelCallError::new(
            Some(429),
            "You exceeded your current quota, please check your plan and billing details",
        ))
    }

    pub fn delayed(delay: Duration, reply: MockReply) -> Self {
        Self::Delayed(delay, Box::new(reply))
    }
}

/// A call the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub api_key: String,
    pub model: String,
    /// Segment ids of the attachments, in the order received
    pub segment_ids: Vec<String>,
}

/// Scripted model client.
#[derive(Clone)]
pub struct MockModelClient {
    scripts: Arc<Mutex<HashMap<(String, String), VecDeque<MockReply>>>>,
    default_reply: MockReply,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockModelClient {
    pub fn new(default_reply: MockReply) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
            default_reply,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue replies for calls made with `api_key` against `model`.
    pub async fn script(&self, api_key: &str, model: &str, replies: Vec<MockReply>) {
        self.scripts
            .lock()
            .await
            .entry((api_key.to_string(), model.to_string()))
            .or_default()
            .extend(replies);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    async fn next_reply(&self, api_key: &str, model: &str) -> MockReply {
        self.scripts
            .lock()
            .await
            .get_mut(&(api_key.to_string(), model.to_string()))
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<String, ModelCallError> {
        self.calls.lock().await.push(RecordedCall {
            api_key: api_key.to_string(),
            model: model.to_string(),
            segment_ids: request
                .attachments
                .iter()
                .map(|a| a.segment_id.clone())
                .collect(),
        });

        let mut reply = self.next_reply(api_key, model).await;
        loop {
            match reply {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(err) => return Err(err),
                MockReply::Panic(message) => panic!("{message}"),
                MockReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_request() -> GenerationRequest {
        GenerationRequest {
            attachments: vec![],
            instruction: String::new(),
            temperature: 0.0,
            max_output_tokens: 1,
        }
    }

    #[tokio::test]
    async fn test_scripts_are_consumed_in_order() {
        let mock = MockModelClient::new(MockReply::text("default"));
        mock.script("k", "m", vec![MockReply::quota_exhausted(), MockReply::text("second")])
            .await;

        assert!(mock.generate("k", "m", &empty_request()).await.is_err());
        assert_eq!(mock.generate("k", "m", &empty_request()).await.unwrap(), "second");
        assert_eq!(mock.generate("k", "m", &empty_request()).await.unwrap(), "default");
        assert_eq!(mock.generate("other", "m", &empty_request()).await.unwrap(), "default");
        assert_eq!(mock.calls().await.len(), 4);
    }
}
