//! Common test utilities for integration tests
//!
//! Builds a fully wired application over a temp-file database, a temp
//! directory of recordings and a scripted model client.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use speakeval::adapters::model::{MockModelClient, MockReply};
use speakeval::adapters::sqlite::initialize_database;
use speakeval::adapters::storage::FsObjectStore;
use speakeval::domain::models::{Config, Job, ModelCategory, ModelSpec, Segment};
use speakeval::{AppContext, Repositories};

pub const SPEECH_MODEL: &str = "speech-pro";
pub const LITE_MODEL: &str = "speech-lite";

/// A report the result assembler scores at 6.5.
pub const GOOD_REPORT: &str = r#"{
  "overall_score": 6.5,
  "criteria": {
    "fluency_coherence": 6.5,
    "lexical_resource": 6.0,
    "grammatical_range_accuracy": 6.5,
    "pronunciation": 7.0
  },
  "items": [
    {"segment_id": "s1", "part": 1, "question": 1, "transcript": "I live in a small town.", "score": 6.0},
    {"segment_id": "s2", "part": 1, "question": 2, "transcript": "I study engineering.", "score": 6.5},
    {"segment_id": "s3", "part": 2, "question": 1, "transcript": "The place I want to describe...", "score": 7.0}
  ],
  "feedback": "Clear answers with a good range of vocabulary."
}"#;

pub struct TestApp {
    pub ctx: AppContext,
    pub client: MockModelClient,
    pub dir: TempDir,
}

/// Configuration tuned for fast tests.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = dir.path().join("speakeval.db").display().to_string();
    config.storage.root = dir.path().join("audio");
    config.storage.public_base_url = "https://cdn.example.test/audio".to_string();
    config.secrets.encryption_key = Some("integration-test-passphrase".to_string());
    config.model_api.models = vec![
        ModelSpec::new(SPEECH_MODEL, ModelCategory::Speech),
        ModelSpec::new(LITE_MODEL, ModelCategory::Lightweight),
    ];
    config.retry.max_attempts = 2;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.retry.max_server_delay_ms = 5;
    config.jobs.watchdog_secs = 30;
    config
}

impl TestApp {
    pub async fn new(default_reply: MockReply) -> Self {
        Self::with_config(default_reply, |_| {}).await
    }

    pub async fn with_config(default_reply: MockReply, adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = test_config(&dir);
        adjust(&mut config);

        let db = initialize_database(&config.database.url(), None)
            .await
            .expect("Failed to initialize database");
        let objects = Arc::new(FsObjectStore::new(config.storage.root.clone()));
        let client = MockModelClient::new(default_reply);
        let ctx = AppContext::new(
            config,
            Repositories::sqlite(&db, objects),
            Arc::new(client.clone()),
        )
        .expect("Failed to build context");

        Self { ctx, client, dir }
    }

    /// Store a recording under the object root.
    pub fn write_audio(&self, path: &str, bytes: &[u8]) {
        let full: PathBuf = self.ctx.config.storage.root.join(path);
        std::fs::create_dir_all(full.parent().expect("audio path has a parent"))
            .expect("Failed to create audio dir");
        std::fs::write(full, bytes).expect("Failed to write audio");
    }

    /// Segments s1..s3 with their recordings written to storage.
    pub fn recorded_segments(&self, user: &str, test: &str) -> Vec<Segment> {
        let segments = vec![
            segment("s3", 2, 1, &format!("{user}/{test}/s3.webm")),
            segment("s1", 1, 1, &format!("{user}/{test}/s1.webm")),
            segment("s2", 1, 2, &format!("{user}/{test}/s2.webm")),
        ];
        for s in &segments {
            self.write_audio(&s.audio_path, s.id.as_bytes());
        }
        segments
    }

    pub async fn add_key(&self, label: &str, secret: &str) -> Uuid {
        self.ctx
            .pool
            .add(label, secret)
            .await
            .expect("Failed to add key")
            .id
    }

    /// Poll until the job is terminal.
    pub async fn wait_terminal(&self, job_id: Uuid, timeout: Duration) -> Job {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self
                .ctx
                .jobs
                .get(job_id, None)
                .await
                .expect("Failed to load job");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} still {} after {timeout:?}",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn segment(id: &str, part: u8, question: u32, audio_path: &str) -> Segment {
    Segment {
        id: id.to_string(),
        part,
        question,
        question_text: format!("Question {question} of part {part}"),
        audio_path: audio_path.to_string(),
        mime_type: "audio/webm".to_string(),
    }
}
