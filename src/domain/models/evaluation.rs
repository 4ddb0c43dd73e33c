//! Evaluation result model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const MIN_BAND: f64 = 1.0;
pub const MAX_BAND: f64 = 9.0;

/// Speaking test section an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    /// Part 1: short interview questions
    ShortForm,
    /// Part 2: long turn
    LongForm,
    /// Part 3: two-way discussion
    Discussion,
}

impl PartKind {
    pub fn from_part(part: u8) -> Option<Self> {
        match part {
            1 => Some(Self::ShortForm),
            2 => Some(Self::LongForm),
            3 => Some(Self::Discussion),
            _ => None,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "short" | "short_form" | "part1" | "part_1" => Some(Self::ShortForm),
            "long" | "long_form" | "long_turn" | "part2" | "part_2" => Some(Self::LongForm),
            "discussion" | "reasoning" | "part3" | "part_3" => Some(Self::Discussion),
            _ => None,
        }
    }
}

/// Relative weight of each section in the overall band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_short_form_weight")]
    pub short_form: f64,
    #[serde(default = "default_long_form_weight")]
    pub long_form: f64,
    #[serde(default = "default_discussion_weight")]
    pub discussion: f64,
}

const fn default_short_form_weight() -> f64 {
    1.0
}

const fn default_long_form_weight() -> f64 {
    2.0
}

const fn default_discussion_weight() -> f64 {
    1.5
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            short_form: default_short_form_weight(),
            long_form: default_long_form_weight(),
            discussion: default_discussion_weight(),
        }
    }
}

impl ScoreWeights {
    pub fn weight(&self, kind: PartKind) -> f64 {
        match kind {
            PartKind::ShortForm => self.short_form,
            PartKind::LongForm => self.long_form,
            PartKind::Discussion => self.discussion,
        }
    }
}

/// Round to the nearest half band and clamp into `[1, 9]`.
pub fn round_band(score: f64) -> f64 {
    if !score.is_finite() {
        return MIN_BAND;
    }
    ((score * 2.0).round() / 2.0).clamp(MIN_BAND, MAX_BAND)
}

/// What the candidate said for one segment, as transcribed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub segment_id: String,
    pub part: u8,
    pub question: u32,
    pub text: String,
}

/// Outcome of a successful evaluation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub user_id: String,
    pub test_id: String,
    pub overall_score: f64,
    /// Rubric criterion name to band
    pub criteria: BTreeMap<String, f64>,
    /// The full structured report returned by the model
    pub report: serde_json::Value,
    pub transcripts: Vec<Transcript>,
    /// Client-fetchable URLs of the recordings, in segment order
    pub audio_urls: Vec<String>,
    pub model: String,
    pub caller_provided_key: bool,
    pub created_at: DateTime<Utc>,
}
