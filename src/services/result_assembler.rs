//! Turns a parsed model report into a stored evaluation result.
//!
//! Overall band precedence:
//! 1. an explicit overall score in the report;
//! 2. the weighted mean of per-section means, `Σ w·mean / Σ w` over sections present;
//! 3. the plain mean of rubric criteria.
//!
//! Whatever the source, the band is rounded to the nearest half and clamped to `[1, 9]`.
//! A report with none of the three cannot be scored and is not a result.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    round_band, EvaluationResult, Job, PartKind, ScoreWeights, Segment, Transcript,
};
use crate::domain::ports::ResultRepository;

const OVERALL_KEYS: [&str; 4] = ["overall_score", "overall_band", "overall", "band_score"];
const ITEM_LIST_KEYS: [&str; 4] = ["items", "answers", "responses", "parts"];
const ITEM_SCORE_KEYS: [&str; 3] = ["score", "band", "overall_score"];

/// Where the overall band came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    Explicit,
    WeightedParts,
    CriteriaMean,
}

/// Read a number that may have been emitted as a string.
fn as_score(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => ITEM_SCORE_KEYS
            .iter()
            .find_map(|k| map.get(*k))
            .and_then(as_score),
        _ => None,
    }?;
    score.is_finite().then_some(score)
}

fn first_score(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| map.get(*k).and_then(as_score))
}

fn items(report: &Value) -> &[Value] {
    ITEM_LIST_KEYS
        .iter()
        .find_map(|k| report.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Section of one report item: explicit part number or kind name, else the
/// part of the matching segment.
fn item_kind(item: &Map<String, Value>, segments: &[Segment]) -> Option<PartKind> {
    if let Some(part) = item.get("part") {
        let kind = match part {
            Value::Number(n) => n
                .as_u64()
                .and_then(|p| u8::try_from(p).ok())
                .and_then(PartKind::from_part),
            Value::String(s) => s
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(PartKind::from_part)
                .or_else(|| PartKind::from_str(s)),
            _ => None,
        };
        if kind.is_some() {
            return kind;
        }
    }
    for key in ["kind", "part_type", "section"] {
        if let Some(kind) = item.get(key).and_then(Value::as_str).and_then(PartKind::from_str) {
            return Some(kind);
        }
    }
    let segment_id = item.get("segment_id").and_then(Value::as_str)?;
    segments
        .iter()
        .find(|s| s.id == segment_id)
        .and_then(|s| PartKind::from_part(s.part))
}

fn weighted_part_mean(report: &Value, segments: &[Segment], weights: &ScoreWeights) -> Option<f64> {
    let mut per_kind: BTreeMap<u8, (PartKind, f64, usize)> = BTreeMap::new();
    for item in items(report).iter().filter_map(Value::as_object) {
        let (Some(kind), Some(score)) = (item_kind(item, segments), first_score(item, &ITEM_SCORE_KEYS))
        else {
            continue;
        };
        let slot = per_kind.entry(kind as u8).or_insert((kind, 0.0, 0));
        slot.1 += score;
        slot.2 += 1;
    }

    let (numerator, denominator) = per_kind.values().fold((0.0, 0.0), |(num, den), (kind, sum, n)| {
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / *n as f64;
        let w = weights.weight(*kind);
        (num + w * mean, den + w)
    });
    (denominator > 0.0).then(|| numerator / denominator)
}

/// Rubric criterion name to band, ignoring non-numeric entries.
pub fn criteria(report: &Value) -> BTreeMap<String, f64> {
    report
        .get("criteria")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(name, v)| as_score(v).map(|score| (name.clone(), score)))
                .collect()
        })
        .unwrap_or_default()
}

/// Overall band for `report` plus where it came from, or `None` when the
/// report carries no usable score.
pub fn overall_score(
    report: &Value,
    segments: &[Segment],
    weights: &ScoreWeights,
) -> Option<(f64, ScoreSource)> {
    if let Some(explicit) = report.as_object().and_then(|m| first_score(m, &OVERALL_KEYS)) {
        return Some((round_band(explicit), ScoreSource::Explicit));
    }
    if let Some(weighted) = weighted_part_mean(report, segments, weights) {
        return Some((round_band(weighted), ScoreSource::WeightedParts));
    }
    let criteria = criteria(report);
    if criteria.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = criteria.values().sum::<f64>() / criteria.len() as f64;
    Some((round_band(mean), ScoreSource::CriteriaMean))
}

/// Transcripts keyed by segment, falling back to positional matching.
pub fn transcripts(report: &Value, segments: &[Segment]) -> Vec<Transcript> {
    let items = items(report);
    segments
        .iter()
        .enumerate()
        .filter_map(|(index, segment)| {
            let by_id = items.iter().find(|item| {
                item.get("segment_id").and_then(Value::as_str) == Some(segment.id.as_str())
            });
            let item = by_id.or_else(|| {
                items
                    .get(index)
                    .filter(|item| item.get("segment_id").is_none())
            })?;
            let text = item.get("transcript").and_then(Value::as_str)?;
            Some(Transcript {
                segment_id: segment.id.clone(),
                part: segment.part,
                question: segment.question,
                text: text.to_string(),
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct ResultAssembler {
    results: Arc<dyn ResultRepository>,
    weights: ScoreWeights,
}

impl ResultAssembler {
    pub fn new(results: Arc<dyn ResultRepository>, weights: ScoreWeights) -> Self {
        Self { results, weights }
    }

    /// Build the result for `report`, or `None` if it carries no usable score.
    pub fn assemble(
        &self,
        job: &Job,
        report: Value,
        model: &str,
        caller_provided_key: bool,
        audio_urls: Vec<String>,
    ) -> Option<EvaluationResult> {
        let Some((overall, source)) = overall_score(&report, &job.segments, &self.weights) else {
            warn!(job_id = %job.id, model, "Report carried no usable scores");
            return None;
        };
        debug!(job_id = %job.id, model, overall, source = ?source, "Overall band computed");
        Some(EvaluationResult {
            id: Uuid::new_v4(),
            job_id: job.id,
            user_id: job.user_id.clone(),
            test_id: job.test_id.clone(),
            overall_score: overall,
            criteria: criteria(&report),
            transcripts: transcripts(&report, &job.segments),
            report,
            audio_urls,
            model: model.to_string(),
            caller_provided_key,
            created_at: Utc::now(),
        })
    }

    /// Store `result`. Returns its id, or `None` if the write failed.
    pub async fn persist(&self, result: &EvaluationResult) -> Option<Uuid> {
        match self.results.create(result).await {
            Ok(()) => {
                info!(
                    job_id = %result.job_id,
                    result_id = %result.id,
                    overall_score = result.overall_score,
                    "Evaluation result stored"
                );
                Some(result.id)
            }
            Err(e) => {
                warn!(job_id = %result.job_id, error = %e, "Failed to store evaluation result");
                None
            }
        }
    }
}
