//! Foreground evaluation of one test.

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use crate::application::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, EvaluationResult, Segment};
use crate::services::{NewEvaluation, RunOutcome};

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// User the evaluation belongs to
    #[arg(short, long)]
    pub user: String,

    /// Test identifier
    #[arg(short, long)]
    pub test: String,

    /// JSON file holding the recorded segments
    #[arg(short, long)]
    pub segments: PathBuf,

    /// Caller's own API key, tried before the pool
    #[arg(long, env = "SPEAKEVAL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct EvaluationOutput {
    pub job_id: String,
    pub result: EvaluationResult,
}

impl CommandOutput for EvaluationOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Job: {}", self.job_id),
            format!("Result: {}", self.result.id),
            format!("Model: {}", self.result.model),
            format!("Overall band: {:.1}", self.result.overall_score),
        ];
        for (name, score) in &self.result.criteria {
            lines.push(format!("  {name}: {score:.1}"));
        }
        if let Some(feedback) = self.result.report.get("feedback").and_then(|v| v.as_str()) {
            lines.push(format!("\n{feedback}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn read_segments(path: &Path) -> Result<Vec<Segment>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid segments in {}", path.display()))
}

pub async fn execute(args: EvaluateArgs, config: Config, json_mode: bool) -> Result<()> {
    let segments = read_segments(&args.segments)?;
    let ctx = AppContext::from_config(config).await?;

    let job = ctx
        .jobs
        .create(&NewEvaluation {
            user_id: args.user,
            test_id: args.test,
            segments,
            api_key: None,
        })
        .await?;

    match ctx.jobs.runner().run(job.id, args.api_key).await? {
        RunOutcome::Completed {
            result_id: Some(result_id),
        } => {
            let result = ctx.jobs.result(result_id, None).await?;
            output(
                &EvaluationOutput {
                    job_id: job.id.to_string(),
                    result,
                },
                json_mode,
            );
            Ok(())
        }
        RunOutcome::Completed { result_id: None } => {
            bail!("Job {} completed but its result could not be stored", job.id)
        }
        RunOutcome::Failed(failure) => Err(anyhow!(
            "Job {} failed with {}: {}",
            job.id,
            failure.code,
            failure.message
        )),
        RunOutcome::NotStarted | RunOutcome::Superseded => {
            bail!("Job {} was cancelled or replaced before it finished", job.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_segments_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "s1", "part": 1, "question": 1, "audio_path": "u1/t1/s1.webm"}}]"#
        )
        .unwrap();
        let segments = read_segments(file.path()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].mime_type, "audio/webm");
        assert!(segments[0].question_text.is_empty());
    }

    #[test]
    fn test_read_segments_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(read_segments(file.path()).is_err());
    }
}
