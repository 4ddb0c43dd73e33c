//! Evaluation job commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use comfy_table::Cell;
use uuid::Uuid;

use crate::application::AppContext;
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{Config, Job, JobStatus};
use crate::domain::ports::JobFilters;

const CANCEL_REASON: &str = "Cancelled by operator";

#[derive(Args, Debug)]
pub struct JobArgs {
    #[command(subcommand)]
    pub command: JobCommands,
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// Show a job's status
    Status {
        /// Job ID
        id: Uuid,
    },
    /// List jobs, newest first
    List {
        /// Filter by user
        #[arg(short, long)]
        user: Option<String>,
        /// Filter by status (pending, processing, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
        /// Maximum number of jobs to display
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Cancel a pending or processing job
    Cancel {
        /// Job ID
        id: Uuid,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct JobOutput {
    pub id: String,
    pub user_id: String,
    pub test_id: String,
    pub status: String,
    pub segments: usize,
    pub attempts: u32,
    pub result_id: Option<String>,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub retry_after_secs: Option<u64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<&Job> for JobOutput {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            user_id: job.user_id.clone(),
            test_id: job.test_id.clone(),
            status: job.status.as_str().to_string(),
            segments: job.segments.len(),
            attempts: job.attempts,
            result_id: job.result_id.map(|id| id.to_string()),
            error_code: job.error_code.map(|c| c.as_str().to_string()),
            error: job.error.clone(),
            retry_after_secs: job.retry_after_secs,
            created_at: job.created_at.to_rfc3339(),
            completed_at: job.completed_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

impl CommandOutput for JobOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Job: {}", self.id),
            format!("User: {}", self.user_id),
            format!("Test: {}", self.test_id),
            format!("Status: {}", self.status),
            format!("Segments: {}", self.segments),
            format!("Attempts: {}", self.attempts),
            format!("Created: {}", self.created_at),
        ];
        if let Some(completed) = &self.completed_at {
            lines.push(format!("Finished: {completed}"));
        }
        if let Some(result) = &self.result_id {
            lines.push(format!("Result: {result}"));
        }
        if let Some(code) = &self.error_code {
            lines.push(format!(
                "Error: {code}: {}",
                self.error.as_deref().unwrap_or_default()
            ));
        }
        if let Some(secs) = self.retry_after_secs {
            lines.push(format!("Retry after: {secs}s"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct JobListOutput {
    pub jobs: Vec<JobOutput>,
    pub total: usize,
}

impl CommandOutput for JobListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "user", "test", "status", "error", "created"]);
        for job in &self.jobs {
            table.add_row(vec![
                Cell::new(&job.id[..8]),
                Cell::new(truncate(&job.user_id, 20)),
                Cell::new(truncate(&job.test_id, 20)),
                Cell::new(&job.status),
                Cell::new(job.error_code.as_deref().unwrap_or_default()),
                Cell::new(&job.created_at),
            ]);
        }
        render_list("job", &table, self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: JobArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::from_config(config).await?;

    match args.command {
        JobCommands::Status { id } => {
            let job = ctx.jobs.get(id, None).await?;
            output(&JobOutput::from(&job), json_mode);
        }

        JobCommands::List {
            user,
            status,
            limit,
        } => {
            let status = match status {
                Some(s) => Some(
                    JobStatus::from_str(&s).ok_or_else(|| anyhow!("Invalid status: {s}"))?,
                ),
                None => None,
            };
            let jobs = ctx
                .jobs
                .list(JobFilters {
                    user_id: user,
                    test_id: None,
                    status,
                    limit: Some(limit),
                })
                .await?;
            let out = JobListOutput {
                total: jobs.len(),
                jobs: jobs.iter().map(JobOutput::from).collect(),
            };
            output(&out, json_mode);
        }

        JobCommands::Cancel { id } => {
            let job = ctx.jobs.cancel(id, None, CANCEL_REASON).await?;
            output(&JobOutput::from(&job), json_mode);
        }
    }

    Ok(())
}
