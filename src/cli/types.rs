//! CLI type definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::evaluate::EvaluateArgs;
use crate::cli::commands::job::JobArgs;
use crate::cli::commands::key::KeyArgs;
use crate::cli::commands::secret::SecretArgs;
use crate::cli::commands::serve::ServeArgs;

#[derive(Parser)]
#[command(name = "speakeval")]
#[command(about = "Speaking test evaluation service", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Config file (defaults to .speakeval/config.yaml and local.yaml)
    #[arg(short, long, global = true, env = "SPEAKEVAL_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and the maintenance daemon
    Serve(ServeArgs),

    /// Manage the shared API key pool
    Key(KeyArgs),

    /// Manage users' own stored API keys
    Secret(SecretArgs),

    /// Inspect and control evaluation jobs
    Job(JobArgs),

    /// Run one evaluation in the foreground and print the result
    Evaluate(EvaluateArgs),
}
