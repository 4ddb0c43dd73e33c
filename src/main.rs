//! Speakeval CLI entry point.

use anyhow::Result;
use clap::Parser;

use speakeval::cli::{commands, Cli, Commands};
use speakeval::domain::models::Config;
use speakeval::infrastructure::config::ConfigLoader;
use speakeval::infrastructure::logging::{LogConfig, LoggerImpl};

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => speakeval::cli::handle_error(err, json),
    };
    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => speakeval::cli::handle_error(err, json),
    };

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::execute(args, config, json).await,
        Commands::Key(args) => commands::key::execute(args, config, json).await,
        Commands::Secret(args) => commands::secret::execute(args, config, json).await,
        Commands::Job(args) => commands::job::execute(args, config, json).await,
        Commands::Evaluate(args) => commands::evaluate::execute(args, config, json).await,
    };

    if let Err(err) = result {
        speakeval::cli::handle_error(err, json);
    }
}
