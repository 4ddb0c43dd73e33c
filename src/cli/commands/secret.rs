//! Users' own stored API keys.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::application::AppContext;
use crate::cli::output::{output, ActionOutput};
use crate::domain::models::{mask_secret, Config};

#[derive(Args, Debug)]
pub struct SecretArgs {
    #[command(subcommand)]
    pub command: SecretCommands,
}

#[derive(Subcommand, Debug)]
pub enum SecretCommands {
    /// Encrypt and store a user's API key
    Set {
        /// Owning user
        #[arg(short, long)]
        user: String,
        /// The API key
        #[arg(long, env = "SPEAKEVAL_USER_KEY", hide_env_values = true)]
        value: String,
    },
    /// Remove a user's stored key
    Delete {
        /// Owning user
        #[arg(short, long)]
        user: String,
    },
}

pub async fn execute(args: SecretArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::from_config(config).await?;
    let name = ctx.config.secrets.secret_name.clone();

    match args.command {
        SecretCommands::Set { user, value } => {
            let value = value.trim();
            if value.is_empty() {
                return Err(anyhow!("Secret value cannot be empty"));
            }
            let cipher = ctx
                .cipher
                .as_ref()
                .ok_or_else(|| anyhow!("secrets.encryption_key must be configured to store secrets"))?;
            let ciphertext = cipher.encrypt(value)?;
            ctx.repositories
                .secrets
                .put_encrypted_secret(&user, &name, &ciphertext)
                .await?;
            output(
                &ActionOutput::ok(format!("Stored {} for {user}", mask_secret(value))),
                json_mode,
            );
        }

        SecretCommands::Delete { user } => {
            let removed = ctx.repositories.secrets.delete_secret(&user, &name).await?;
            let message = if removed {
                format!("Removed stored key for {user}")
            } else {
                format!("No stored key for {user}")
            };
            output(&ActionOutput::ok(message), json_mode);
        }
    }

    Ok(())
}
