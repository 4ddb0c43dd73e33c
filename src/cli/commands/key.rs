//! Shared key pool commands.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use comfy_table::Cell;
use uuid::Uuid;

use crate::application::AppContext;
use crate::cli::output::{list_table, output, render_list, truncate, ActionOutput, CommandOutput};
use crate::domain::models::{Config, Credential, ModelCategory};

#[derive(Args, Debug)]
pub struct KeyArgs {
    #[command(subcommand)]
    pub command: KeyCommands,
}

#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Add a key to the pool
    Add {
        /// Human-readable label
        #[arg(short, long)]
        label: String,
        /// The API key (prefer the environment variable over shell history)
        #[arg(long, env = "SPEAKEVAL_NEW_KEY", hide_env_values = true)]
        secret: String,
    },
    /// List pooled keys with masked secrets
    List,
    /// Stop handing a key out
    Disable {
        /// Key ID
        id: Uuid,
    },
    /// Put a disabled key back into rotation
    Enable {
        /// Key ID
        id: Uuid,
    },
    /// Clear quota exhaustion for one key, or every key
    ResetQuota {
        /// Key ID (all keys when omitted)
        #[arg(long)]
        id: Option<Uuid>,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct KeyOutput {
    pub id: String,
    pub label: String,
    pub secret: String,
    pub active: bool,
    pub locked: bool,
    pub error_count: u32,
    pub exhausted: Vec<String>,
    pub last_used_at: Option<String>,
}

impl From<&Credential> for KeyOutput {
    fn from(credential: &Credential) -> Self {
        let now = Utc::now();
        let today = now.date_naive();
        Self {
            id: credential.id.to_string(),
            label: credential.label.clone(),
            secret: credential.masked_secret(),
            active: credential.active,
            locked: credential.is_locked_at(now),
            error_count: credential.error_count,
            exhausted: ModelCategory::ALL
                .iter()
                .filter(|c| credential.is_exhausted_on(**c, today))
                .map(|c| c.as_str().to_string())
                .collect(),
            last_used_at: credential.last_used_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct KeyListOutput {
    pub keys: Vec<KeyOutput>,
    pub total: usize,
}

impl CommandOutput for KeyListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "label", "key", "active", "locked", "errors", "exhausted"]);
        for key in &self.keys {
            table.add_row(vec![
                Cell::new(&key.id[..8]),
                Cell::new(truncate(&key.label, 24)),
                Cell::new(&key.secret),
                Cell::new(if key.active { "yes" } else { "no" }),
                Cell::new(if key.locked { "yes" } else { "" }),
                Cell::new(key.error_count),
                Cell::new(key.exhausted.join(",")),
            ]);
        }
        render_list("key", &table, self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: KeyArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::from_config(config).await?;

    match args.command {
        KeyCommands::Add { label, secret } => {
            let credential = ctx.pool.add(&label, &secret).await?;
            output(
                &ActionOutput::ok(format!(
                    "Key added: {} ({})",
                    credential.id,
                    credential.masked_secret()
                )),
                json_mode,
            );
        }

        KeyCommands::List => {
            let credentials = ctx.pool.list().await?;
            let out = KeyListOutput {
                total: credentials.len(),
                keys: credentials.iter().map(KeyOutput::from).collect(),
            };
            output(&out, json_mode);
        }

        KeyCommands::Disable { id } => {
            ctx.pool.set_active(id, false).await?;
            output(&ActionOutput::ok(format!("Key disabled: {id}")), json_mode);
        }

        KeyCommands::Enable { id } => {
            ctx.pool.set_active(id, true).await?;
            output(&ActionOutput::ok(format!("Key enabled: {id}")), json_mode);
        }

        KeyCommands::ResetQuota { id } => {
            if let Some(id) = id {
                ctx.pool.get(id).await?;
            }
            let cleared = ctx
                .ledger
                .reset_all(id)
                .await
                .context("Failed to reset quota")?;
            let scope = id.map_or_else(|| "all keys".to_string(), |id| format!("key {id}"));
            output(
                &ActionOutput::ok(format!("Cleared {cleared} quota bucket(s) for {scope}")),
                json_mode,
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::QuotaBucket;

    #[test]
    fn test_key_output_masks_secret_and_lists_exhaustion() {
        let mut credential = Credential::new("primary", "sk-live-abcdef123456");
        credential.quota.insert(
            ModelCategory::Speech,
            QuotaBucket::exhausted_on(Utc::now().date_naive()),
        );
        let out = KeyOutput::from(&credential);
        assert!(!out.secret.contains("abcdef"));
        assert!(out.secret.ends_with("3456"));
        assert_eq!(out.exhausted, vec!["speech".to_string()]);

        let list = KeyListOutput {
            total: 1,
            keys: vec![out],
        };
        let human = list.to_human();
        assert!(human.contains("primary"));
        assert!(!human.contains("sk-live"));
    }
}
