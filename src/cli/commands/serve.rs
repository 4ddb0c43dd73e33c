//! Run the HTTP API with the maintenance daemon alongside.

use anyhow::{anyhow, Result};
use clap::Args;
use tracing::info;

use crate::adapters::http::{EvaluationHttpServer, HttpConfig};
use crate::application::AppContext;
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bind address (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port (overrides server.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not start the maintenance daemon
    #[arg(long)]
    pub no_maintenance: bool,
}

pub async fn execute(args: ServeArgs, mut config: Config, _json_mode: bool) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let ctx = AppContext::from_config(config).await?;

    let daemon = (!args.no_maintenance).then(|| {
        let daemon = ctx.maintenance_daemon();
        let handle = daemon.handle();
        let mut events = daemon.run();
        // The daemon logs its own events; keep the channel drained.
        tokio::spawn(async move { while events.recv().await.is_some() {} });
        handle
    });

    let server = EvaluationHttpServer::new(ctx.clone(), HttpConfig::from(&ctx.config.server));
    server
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .map_err(|e| anyhow!(e))?;

    if let Some(handle) = daemon {
        handle.stop();
    }
    info!("Server stopped");
    Ok(())
}
