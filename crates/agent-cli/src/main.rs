use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use engine::EngineConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use agent_cli::{run_job, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let mut engine_config = match &cli.role_config {
        Some(path) => {
            EngineConfig::load(path).map_err(|e| anyhow::anyhow!("loading role config {}: {e}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    let instructions = match &cli.instructions {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?,
        ),
        None => None,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("received interrupt, cancelling in-flight jobs");
                cancel.cancel();
            }
        });
    }

    let hard_limit = engine_config.hard_token_limit;
    engine_config.llm.hard_token_limit = hard_limit;
    let engine_config = Arc::new(engine_config);

    let workspace_base = engine::workspace::resolve_base_path(cli.workspace_base.as_deref());
    let state_base = cli.state_base.clone();

    let mut handles = Vec::new();
    for job_id in cli.job_ids.clone() {
        let engine_config = Arc::clone(&engine_config);
        let workspace_base = workspace_base.clone();
        let state_base = state_base.clone();
        let instructions = instructions.clone();
        let cancel = cancel.clone();
        let fresh = cli.fresh;

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_job(job_id.clone(), engine_config, workspace_base, state_base, instructions, fresh, cancel).await
            {
                error!(job_id = %job_id, error = %e, "job driver failed");
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
