//! CLI argument surface for the job driver binary.

use std::path::PathBuf;

use clap::Parser;

/// Drive one or more jobs through the phase-alternation execution engine.
#[derive(Debug, Parser)]
#[command(name = "agent-cli", version, about)]
pub struct Cli {
    /// Job identifiers to run. Each gets its own workspace, checkpoint
    /// partition, and `tokio` task. Repeatable: `--job-id a --job-id b`.
    #[arg(long = "job-id", required = true)]
    pub job_ids: Vec<String>,

    /// Role config TOML overriding `EngineConfig::default()`. Applied
    /// identically to every job in this invocation.
    #[arg(long)]
    pub role_config: Option<PathBuf>,

    /// Base directory each job's workspace is created under, as
    /// `<base>/job_<job_id>`. Defaults to `EngineConfig`'s own resolution
    /// order when unset.
    #[arg(long)]
    pub workspace_base: Option<PathBuf>,

    /// Base directory for checkpoint RocksDB stores and phase snapshots.
    #[arg(long, default_value = "./agent_state")]
    pub state_base: PathBuf,

    /// Path to a file whose contents seed `instructions.md` on first
    /// activation of a job (ignored on resume).
    #[arg(long)]
    pub instructions: Option<PathBuf>,

    /// Skip the resume-from-checkpoint/snapshot path and start every job
    /// fresh, even if prior state exists.
    #[arg(long, default_value_t = false)]
    pub fresh: bool,
}
