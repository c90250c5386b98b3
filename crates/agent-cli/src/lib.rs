//! Library surface for the job driver binary.
//!
//! `main.rs` is a thin `#[tokio::main]` wrapper around [`run_job`]; the
//! resume/fresh-start decision and the per-job engine wiring live here so
//! `tests/` can exercise them directly instead of spawning the binary.

pub mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use engine::{
    checkpoint, CharCountEstimator, CheckpointStore, ContextManager, EngineConfig, ExecutionGraph, GraphDeps,
    JobState, MemoryManager, OpenAiCompatibleClient, PlanManager, RocksDbCheckpointStore, RolePrompt,
    SnapshotManager, TodoManager, ToolRegistry, Workspace,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::Cli;

/// Drive one job from wherever it left off (or from scratch) to completion,
/// cancellation, or a fatal error.
pub async fn run_job(
    job_id: String,
    engine_config: Arc<EngineConfig>,
    workspace_base: PathBuf,
    state_base: PathBuf,
    instructions: Option<String>,
    fresh: bool,
    cancel: CancellationToken,
) -> Result<()> {
    info!(job_id = %job_id, "starting job");

    let workspace = Workspace::new(&workspace_base, &job_id, engine_config.workspace.clone());
    workspace.initialize().context("workspace initialize")?;

    if let Some(text) = instructions {
        if fresh || !workspace.exists("instructions.md").unwrap_or(false) {
            workspace.write_file("instructions.md", &text).context("seeding instructions.md")?;
        }
    }

    let checkpoint_path = engine_config.checkpoint_db_path(&state_base, &job_id);
    let store = RocksDbCheckpointStore::open(checkpoint_path.as_path()).context("opening checkpoint store")?;

    let snapshot_base = engine_config.snapshot_base_path(&state_base);
    let snapshots = SnapshotManager::new(snapshot_base.as_path(), &job_id, workspace.root(), checkpoint_path.as_path());

    let llm = OpenAiCompatibleClient::new(engine_config.llm.clone());
    let tools = ToolRegistry::with_builtins();

    let workspace_path = workspace.root().display().to_string();
    let (state, thread_id) = resume_or_new(&job_id, &workspace_path, &store, &snapshots, fresh)?;

    let plan = PlanManager::new(&workspace);
    let memory = MemoryManager::new(&workspace);
    // `node_initialize` restores the `TodoManager` from `JobState` itself
    // when resuming, so this starts as a fresh, empty manager.
    let todos = TodoManager::new(&workspace, engine_config.min_todos, engine_config.max_todos);
    let context = ContextManager::new(engine_config.context.clone(), Box::new(CharCountEstimator));

    let deps = GraphDeps {
        workspace: &workspace,
        plan,
        memory,
        todos,
        context,
        snapshots: &snapshots,
        tools: &tools,
        llm: &llm,
        role_prompt: RolePrompt::default(),
        min_todos: engine_config.min_todos,
        max_todos: engine_config.max_todos,
        max_iterations: engine_config.max_iterations,
        max_consecutive_llm_errors: engine_config.max_consecutive_llm_errors,
        tool_retry_count: engine_config.tool_retry_count,
        tool_retry_base_delay: engine_config.tool_retry_base_delay,
        tool_retry_max_delay: engine_config.tool_retry_max_delay,
        strategic_todos: engine_config.strategic_todos.clone(),
    };

    let mut graph = ExecutionGraph::new(deps);
    let final_state = graph.run(state, &store, &thread_id, &cancel).await;

    if let Some(err) = &final_state.error {
        warn!(job_id = %job_id, kind = %err.kind, recoverable = err.recoverable, message = %err.message, "job ended with error");
    } else {
        info!(job_id = %job_id, goal_achieved = final_state.goal_achieved, "job ended");
    }

    Ok(())
}

/// Resume entry point: try the checkpoint store first, then the latest
/// snapshot, else start fresh. `fresh` forces a brand-new `JobState`
/// regardless of prior state.
pub fn resume_or_new(
    job_id: &str,
    workspace_path: &str,
    store: &dyn CheckpointStore,
    snapshots: &SnapshotManager,
    fresh: bool,
) -> Result<(JobState, String)> {
    if fresh {
        let thread_id = format!("thread_{job_id}");
        return Ok((JobState::new(job_id, workspace_path), thread_id));
    }

    let latest_snapshot = snapshots.get_latest_snapshot();
    let thread_id = engine::graph::resolve_thread_id(latest_snapshot.as_ref().and_then(|s| s.thread_id.as_deref()), store, job_id)
        .map_err(|e| anyhow::anyhow!("resolving thread id: {e}"))?;

    if let Some(bytes) = store.get(&thread_id).context("reading checkpoint")? {
        let state: JobState = checkpoint::decode(&bytes).context("decoding checkpoint")?;
        info!(job_id, thread_id = %thread_id, phase = state.phase_number, "resumed from checkpoint");
        return Ok((state, thread_id));
    }

    if let Some(snapshot) = latest_snapshot {
        info!(job_id, phase = snapshot.phase_number, "no checkpoint found, recovering from latest snapshot");
        snapshots.recover_to_phase(snapshot.phase_number);

        // The snapshot's own `checkpoint.db` copy, if it had one, is now
        // sitting at the live checkpoint path; re-read it before falling
        // back to a bare `JobState`, since the snapshot's workspace-file
        // copies alone can't reconstruct `todos`/`messages`.
        if let Some(bytes) = store.get(&thread_id).context("reading checkpoint after snapshot recovery")? {
            let state: JobState = checkpoint::decode(&bytes).context("decoding recovered checkpoint")?;
            info!(job_id, thread_id = %thread_id, phase = state.phase_number, "resumed from checkpoint restored by snapshot recovery");
            return Ok((state, thread_id));
        }

        warn!(
            job_id,
            phase = snapshot.phase_number,
            "snapshot recovery restored workspace files but no checkpoint; re-initializing phase bookkeeping only"
        );
        let mut state = JobState::new(job_id, workspace_path);
        state.phase_number = snapshot.phase_number;
        state.is_strategic_phase = snapshot.is_strategic_phase;
        state.iteration = snapshot.iteration;
        return Ok((state, thread_id));
    }

    info!(job_id, "no prior state found, starting fresh");
    Ok((JobState::new(job_id, workspace_path), thread_id))
}
