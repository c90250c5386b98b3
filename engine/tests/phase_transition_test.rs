//! End-to-end coverage for the execution graph: a full strategic -> tactical
//! -> strategic phase alternation, and a crash/resume cycle that re-enters
//! the graph from a checkpoint taken mid-job.
//!
//! The LLM collaborator is a scripted fake that returns a fixed sequence of
//! tool calls per invocation; everything else (workspace, todos, checkpoint
//! store, snapshots) is the real engine machinery running against a
//! tempdir, since the point of these tests is whether those collaborators
//! actually agree with each other across node boundaries.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use engine::{
    checkpoint, CharCountEstimator, CheckpointStore, ContextConfig, ContextManager, EngineConfig, ExecutionGraph,
    GraphDeps, JobState, LlmClient, LlmError, LlmResult, MemoryManager, Message, PlanManager, RocksDbCheckpointStore,
    RolePrompt, SnapshotManager, ToolCall, ToolRegistry, TodoManager, Workspace, WorkspaceConfig,
};
use engine::llm::AssistantResponse;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn workspace(dir: &Path, job_id: &str) -> Workspace {
    let mut config = WorkspaceConfig::default();
    config.git_versioning = false;
    let ws = Workspace::new(dir, job_id, config);
    ws.initialize().unwrap();
    ws
}

fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args,
    }
}

/// Returns one scripted [`AssistantResponse`] per call, advancing an
/// internal counter; panics if asked for more turns than were scripted.
struct ScriptedLlm {
    turns: Vec<Vec<ToolCall>>,
    next: AtomicUsize,
    on_first_call: Option<CancellationToken>,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn invoke(&self, _messages: &[Message]) -> LlmResult<AssistantResponse> {
        unreachable!("execute node always calls invoke_with_tools")
    }

    async fn invoke_with_tools(
        &self,
        _messages: &[Message],
        _tools: &[engine::ToolSpec],
    ) -> LlmResult<AssistantResponse> {
        let turn = self.next.fetch_add(1, Ordering::SeqCst);
        if let (0, Some(cancel)) = (turn, &self.on_first_call) {
            cancel.cancel();
        }
        let tool_calls = self
            .turns
            .get(turn)
            .unwrap_or_else(|| panic!("ScriptedLlm asked for turn {turn} beyond script"))
            .clone();
        Ok(AssistantResponse {
            content: String::new(),
            tool_calls,
        })
    }
}

fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.min_todos = 1;
    config.max_todos = 20;
    config.max_iterations = 50;
    config
}

fn graph_deps<'a>(
    workspace: &'a Workspace,
    tools: &'a ToolRegistry,
    llm: &'a dyn LlmClient,
    snapshots: &'a SnapshotManager,
    config: &EngineConfig,
) -> GraphDeps<'a> {
    GraphDeps {
        workspace,
        plan: PlanManager::new(workspace),
        memory: MemoryManager::new(workspace),
        todos: TodoManager::new(workspace, config.min_todos, config.max_todos),
        context: ContextManager::new(ContextConfig::default(), Box::new(CharCountEstimator)),
        snapshots,
        tools,
        llm,
        role_prompt: RolePrompt::default(),
        min_todos: config.min_todos,
        max_todos: config.max_todos,
        max_iterations: config.max_iterations,
        max_consecutive_llm_errors: config.max_consecutive_llm_errors,
        tool_retry_count: config.tool_retry_count,
        tool_retry_base_delay: config.tool_retry_base_delay,
        tool_retry_max_delay: config.tool_retry_max_delay,
        strategic_todos: config.strategic_todos.clone(),
    }
}

/// Turn 1 (initial strategic phase, 4 predefined todos): complete all four
/// and stage the single tactical todo for the next phase.
fn strategic_turn() -> Vec<ToolCall> {
    vec![
        tool_call("todo_complete", serde_json::json!({})),
        tool_call("todo_complete", serde_json::json!({})),
        tool_call("todo_complete", serde_json::json!({})),
        tool_call("todo_complete", serde_json::json!({})),
        tool_call(
            "next_phase_todos",
            serde_json::json!({"todos": ["Do the final tactical work item here."], "phase_name": "Tactical Phase One"}),
        ),
    ]
}

/// Turn 2 (tactical phase, 1 todo): complete it and signal job completion.
fn tactical_turn() -> Vec<ToolCall> {
    vec![
        tool_call("todo_complete", serde_json::json!({})),
        tool_call(
            "job_complete",
            serde_json::json!({"summary": "Finished the only tactical task.", "deliverables": []}),
        ),
    ]
}

#[tokio::test]
async fn full_job_alternates_phases_and_reaches_goal() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path(), "job-e2e");
    let config = engine_config();
    let tools = ToolRegistry::with_builtins();
    let llm = ScriptedLlm {
        turns: vec![strategic_turn(), tactical_turn()],
        next: AtomicUsize::new(0),
        on_first_call: None,
    };

    let checkpoint_path = dir.path().join("checkpoints/job-e2e.db");
    let store = RocksDbCheckpointStore::open(&checkpoint_path).unwrap();
    let snapshots = SnapshotManager::new(dir.path().join("phase_snapshots"), "job-e2e", ws.root(), &checkpoint_path);

    let deps = graph_deps(&ws, &tools, &llm, &snapshots, &config);
    let mut graph = ExecutionGraph::new(deps);

    let state = JobState::new("job-e2e", ws.root().display().to_string());
    let cancel = CancellationToken::new();
    let final_state = graph.run(state, &store, "thread_job-e2e", &cancel).await;

    assert!(final_state.goal_achieved, "job should have reached its goal");
    assert!(final_state.should_stop);
    assert!(final_state.error.is_none());
    // Phase 1 (initial strategic) -> 2 (tactical) -> 3 (next strategic, where
    // check_goal notices job_complete_invoked and stops before any work).
    assert_eq!(final_state.phase_number, 3);
    assert!(final_state.is_strategic_phase);
    assert!(ws.exists("output/job_completion.json").unwrap());
}

#[tokio::test]
async fn job_resumes_from_checkpoint_after_simulated_crash() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path(), "job-crash");
    let config = engine_config();
    let tools = ToolRegistry::with_builtins();

    let checkpoint_path = dir.path().join("checkpoints/job-crash.db");
    let store = RocksDbCheckpointStore::open(&checkpoint_path).unwrap();
    let snapshots = SnapshotManager::new(dir.path().join("phase_snapshots"), "job-crash", ws.root(), &checkpoint_path);
    let thread_id = "thread_job-crash";

    // First episode: cancel the job partway through its second Execute call
    // (after the strategic->tactical transition has already been
    // checkpointed), simulating a process crash mid-run.
    let cancel = CancellationToken::new();
    let llm = ScriptedLlm {
        turns: vec![strategic_turn(), tactical_turn()],
        next: AtomicUsize::new(0),
        on_first_call: Some(cancel.clone()),
    };
    let deps = graph_deps(&ws, &tools, &llm, &snapshots, &config);
    let mut graph = ExecutionGraph::new(deps);
    let state = JobState::new("job-crash", ws.root().display().to_string());
    let crashed_state = graph.run(state, &store, thread_id, &cancel).await;

    assert!(crashed_state.should_stop);
    assert!(crashed_state.error.is_some());
    assert!(!crashed_state.goal_achieved);
    // The strategic->tactical transition already ran before cancellation
    // was observed at the top of the next loop iteration.
    assert_eq!(crashed_state.phase_number, 2);
    assert!(!crashed_state.is_strategic_phase);

    // Second episode: decode the checkpoint exactly as a resuming job
    // driver would, and finish the job with fresh collaborators.
    let bytes = store.get(thread_id).unwrap().expect("checkpoint must exist");
    let resumed_state: JobState = checkpoint::decode(&bytes).unwrap();
    assert_eq!(resumed_state.phase_number, 2);
    assert!(resumed_state.initialized);

    let resume_cancel = CancellationToken::new();
    let resume_llm = ScriptedLlm {
        turns: vec![tactical_turn()],
        next: AtomicUsize::new(0),
        on_first_call: None,
    };
    let resume_deps = graph_deps(&ws, &tools, &resume_llm, &snapshots, &config);
    let mut resume_graph = ExecutionGraph::new(resume_deps);
    let final_state = resume_graph.run(resumed_state, &store, thread_id, &resume_cancel).await;

    assert!(final_state.goal_achieved);
    assert_eq!(final_state.phase_number, 3);
    assert!(ws.exists("output/job_completion.json").unwrap());
}
