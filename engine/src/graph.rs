//! The nested-loop execution graph: the state machine driving a job through
//! alternating strategic/tactical phases.
//!
//! Each node is a pure `JobState -> JobState` step; `ExecutionGraph::run`
//! owns the scheduling loop, checkpointing after every node and checking for
//! cancellation between them. Node bodies never talk to each other directly
//! — they only read and write `JobState` and the managers they're handed.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::context::ContextManager;
use crate::error::{EngineError, EngineResult, JobError};
use crate::job::JobState;
use crate::llm::{LlmClient, LlmError};
use crate::memory_manager::MemoryManager;
use crate::message::Message;
use crate::phase;
use crate::plan_manager::PlanManager;
use crate::snapshot::SnapshotManager;
use crate::todo::{Priority, TodoManager};
use crate::tool::{ToolContext, ToolRegistry};
use crate::workspace::Workspace;

/// One of the eight places a `JobState` can be between steps: the seven
/// named nodes plus the terminal `End`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphNode {
    Initialize,
    Execute,
    Tools,
    CheckTodos,
    ArchivePhase,
    HandleTransition,
    CheckGoal,
    End,
}

impl std::fmt::Display for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialize => "initialize",
            Self::Execute => "execute",
            Self::Tools => "tools",
            Self::CheckTodos => "check_todos",
            Self::ArchivePhase => "archive_phase",
            Self::HandleTransition => "handle_transition",
            Self::CheckGoal => "check_goal",
            Self::End => "end",
        };
        write!(f, "{s}")
    }
}

impl GraphNode {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

/// Whether `to` is a legal next node from `from`, per the routing diagram.
/// Any node may jump to `End` directly (fatal error, cancellation, iteration
/// cap) even though that edge isn't drawn on the happy-path diagram.
fn is_legal_transition(from: GraphNode, to: GraphNode) -> bool {
    use GraphNode::*;
    if to == End {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (Initialize, Execute)
            | (Execute, Tools)
            | (Execute, CheckTodos)
            | (Tools, CheckTodos)
            | (CheckTodos, ArchivePhase)
            | (CheckTodos, Execute)
            | (ArchivePhase, HandleTransition)
            | (HandleTransition, CheckGoal)
            | (CheckGoal, Execute)
    )
}

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: GraphNode,
    pub to: GraphNode,
    pub iteration: u64,
    pub elapsed_ms: u128,
}

#[derive(Debug)]
pub struct IllegalTransition {
    pub from: GraphNode,
    pub to: GraphNode,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// System prompt fragments a role may customize; everything else about
/// `execute`'s message assembly is fixed by the spec.
pub struct RolePrompt {
    pub system_preamble: String,
}

impl Default for RolePrompt {
    fn default() -> Self {
        Self {
            system_preamble: "You are an autonomous agent working through a long-running job. \
                               Use the available tools to make progress on your current todos."
                .to_string(),
        }
    }
}

/// Everything a node needs that isn't part of `JobState` itself: the
/// workspace-backed managers, the LLM and tool collaborators, and config.
pub struct GraphDeps<'a> {
    pub workspace: &'a Workspace,
    pub plan: PlanManager<'a>,
    pub memory: MemoryManager<'a>,
    pub todos: TodoManager<'a>,
    pub context: ContextManager,
    pub snapshots: &'a SnapshotManager,
    pub tools: &'a ToolRegistry,
    pub llm: &'a dyn LlmClient,
    pub role_prompt: RolePrompt,
    pub min_todos: usize,
    pub max_todos: usize,
    pub max_iterations: u64,
    pub max_consecutive_llm_errors: u32,
    pub tool_retry_count: u32,
    pub tool_retry_base_delay: std::time::Duration,
    pub tool_retry_max_delay: std::time::Duration,
    pub strategic_todos: crate::config::StrategicTodoTemplates,
}

/// Drives one job from its current `JobState` to `End`, persisting a
/// checkpoint after every node.
pub struct ExecutionGraph<'a> {
    deps: GraphDeps<'a>,
    current: GraphNode,
    history: Vec<TransitionRecord>,
    node_started_at: Instant,
}

impl<'a> ExecutionGraph<'a> {
    pub fn new(deps: GraphDeps<'a>) -> Self {
        Self {
            deps,
            current: GraphNode::Initialize,
            history: Vec::new(),
            node_started_at: Instant::now(),
        }
    }

    pub fn current(&self) -> GraphNode {
        self.current
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    fn advance(&mut self, to: GraphNode, iteration: u64) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition { from: self.current, to });
        }
        self.history.push(TransitionRecord {
            from: self.current,
            to,
            iteration,
            elapsed_ms: self.node_started_at.elapsed().as_millis(),
        });
        self.current = to;
        self.node_started_at = Instant::now();
        Ok(())
    }

    /// Run the graph to completion (or until `cancel` fires), checkpointing
    /// `state` to `store` under `thread_id` after every node.
    pub async fn run(
        &mut self,
        mut state: JobState,
        store: &dyn CheckpointStore,
        thread_id: &str,
        cancel: &CancellationToken,
    ) -> JobState {
        loop {
            if cancel.is_cancelled() {
                state.should_stop = true;
                state.error = Some(JobError {
                    message: "job cancelled".to_string(),
                    kind: "cancelled".to_string(),
                    recoverable: true,
                });
                self.checkpoint(&state, store, thread_id);
                return state;
            }

            let next = match self.current {
                GraphNode::Initialize => self.node_initialize(&mut state),
                GraphNode::Execute => self.node_execute(&mut state).await,
                GraphNode::Tools => self.node_tools(&mut state).await,
                GraphNode::CheckTodos => self.node_check_todos(&mut state),
                GraphNode::ArchivePhase => self.node_archive_phase(&mut state).await,
                GraphNode::HandleTransition => self.node_handle_transition(&mut state),
                GraphNode::CheckGoal => self.node_check_goal(&mut state),
                GraphNode::End => return state,
            };

            if self.advance(next, state.iteration).is_err() {
                tracing::error!(from = %self.current, to = %next, "illegal graph transition, forcing end");
                state.should_stop = true;
                let _ = self.advance(GraphNode::End, state.iteration);
            }

            self.checkpoint(&state, store, thread_id);

            if self.current.is_terminal() {
                return state;
            }
        }
    }

    fn checkpoint(&self, state: &JobState, store: &dyn CheckpointStore, thread_id: &str) {
        match crate::checkpoint::encode(state) {
            Ok(bytes) => {
                if let Err(e) = store.put(thread_id, &bytes) {
                    tracing::error!(error = %e, "checkpoint write failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "checkpoint encode failed"),
        }
    }

    // -------------------------------------------------------------------
    // initialize
    // -------------------------------------------------------------------

    fn node_initialize(&mut self, state: &mut JobState) -> GraphNode {
        if let Err(e) = self.deps.workspace.initialize() {
            tracing::error!(error = %e, "workspace initialize failed");
        }

        if state.initialized {
            let todo_state = state.to_todo_manager_state(
                self.deps.todos.current_phase_name().to_string(),
                String::new(),
            );
            self.deps.todos.restore_state(todo_state);
        } else {
            if !self.deps.workspace.exists("instructions.md").unwrap_or(false) {
                let _ = self
                    .deps
                    .workspace
                    .write_file("instructions.md", "# Instructions\n\n(no instructions were provided)\n");
            }
            if !self.deps.memory.exists().unwrap_or(false) {
                let _ = self.deps.memory.write("# Workspace Memory\n");
            }

            let todos = phase::initial_strategic_todos(non_empty(&self.deps.strategic_todos.initial));
            self.deps.todos.set_todos_from_list(
                todos
                    .into_iter()
                    .map(|t| (t.content, crate::todo::TodoStatus::Pending, Priority::Medium, Some(format!("todo_{}", t.id))))
                    .collect(),
            );
            self.deps.todos.set_current_phase_name("Initial Strategic Phase");
            state.initialized = true;
        }

        if let Err(e) = phase::write_phase_state(self.deps.workspace, state.phase_number, state.is_strategic_phase, self.deps.todos.current_phase_name()) {
            tracing::warn!(error = %e, "failed to write phase_state.yaml");
        }

        state.workspace_memory = self.deps.memory.read().unwrap_or_default();
        GraphNode::Execute
    }

    // -------------------------------------------------------------------
    // execute
    // -------------------------------------------------------------------

    fn protected_context(&self) -> String {
        let plan_snippet = self
            .deps
            .plan
            .read()
            .unwrap_or_default()
            .chars()
            .take(2_000)
            .collect::<String>();
        format!(
            "## Workspace memory\n{}\n\n## Current plan (truncated)\n{}\n\n## Todos\n{}",
            "see workspace.md above",
            plan_snippet,
            self.deps.todos.format_for_display()
        )
    }

    async fn node_execute(&mut self, state: &mut JobState) -> GraphNode {
        let system_content = format!(
            "{}\n\n{}\n\n{}",
            self.deps.role_prompt.system_preamble,
            state.workspace_memory,
            self.protected_context()
        );
        let mut full: Vec<Message> = vec![Message::system(system_content)];
        full.extend(state.messages.iter().cloned());

        let prepared = self.deps.context.prepare_messages_for_llm(&full, false);
        state.context_stats = self.deps.context.state().into();

        let tool_specs = self.deps.tools.specs();
        match self.deps.llm.invoke_with_tools(&prepared, &tool_specs).await {
            Ok(response) => {
                state.consecutive_llm_errors = 0;
                state.iteration += 1;
                let has_tool_calls = !response.tool_calls.is_empty();
                state.messages.push(response.into_message());
                if has_tool_calls {
                    GraphNode::Tools
                } else {
                    GraphNode::CheckTodos
                }
            }
            Err(e) => self.handle_llm_error(state, e).await,
        }
    }

    async fn handle_llm_error(&mut self, state: &mut JobState, e: LlmError) -> GraphNode {
        state.consecutive_llm_errors += 1;
        let engine_err = match &e {
            LlmError::RateLimited { .. } | LlmError::Transport(_) => {
                EngineError::llm_transient(state.consecutive_llm_errors, e.to_string())
            }
            LlmError::Malformed(_) => EngineError::LlmFatal { message: e.to_string() },
            LlmError::ContextOverflow { token_count, limit, body_bytes } => {
                EngineError::context_overflow(*token_count, *limit, *body_bytes)
            }
        };

        if !engine_err.recoverable() || state.consecutive_llm_errors >= self.deps.max_consecutive_llm_errors {
            state.error = Some(JobError::from(&engine_err));
            state.should_stop = true;
            return GraphNode::End;
        }

        let full: Vec<Message> = {
            let mut v = vec![Message::system(state.workspace_memory.clone())];
            v.extend(state.messages.iter().cloned());
            v
        };
        let aggressively_compacted = self.deps.context.prepare_messages_for_llm(&full, true);
        let compacted = self
            .deps
            .context
            .summarize_and_compact(&aggressively_compacted, self.deps.llm)
            .await;
        state.messages = compacted.into_iter().filter(|m| !m.is_system()).collect();
        state.context_stats = self.deps.context.state().into();
        GraphNode::Execute
    }

    // -------------------------------------------------------------------
    // tools
    // -------------------------------------------------------------------

    async fn node_tools(&mut self, state: &mut JobState) -> GraphNode {
        let tool_calls = state
            .messages
            .last()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();

        // `max_retries` is retries beyond the first attempt, so it's one
        // less than the configured total-attempt budget.
        let mut retry_mgr = crate::context::ToolRetryManager::new(
            self.deps.tool_retry_count.saturating_sub(1),
            self.deps.tool_retry_base_delay,
            self.deps.tool_retry_max_delay,
        );

        for call in tool_calls {
            let Some(tool) = self.deps.tools.get(&call.name) else {
                state.messages.push(Message::tool_result(
                    &call.id,
                    format!("Tool '{}' is not registered.", call.name),
                ));
                continue;
            };

            let mut attempt = 0u32;
            let result = loop {
                let mut ctx = ToolContext {
                    workspace: self.deps.workspace,
                    todos: &mut self.deps.todos,
                    job_id: &state.job_id,
                    metadata: &mut state.metadata,
                };
                match tool.invoke(call.arguments.clone(), &mut ctx).await {
                    Ok(output) if crate::tool::looks_like_error(&output) && retry_mgr.should_retry(attempt) => {
                        let delay = retry_mgr.get_retry_delay(attempt);
                        tokio::time::sleep(delay).await;
                        retry_mgr.record_retry();
                        attempt += 1;
                    }
                    Ok(output) => break Ok(output),
                    Err(e) => {
                        if !retry_mgr.should_retry(attempt) {
                            break Err(e);
                        }
                        let delay = retry_mgr.get_retry_delay(attempt);
                        tokio::time::sleep(delay).await;
                        retry_mgr.record_retry();
                        attempt += 1;
                    }
                }
            };

            match result {
                Ok(output) => {
                    if attempt > 0 {
                        state.tool_retry_state.current_retries.insert(call.name.clone(), attempt);
                    }
                    state.messages.push(Message::tool_result(&call.id, output));
                }
                Err(e) => {
                    let failures = retry_mgr.record_failure(&call.name);
                    *state.tool_retry_state.failed_tools.entry(call.name.clone()).or_insert(0) += failures;
                    state.tool_retry_state.current_retries.insert(call.name.clone(), attempt);

                    state.messages.push(Message::tool_result(
                        &call.id,
                        format!(
                            "Tool execution failed after {} attempts: {e}\n\
                             Please try an alternative approach or skip this step.",
                            attempt + 1
                        ),
                    ));
                }
            }
        }

        state.tool_retry_state.total_retries += retry_mgr.total_retries();
        if !retry_mgr.failure_counts().is_empty() {
            tracing::debug!(failures = ?retry_mgr.failure_counts(), "tool failures this batch");
        }

        GraphNode::CheckTodos
    }

    // -------------------------------------------------------------------
    // check_todos
    // -------------------------------------------------------------------

    fn node_check_todos(&mut self, state: &mut JobState) -> GraphNode {
        state.phase_complete = self.deps.todos.all_complete();
        state.sync_from_todo_manager(&self.deps.todos.export_state());

        if state.phase_complete {
            GraphNode::ArchivePhase
        } else {
            GraphNode::Execute
        }
    }

    // -------------------------------------------------------------------
    // archive_phase
    // -------------------------------------------------------------------

    async fn node_archive_phase(&mut self, state: &mut JobState) -> GraphNode {
        let full: Vec<Message> = {
            let mut v = vec![Message::system(state.workspace_memory.clone())];
            v.extend(state.messages.iter().cloned());
            v
        };
        let compacted = self
            .deps
            .context
            .ensure_within_limits(&full, self.deps.llm, state.is_strategic_phase)
            .await;
        state.messages = compacted.into_iter().filter(|m| !m.is_system()).collect();
        state.context_stats = self.deps.context.state().into();

        state.messages.push(Message::human("Phase complete. Preparing to transition to the next phase."));

        let phase_name = self.deps.todos.current_phase_name().to_string();
        if let Err(e) = self.deps.todos.archive(&phase_name) {
            tracing::error!(error = %e, "failed to archive todos");
        }

        GraphNode::HandleTransition
    }

    // -------------------------------------------------------------------
    // handle_transition
    // -------------------------------------------------------------------

    fn node_handle_transition(&mut self, state: &mut JobState) -> GraphNode {
        let (completed, total) = {
            let (total, completed, _, _) = self.deps.todos.get_progress();
            (completed, total)
        };
        self.deps.snapshots.create_snapshot(
            state.phase_number,
            state.iteration,
            state.messages.len(),
            state.is_strategic_phase,
            completed,
            total,
            None,
        );

        let system_messages: Vec<Message> = state.messages.iter().filter(|m| m.is_system()).cloned().collect();
        state.is_strategic_phase = !state.is_strategic_phase;
        state.phase_number += 1;

        let next_phase_name = if state.is_strategic_phase {
            "Strategic Phase"
        } else {
            "Tactical Phase"
        };
        let mut fresh = system_messages;
        fresh.push(Message::human(format!(
            "You are now in {} phase {}: {next_phase_name}. Review your todos and continue.",
            if state.is_strategic_phase { "strategic" } else { "tactical" },
            state.phase_number
        )));
        state.messages = fresh;

        self.deps.todos.clear();
        self.deps.todos.set_current_phase_name(next_phase_name);

        if let Err(e) = phase::write_phase_state(self.deps.workspace, state.phase_number, state.is_strategic_phase, next_phase_name) {
            tracing::warn!(error = %e, "failed to write phase_state.yaml");
        }

        if state.is_strategic_phase {
            let resume_from_feedback = matches!(
                state.metadata.get("resume_from_feedback"),
                Some(serde_json::Value::Bool(true))
            );
            let todos = if resume_from_feedback {
                phase::resume_strategic_todos(non_empty(&self.deps.strategic_todos.resume))
            } else {
                phase::transition_strategic_todos(non_empty(&self.deps.strategic_todos.transition))
            };
            self.deps.todos.set_todos_from_list(
                todos
                    .into_iter()
                    .map(|t| (t.content, crate::todo::TodoStatus::Pending, Priority::Medium, Some(format!("todo_{}", t.id))))
                    .collect(),
            );
        } else if self.deps.todos.has_staged_todos() {
            self.deps.todos.apply_staged_todos();
        } else {
            match self.deps.workspace.read_file("todos.yaml") {
                Ok(yaml) => match phase::parse_and_validate_todos_yaml(&yaml, self.deps.min_todos, self.deps.max_todos) {
                    Ok(items) => {
                        self.deps.todos.set_todos_from_list(
                            items
                                .into_iter()
                                .map(|content| (content, crate::todo::TodoStatus::Pending, Priority::Medium, None))
                                .collect(),
                        );
                    }
                    Err(e) => {
                        state.error = Some(JobError::from(&EngineError::from(e)));
                        state.should_stop = true;
                    }
                },
                Err(e) => {
                    state.error = Some(JobError {
                        message: format!("no staged todos and todos.yaml unreadable: {e}"),
                        kind: "yaml_validation".to_string(),
                        recoverable: false,
                    });
                    state.should_stop = true;
                }
            }
        }

        state.sync_from_todo_manager(&self.deps.todos.export_state());
        state.phase_complete = false;

        if state.should_stop {
            GraphNode::End
        } else {
            GraphNode::CheckGoal
        }
    }

    // -------------------------------------------------------------------
    // check_goal
    // -------------------------------------------------------------------

    fn node_check_goal(&mut self, state: &mut JobState) -> GraphNode {
        let completion_sentinel = self.deps.workspace.exists("output/job_completion.json").unwrap_or(false);
        let plan_complete = self.deps.plan.is_complete(None).unwrap_or(false);

        if completion_sentinel || plan_complete || state.job_complete_invoked() {
            state.goal_achieved = true;
            state.should_stop = true;
            return GraphNode::End;
        }

        if state.iteration >= self.deps.max_iterations {
            let err = EngineError::iteration_limit(state.iteration, self.deps.max_iterations);
            crate::context::write_error_to_workspace(
                self.deps.workspace,
                "iteration_limit",
                &err.to_string(),
                false,
                Some(&format!("{err:?}")),
                &[("iteration", &state.iteration.to_string()), ("job_id", &state.job_id)],
            );
            state.error = Some(JobError::from(&err));
            state.should_stop = true;
            return GraphNode::End;
        }

        GraphNode::Execute
    }
}

fn non_empty(items: &[String]) -> Option<&[String]> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Resolve which `thread_id` a resumed job should check out of the
/// checkpoint store: the snapshot's own id, else the first id the store
/// knows about, else a freshly synthesized one.
pub fn resolve_thread_id(
    snapshot_thread_id: Option<&str>,
    store: &dyn CheckpointStore,
    job_id: &str,
) -> EngineResult<String> {
    if let Some(id) = snapshot_thread_id {
        return Ok(id.to_string());
    }
    let mut ids = store.list_thread_ids().map_err(|e| EngineError::SnapshotIo { message: e.to_string() })?;
    if let Some(id) = ids.pop() {
        return Ok(id);
    }
    Ok(format!("thread_{job_id}"))
}
