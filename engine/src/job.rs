//! `JobState`: the single value that flows through the execution graph and
//! is checkpointed after every node.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::context::ContextManagementState;
use crate::error::JobError;
use crate::message::Message;
use crate::todo::{TodoItem, TodoManagerState};

/// Mirrors `ContextManagementState` for the checkpoint boundary; kept as a
/// separate type (rather than reusing it directly) so the wire schema is
/// stable even if the in-memory manager's internals change shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextStats {
    pub tokens: usize,
    pub clears: u64,
    pub trims: u64,
    pub summarizations: u64,
    pub last_compaction_iteration: u64,
}

impl From<&ContextManagementState> for ContextStats {
    fn from(state: &ContextManagementState) -> Self {
        Self {
            tokens: state.current_token_count,
            clears: state.total_tool_results_cleared,
            trims: state.total_messages_trimmed,
            summarizations: state.total_summarizations,
            last_compaction_iteration: state.last_compaction_iteration,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRetryState {
    pub current_retries: HashMap<String, u32>,
    pub failed_tools: HashMap<String, u64>,
    pub total_retries: u64,
}

/// The state-machine value. Every node takes a `JobState` and returns one;
/// the checkpoint store persists it after each node so a crash can resume
/// from the last completed node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub workspace_path: String,

    pub messages: Vec<Message>,

    pub initialized: bool,
    pub phase_complete: bool,
    pub goal_achieved: bool,

    pub is_strategic_phase: bool,
    pub phase_number: u32,
    pub is_final_phase: bool,

    pub iteration: u64,
    pub consecutive_llm_errors: u32,

    pub workspace_memory: String,

    pub error: Option<JobError>,
    pub should_stop: bool,

    pub metadata: HashMap<String, serde_json::Value>,

    pub context_stats: ContextStats,
    pub tool_retry_state: ToolRetryState,

    pub todos: Vec<TodoItem>,
    pub staged_todos: Vec<TodoItem>,
    pub todo_next_id: u64,
}

impl JobState {
    /// A fresh, uninitialized state for a new job activation.
    pub fn new(job_id: impl Into<String>, workspace_path: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            workspace_path: workspace_path.into(),
            messages: Vec::new(),
            initialized: false,
            phase_complete: false,
            goal_achieved: false,
            is_strategic_phase: true,
            phase_number: 1,
            is_final_phase: false,
            iteration: 0,
            consecutive_llm_errors: 0,
            workspace_memory: String::new(),
            error: None,
            should_stop: false,
            metadata: HashMap::new(),
            context_stats: ContextStats::default(),
            tool_retry_state: ToolRetryState::default(),
            todos: Vec::new(),
            staged_todos: Vec::new(),
            todo_next_id: 1,
        }
    }

    /// Sync the `TodoManager`'s current state into the mirrored fields so
    /// the next checkpoint can resume without re-reading the manager.
    pub fn sync_from_todo_manager(&mut self, state: &TodoManagerState) {
        self.todos = state.todos.clone();
        self.staged_todos = state.staged_todos.clone();
        self.todo_next_id = state.next_id;
        self.is_strategic_phase = state.is_strategic_phase;
        self.phase_number = state.phase_number;
    }

    pub fn to_todo_manager_state(&self, current_phase_name: String, staged_phase_name: String) -> TodoManagerState {
        TodoManagerState {
            todos: self.todos.clone(),
            staged_todos: self.staged_todos.clone(),
            next_id: self.todo_next_id,
            is_strategic_phase: self.is_strategic_phase,
            phase_number: self.phase_number,
            current_phase_name,
            staged_phase_name,
        }
    }

    pub fn job_complete_invoked(&self) -> bool {
        matches!(self.metadata.get("job_complete_invoked"), Some(serde_json::Value::Bool(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_state_starts_strategic_phase_one() {
        let state = JobState::new("job1", "/workspace/job_job1");
        assert!(state.is_strategic_phase);
        assert_eq!(state.phase_number, 1);
        assert!(!state.initialized);
        assert_eq!(state.todo_next_id, 1);
    }

    #[test]
    fn sync_from_todo_manager_mirrors_fields() {
        let mut state = JobState::new("job1", "/workspace/job_job1");
        let todo_state = TodoManagerState {
            next_id: 4,
            phase_number: 2,
            is_strategic_phase: false,
            ..Default::default()
        };
        state.sync_from_todo_manager(&todo_state);
        assert_eq!(state.todo_next_id, 4);
        assert_eq!(state.phase_number, 2);
        assert!(!state.is_strategic_phase);
    }

    #[test]
    fn job_complete_invoked_reads_metadata_flag() {
        let mut state = JobState::new("job1", "/workspace/job_job1");
        assert!(!state.job_complete_invoked());
        state.metadata.insert("job_complete_invoked".to_string(), serde_json::Value::Bool(true));
        assert!(state.job_complete_invoked());
    }
}
