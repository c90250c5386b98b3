//! In-memory stateful todo list for the current phase.
//!
//! `TodoManager` is in-memory only: it never reads filesystem state except
//! through the explicit `save_state`/`load_state` YAML mirror. Checkpoint
//! synchronization goes through `export_state`/`restore_state` instead, so
//! there is exactly one way each concern is persisted (see SPEC_FULL.md §9 —
//! no "dual-mode" manager).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workspace::{Workspace, WorkspaceResult};

pub type TodoResult<T> = Result<T, TodoError>;

#[derive(Error, Debug)]
pub enum TodoError {
    #[error("too few todos: {got} < {min}")]
    TooFew { got: usize, min: usize },
    #[error("too many todos: {got} > {max}")]
    TooMany { got: usize, max: usize },
    #[error("todo #{index}: content too short ({len} chars, need >= 10 non-whitespace)")]
    TooShort { index: usize, len: usize },
    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn from_str_or_medium(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub priority: Priority,
    #[serde(default)]
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoManagerState {
    pub todos: Vec<TodoItem>,
    pub staged_todos: Vec<TodoItem>,
    pub next_id: u64,
    pub is_strategic_phase: bool,
    pub phase_number: u32,
    pub current_phase_name: String,
    pub staged_phase_name: String,
}

pub struct TodoManager<'a> {
    workspace: &'a Workspace,
    min_todos: usize,
    max_todos: usize,
    state: TodoManagerState,
}

const STATE_PATH: &str = "todos_state.yaml";

impl<'a> TodoManager<'a> {
    pub fn new(workspace: &'a Workspace, min_todos: usize, max_todos: usize) -> Self {
        Self {
            workspace,
            min_todos,
            max_todos,
            state: TodoManagerState {
                next_id: 1,
                phase_number: 1,
                ..Default::default()
            },
        }
    }

    pub fn add(&mut self, content: impl Into<String>, priority: Priority) -> TodoItem {
        let item = TodoItem {
            id: format!("todo_{}", self.state.next_id),
            content: content.into(),
            status: TodoStatus::Pending,
            priority,
            notes: Vec::new(),
            created_at: Utc::now(),
        };
        self.state.next_id += 1;
        self.state.todos.push(item.clone());
        item
    }

    pub fn start(&mut self, id: &str) -> Option<&TodoItem> {
        let todo = self.state.todos.iter_mut().find(|t| t.id == id)?;
        todo.status = TodoStatus::InProgress;
        Some(todo)
    }

    /// Mark a todo complete. Returns the completed item and a git commit
    /// message the caller may pass to `Workspace::git()`; commit failures
    /// are the caller's responsibility to swallow (they never propagate).
    pub fn complete(&mut self, id: &str, notes: Option<Vec<String>>) -> Option<(TodoItem, String)> {
        let phase_kind = if self.state.is_strategic_phase {
            "Strategic"
        } else {
            "Tactical"
        };
        let phase_number = self.state.phase_number;

        let todo = self.state.todos.iter_mut().find(|t| t.id == id)?;
        todo.status = TodoStatus::Completed;
        if let Some(notes) = notes {
            todo.notes.extend(notes);
        }

        let mut message = format!(
            "[Phase {phase_number} {phase_kind}] Completed {}: {}",
            todo.id, todo.content
        );
        if !todo.notes.is_empty() {
            message.push_str(&format!("; Notes: {}", todo.notes.join("; ")));
        }

        Some((todo.clone(), message))
    }

    /// Mark the first actionable todo complete: the in-progress one if
    /// there is one, else the highest-priority pending one. Returns the
    /// completed item, the commit message, and whether that was the last
    /// outstanding todo in the phase.
    pub fn complete_first_pending(&mut self) -> Option<(TodoItem, String, bool)> {
        let in_progress = self.state.todos.iter().find(|t| t.status == TodoStatus::InProgress).map(|t| t.id.clone());
        let id = match in_progress {
            Some(id) => id,
            None => self.list_pending().first()?.id.clone(),
        };

        let (item, message) = self.complete(&id, None)?;
        let is_last_task = self.all_complete();
        Some((item, message, is_last_task))
    }

    pub fn get(&self, id: &str) -> Option<&TodoItem> {
        self.state.todos.iter().find(|t| t.id == id)
    }

    pub fn list_all(&self) -> Vec<TodoItem> {
        self.state.todos.clone()
    }

    pub fn list_pending(&self) -> Vec<TodoItem> {
        let mut pending: Vec<TodoItem> = self
            .state
            .todos
            .iter()
            .filter(|t| t.status != TodoStatus::Completed)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        pending
    }

    pub fn all_complete(&self) -> bool {
        !self.state.todos.is_empty()
            && self
                .state
                .todos
                .iter()
                .all(|t| t.status == TodoStatus::Completed)
    }

    pub fn format_for_display(&self) -> String {
        if self.state.todos.is_empty() {
            return "No active todos.".to_string();
        }

        let phase_kind = if self.state.is_strategic_phase {
            "Strategic"
        } else {
            "Tactical"
        };
        let mut lines = vec![format!(
            "## Phase {} ({}){}",
            self.state.phase_number,
            phase_kind,
            if self.state.current_phase_name.is_empty() {
                String::new()
            } else {
                format!(": {}", self.state.current_phase_name)
            }
        )];

        let in_progress: Vec<&TodoItem> = self
            .state
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::InProgress)
            .collect();
        if !in_progress.is_empty() {
            lines.push(String::new());
            lines.push("**In Progress:**".to_string());
            for t in in_progress {
                lines.push(format!("  - [{}] {}", t.id, t.content));
            }
        }

        let mut pending: Vec<&TodoItem> = self
            .state
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::Pending)
            .collect();
        if !pending.is_empty() {
            pending.sort_by_key(|t| t.priority.rank());
            lines.push(String::new());
            lines.push("**Pending:**".to_string());
            for t in pending {
                let marker = if t.priority == Priority::High { "[!] " } else { "" };
                lines.push(format!("  - [{}] {}{}", t.id, marker, t.content));
            }
        }

        let completed = self
            .state
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::Completed)
            .count();
        if completed > 0 {
            lines.push(String::new());
            lines.push(format!("**Completed:** {}/{}", completed, self.state.todos.len()));
        }

        lines.join("\n")
    }

    fn render_archive(&self, phase_name: &str, failure_note: Option<&str>) -> String {
        let mut lines = Vec::new();
        if phase_name.is_empty() {
            lines.push("# Archived Todos".to_string());
        } else {
            lines.push(format!("# Archived Todos: {phase_name}"));
        }
        lines.push(format!("Archived: {}", Utc::now().to_rfc3339()));
        lines.push(String::new());

        if let Some(note) = failure_note {
            lines.push(format!("## Rewind reason\n{note}"));
            lines.push(String::new());
        }

        let completed: Vec<&TodoItem> = self
            .state
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::Completed)
            .collect();
        if !completed.is_empty() {
            lines.push(format!("## Completed ({})", completed.len()));
            for t in &completed {
                lines.push(format!("- [x] {}", t.content));
                for note in &t.notes {
                    lines.push(format!("  - {note}"));
                }
            }
            lines.push(String::new());
        }

        let not_completed: Vec<&TodoItem> = self
            .state
            .todos
            .iter()
            .filter(|t| t.status != TodoStatus::Completed)
            .collect();
        if !not_completed.is_empty() {
            lines.push(format!("## Not Completed ({})", not_completed.len()));
            for t in &not_completed {
                let mark = if t.status == TodoStatus::InProgress { "~" } else { " " };
                lines.push(format!("- [{mark}] {}", t.content));
            }
            lines.push(String::new());
        }

        lines.push("## Summary".to_string());
        lines.push(format!("- Total: {}", self.state.todos.len()));
        lines.push(format!("- Completed: {}", completed.len()));
        lines.push(format!("- Not completed: {}", not_completed.len()));

        lines.join("\n")
    }

    /// Write the archive, clear the in-memory list, and reset `next_id`.
    pub fn archive(&mut self, phase_name: &str) -> TodoResult<String> {
        if self.state.todos.is_empty() {
            return Ok(String::new());
        }

        let content = self.render_archive(phase_name, None);
        let ts = Utc::now().format("%Y%m%d_%H%M%S");
        let phase_kind = if self.state.is_strategic_phase {
            "strategic"
        } else {
            "tactical"
        };
        let filename = format!(
            "todos_phase_{}_{}_{}.md",
            self.state.phase_number, phase_kind, ts
        );
        let path = format!("archive/{filename}");
        self.workspace.write_file(&path, &content)?;

        self.state.todos.clear();
        self.state.next_id = 1;
        Ok(path)
    }

    pub fn archive_with_failure_note(&mut self, issue: &str) -> TodoResult<String> {
        let content = self.render_archive("", Some(issue));
        let ts = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("todos_REWIND_phase{}_{}.md", self.state.phase_number, ts);
        let path = format!("archive/{filename}");
        self.workspace.write_file(&path, &content)?;

        self.state.todos.clear();
        self.state.next_id = 1;
        Ok(path)
    }

    pub fn clear(&mut self) {
        self.state.todos.clear();
        self.state.next_id = 1;
    }

    pub fn stage_tactical_todos(&mut self, todos: Vec<String>, phase_name: &str) -> TodoResult<String> {
        if todos.len() < self.min_todos {
            return Err(TodoError::TooFew {
                got: todos.len(),
                min: self.min_todos,
            });
        }
        if todos.len() > self.max_todos {
            return Err(TodoError::TooMany {
                got: todos.len(),
                max: self.max_todos,
            });
        }
        for (i, content) in todos.iter().enumerate() {
            let trimmed = content.trim();
            if trimmed.chars().filter(|c| !c.is_whitespace()).count() < 10 {
                return Err(TodoError::TooShort {
                    index: i + 1,
                    len: trimmed.len(),
                });
            }
        }

        self.state.staged_todos = todos
            .iter()
            .enumerate()
            .map(|(i, content)| TodoItem {
                id: format!("todo_{}", i + 1),
                content: content.trim().to_string(),
                status: TodoStatus::Pending,
                priority: Priority::Medium,
                notes: Vec::new(),
                created_at: Utc::now(),
            })
            .collect();
        self.state.staged_phase_name = phase_name.to_string();

        Ok(format!(
            "Staged {} todos for the next tactical phase{}.",
            self.state.staged_todos.len(),
            if phase_name.is_empty() {
                String::new()
            } else {
                format!(" ({phase_name})")
            }
        ))
    }

    pub fn has_staged_todos(&self) -> bool {
        !self.state.staged_todos.is_empty()
    }

    pub fn apply_staged_todos(&mut self) {
        if self.state.staged_todos.is_empty() {
            return;
        }
        self.state.todos = std::mem::take(&mut self.state.staged_todos);
        self.state.next_id = self.state.todos.len() as u64 + 1;
        self.state.current_phase_name = std::mem::take(&mut self.state.staged_phase_name);
    }

    pub fn clear_staged_todos(&mut self) {
        self.state.staged_todos.clear();
        self.state.staged_phase_name.clear();
    }

    pub fn set_todos_from_list(&mut self, items: Vec<(String, TodoStatus, Priority, Option<String>)>) {
        self.state.todos.clear();
        self.state.next_id = 1;
        for (content, status, priority, maybe_id) in items {
            let id = maybe_id.unwrap_or_else(|| {
                let id = format!("todo_{}", self.state.next_id);
                self.state.next_id += 1;
                id
            });
            self.state.todos.push(TodoItem {
                id,
                content,
                status,
                priority,
                notes: Vec::new(),
                created_at: Utc::now(),
            });
        }
    }

    pub fn get_progress(&self) -> (usize, usize, usize, f64) {
        let total = self.state.todos.len();
        let completed = self
            .state
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::Completed)
            .count();
        let pct = if total > 0 {
            (completed as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        (total, completed, total - completed, pct)
    }

    pub fn save_state(&self) -> TodoResult<String> {
        let yaml = serde_yaml::to_string(&self.state).unwrap_or_default();
        self.workspace.write_file(STATE_PATH, &yaml)?;
        Ok(STATE_PATH.to_string())
    }

    pub fn load_state(&mut self) -> TodoResult<bool> {
        if !self.workspace.exists(STATE_PATH)? {
            return Ok(false);
        }
        let yaml = self.workspace.read_file(STATE_PATH)?;
        match serde_yaml::from_str::<TodoManagerState>(&yaml) {
            Ok(state) => {
                self.state = state;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    pub fn clear_saved_state(&self) -> TodoResult<()> {
        self.workspace.delete_file(STATE_PATH)?;
        Ok(())
    }

    pub fn export_state(&self) -> TodoManagerState {
        self.state.clone()
    }

    pub fn restore_state(&mut self, state: TodoManagerState) {
        let max_id = state
            .todos
            .iter()
            .chain(state.staged_todos.iter())
            .filter_map(|t| t.id.strip_prefix("todo_").and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0);
        self.state = state;
        if self.state.next_id <= max_id {
            self.state.next_id = max_id + 1;
        }
    }

    pub fn is_strategic_phase(&self) -> bool {
        self.state.is_strategic_phase
    }

    pub fn set_is_strategic_phase(&mut self, value: bool) {
        self.state.is_strategic_phase = value;
    }

    pub fn phase_number(&self) -> u32 {
        self.state.phase_number
    }

    pub fn increment_phase_number(&mut self) {
        self.state.phase_number += 1;
    }

    pub fn current_phase_name(&self) -> &str {
        &self.state.current_phase_name
    }

    pub fn set_current_phase_name(&mut self, name: impl Into<String>) {
        self.state.current_phase_name = name.into();
    }
}

impl TodoStatus {
    pub fn as_display(&self) -> &'static str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path) -> (Workspace, TodoManagerState) {
        let mut config = crate::workspace::WorkspaceConfig::default();
        config.git_versioning = false;
        let ws = Workspace::new(dir, "test-job", config);
        ws.initialize().unwrap();
        (ws, TodoManagerState::default())
    }

    #[test]
    fn add_and_complete_lifecycle() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        let item = mgr.add("Do the thing", Priority::High);
        assert_eq!(item.id, "todo_1");
        assert!(!mgr.all_complete());
        mgr.complete("todo_1", Some(vec!["done well".to_string()]));
        assert!(mgr.all_complete());
    }

    #[test]
    fn complete_first_pending_prefers_in_progress() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        mgr.add("Task one", Priority::Low);
        let two = mgr.add("Task two", Priority::High);
        mgr.start(&two.id);

        let (item, _, is_last) = mgr.complete_first_pending().unwrap();
        assert_eq!(item.id, two.id);
        assert!(!is_last);
    }

    #[test]
    fn complete_first_pending_falls_back_to_highest_priority_pending() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        let low = mgr.add("Low priority", Priority::Low);
        let high = mgr.add("High priority", Priority::High);

        let (item, _, is_last) = mgr.complete_first_pending().unwrap();
        assert_eq!(item.id, high.id);
        assert!(!is_last);
        mgr.complete_first_pending().unwrap();
        assert!(mgr.get(&low.id).unwrap().status == TodoStatus::Completed);
    }

    #[test]
    fn complete_first_pending_reports_last_task() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        mgr.add("Only task", Priority::Medium);

        let (_, _, is_last) = mgr.complete_first_pending().unwrap();
        assert!(is_last);
    }

    #[test]
    fn complete_first_pending_none_when_no_todos() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        assert!(mgr.complete_first_pending().is_none());
    }

    #[test]
    fn all_complete_false_when_empty() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mgr = TodoManager::new(&ws, 1, 20);
        assert!(!mgr.all_complete());
    }

    #[test]
    fn archive_clears_and_resets_next_id() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        mgr.add("Task one", Priority::Medium);
        mgr.add("Task two", Priority::Medium);
        mgr.complete("todo_1", None);
        let path = mgr.archive("phase one").unwrap();
        assert!(path.contains("archive/todos_phase_1"));
        assert!(mgr.list_all().is_empty());
        let next = mgr.add("fresh", Priority::Low);
        assert_eq!(next.id, "todo_1");
    }

    #[test]
    fn staging_validates_min_and_max() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 5, 20);
        let err = mgr
            .stage_tactical_todos(vec!["short one".to_string(); 4], "x")
            .unwrap_err();
        assert!(matches!(err, TodoError::TooFew { .. }));
    }

    #[test]
    fn staging_validates_min_length_boundary() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        assert!(mgr
            .stage_tactical_todos(vec!["1234567890".to_string()], "x")
            .is_ok());
        let err = mgr
            .stage_tactical_todos(vec!["123456789".to_string()], "x")
            .unwrap_err();
        assert!(matches!(err, TodoError::TooShort { .. }));
    }

    #[test]
    fn apply_staged_moves_to_active_and_resets_ids() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        mgr.stage_tactical_todos(
            vec!["First real task here".to_string(), "Second real task here".to_string()],
            "phase two",
        )
        .unwrap();
        assert!(mgr.has_staged_todos());
        mgr.apply_staged_todos();
        assert!(!mgr.has_staged_todos());
        assert_eq!(mgr.list_all().len(), 2);
    }

    #[test]
    fn export_restore_round_trips() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        mgr.add("Task", Priority::Medium);
        let exported = mgr.export_state();

        let mut mgr2 = TodoManager::new(&ws, 1, 20);
        mgr2.restore_state(exported.clone());
        assert_eq!(mgr2.export_state().todos.len(), exported.todos.len());
        assert!(mgr2.export_state().next_id > 1);
    }

    #[test]
    fn save_and_load_state_round_trip() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mut mgr = TodoManager::new(&ws, 1, 20);
        mgr.add("Task", Priority::Medium);
        mgr.save_state().unwrap();

        let mut mgr2 = TodoManager::new(&ws, 1, 20);
        assert!(mgr2.load_state().unwrap());
        assert_eq!(mgr2.list_all().len(), 1);
    }

    #[test]
    fn clear_saved_state_on_absent_file_is_noop() {
        let dir = tempdir().unwrap();
        let (ws, _) = manager(dir.path());
        let mgr = TodoManager::new(&ws, 1, 20);
        assert!(mgr.clear_saved_state().is_ok());
    }
}
