//! The tool collaborator interface and the small set of built-in tools the
//! execution graph always wires in (file I/O and phase-control signals).
//!
//! Tools receive a [`ToolContext`] giving read/write access to the
//! `Workspace` and `TodoManager`. Dangerous tools (`job_complete`,
//! `next_phase_todos`) are recognized by name so the graph can set the
//! matching `JobState` flags after a successful call.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::ToolSpec;
use crate::todo::{Priority, TodoManager, TodoStatus};
use crate::workspace::Workspace;

pub type ToolInvokeResult<T> = Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),
    #[error(transparent)]
    Todo(#[from] crate::todo::TodoError),
}

/// Fixed prefixes that mark a tool result's content as an error, so retry
/// logic doesn't fire on benign content that merely mentions the word
/// "error".
const ERROR_PREFIXES: &[&str] = &[
    "error:",
    "failed to",
    "traceback",
    "file not found",
    "permission denied",
    "cannot ",
    "unable to",
    "invalid ",
];

pub fn looks_like_error(content: &str) -> bool {
    let lower = content.trim().to_lowercase();
    ERROR_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Mutable access a tool needs while it runs. `'a` is the workspace/todo
/// manager's own lifetime; `'b` is just the duration of one `tools` node
/// invocation, which is usually much shorter.
pub struct ToolContext<'a, 'b> {
    pub workspace: &'a Workspace,
    pub todos: &'b mut TodoManager<'a>,
    pub job_id: &'b str,
    /// Flags the engine reads after the tools node returns, e.g.
    /// `job_complete_invoked`. Mirrors `JobState.metadata`.
    pub metadata: &'b mut HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn invoke(&self, args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A collection of tools keyed by name, handed to the `execute` node to
/// advertise to the LLM and to the `tools` node to dispatch calls.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    /// The default built-in registry: filesystem tools plus the two
    /// phase-control signals the engine recognizes by name.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ReadFileTool));
        registry.register(Box::new(WriteFileTool));
        registry.register(Box::new(ListFilesTool));
        registry.register(Box::new(SearchFilesTool));
        registry.register(Box::new(JobCompleteTool));
        registry.register(Box::new(NextPhaseTodosTool));
        registry.register(Box::new(TodoCompleteTool));
        registry.register(Box::new(TodoWriteTool));
        registry
    }
}

// ---------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
    start_line: Option<u32>,
    end_line: Option<u32>,
}

/// Characters beyond which `read_file` truncates its output, keeping tool
/// results small enough to survive a compaction pass untouched.
const READ_FILE_MAX_CHARS: usize = 6_000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the workspace. Use start_line/end_line to read a \
         specific range when the file is large."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative path to the file within the workspace"},
                "start_line": {"type": "integer", "description": "First line to read (1-indexed, inclusive)"},
                "end_line": {"type": "integer", "description": "Last line to read (1-indexed, inclusive)"}
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String> {
        let args: ReadFileArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Fatal(format!("invalid arguments: {e}")))?;
        let content = ctx.workspace.read_file(&args.path)?;

        let content = if args.start_line.is_some() || args.end_line.is_some() {
            let lines: Vec<&str> = content.lines().collect();
            let total = lines.len();
            let start = args.start_line.map(|n| (n as usize).saturating_sub(1)).unwrap_or(0).min(total);
            let end = args.end_line.map(|n| (n as usize).min(total)).unwrap_or(total);
            if start >= end {
                return Ok(format!("[Empty range: start_line={} end_line={} total_lines={total}]", start + 1, end));
            }
            let annotated: String = lines[start..end]
                .iter()
                .enumerate()
                .map(|(i, line)| format!("{:>5}: {}", start + i + 1, line))
                .collect::<Vec<_>>()
                .join("\n");
            format!("[Lines {}-{} of {total} total]\n{annotated}", start + 1, end)
        } else {
            content
        };

        if content.len() > READ_FILE_MAX_CHARS {
            let mut truncated = String::with_capacity(READ_FILE_MAX_CHARS + 64);
            let mut chars = 0;
            for line in content.lines() {
                let line_len = line.len() + 1;
                if chars + line_len > READ_FILE_MAX_CHARS {
                    break;
                }
                truncated.push_str(line);
                truncated.push('\n');
                chars += line_len;
            }
            truncated.push_str(&format!("\n[TRUNCATED - {} chars omitted, see workspace]", content.len() - chars));
            return Ok(truncated);
        }

        Ok(content)
    }
}

// ---------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace, creating parent directories as needed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative path to the file within the workspace"},
                "content": {"type": "string", "description": "Full content to write"}
            },
            "required": ["path", "content"]
        })
    }

    async fn invoke(&self, args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String> {
        let args: WriteFileArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Fatal(format!("invalid arguments: {e}")))?;
        ctx.workspace.write_file(&args.path, &args.content)?;
        Ok(format!("Wrote file: {}", args.path))
    }
}

// ---------------------------------------------------------------------
// list_files / search_files
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct ListFilesArgs {
    #[serde(default)]
    path: String,
    pattern: Option<String>,
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in a workspace directory, optionally filtered by a substring pattern."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative directory path within the workspace"},
                "pattern": {"type": "string", "description": "Substring filter applied to file names"}
            }
        })
    }

    async fn invoke(&self, args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String> {
        let args: ListFilesArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Fatal(format!("invalid arguments: {e}")))?;
        let files = ctx.workspace.list_files(&args.path, args.pattern.as_deref())?;
        if files.is_empty() {
            Ok("No files found.".to_string())
        } else {
            Ok(files.join("\n"))
        }
    }
}

#[derive(Deserialize)]
struct SearchFilesArgs {
    query: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    case_sensitive: bool,
}

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for a text query across files under a workspace directory. Binary files are skipped."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Text to search for"},
                "path": {"type": "string", "description": "Relative directory to search under"},
                "case_sensitive": {"type": "boolean", "description": "Whether the search is case-sensitive"}
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String> {
        let args: SearchFilesArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Fatal(format!("invalid arguments: {e}")))?;
        let matches = ctx.workspace.search_files(&args.query, &args.path, args.case_sensitive)?;
        if matches.is_empty() {
            Ok(format!("No matches for '{}'.", args.query))
        } else {
            Ok(matches.join("\n"))
        }
    }
}

// ---------------------------------------------------------------------
// job_complete
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct JobCompleteArgs {
    summary: String,
    #[serde(default)]
    deliverables: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
    notes: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Serialize)]
struct JobCompletionRecord {
    status: &'static str,
    timestamp: chrono::DateTime<Utc>,
    summary: String,
    deliverables: Vec<String>,
    confidence: f64,
    job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

/// Writes `output/job_completion.json` and marks `job_complete_invoked` in
/// metadata so `check_goal` can set `goal_achieved` without re-reading disk.
pub struct JobCompleteTool;

#[async_trait]
impl Tool for JobCompleteTool {
    fn name(&self) -> &str {
        "job_complete"
    }

    fn description(&self) -> &str {
        "Signal that the ENTIRE JOB is complete and the agent should stop. Call this only \
         when ALL phases of the execution plan are complete and all deliverables are ready."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "What was accomplished across all phases"},
                "deliverables": {"type": "array", "items": {"type": "string"}, "description": "All output files created"},
                "confidence": {"type": "number", "description": "Confidence the job is truly complete, 0.0-1.0"},
                "notes": {"type": "string", "description": "Optional notes about limitations or recommendations"}
            },
            "required": ["summary"]
        })
    }

    async fn invoke(&self, args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String> {
        let args: JobCompleteArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Fatal(format!("invalid arguments: {e}")))?;
        let confidence = args.confidence.clamp(0.0, 1.0);

        let record = JobCompletionRecord {
            status: "job_completed",
            timestamp: Utc::now(),
            summary: args.summary.clone(),
            deliverables: args.deliverables.clone(),
            confidence,
            job_id: ctx.job_id.to_string(),
            notes: args.notes,
        };
        let json = serde_json::to_string_pretty(&record).map_err(|e| ToolError::Fatal(e.to_string()))?;
        ctx.workspace.write_file("output/job_completion.json", &json)?;

        ctx.metadata.insert("job_complete_invoked".to_string(), serde_json::Value::Bool(true));

        Ok(format!(
            "JOB COMPLETE - Wrote: output/job_completion.json\nSummary: {}\nDeliverables: {} files\nConfidence: {:.0}%\n\
             The job has finished. No further action required.",
            args.summary,
            args.deliverables.len(),
            confidence * 100.0,
        ))
    }
}

// ---------------------------------------------------------------------
// next_phase_todos
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct NextPhaseTodosArgs {
    todos: Vec<String>,
    #[serde(default)]
    phase_name: String,
}

/// Stages the tactical todos the agent authored during a strategic phase.
/// Applied at the strategic→tactical transition by `handle_transition`.
pub struct NextPhaseTodosTool;

#[async_trait]
impl Tool for NextPhaseTodosTool {
    fn name(&self) -> &str {
        "next_phase_todos"
    }

    fn description(&self) -> &str {
        "Stage the todo list for the next tactical phase. Submit 5-20 concrete, actionable \
         todos, each at least 10 non-whitespace characters."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "todos": {"type": "array", "items": {"type": "string"}, "description": "The next tactical phase's todos"},
                "phase_name": {"type": "string", "description": "A short name for the next phase"}
            },
            "required": ["todos"]
        })
    }

    async fn invoke(&self, args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String> {
        let args: NextPhaseTodosArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Fatal(format!("invalid arguments: {e}")))?;
        let message = ctx.todos.stage_tactical_todos(args.todos, &args.phase_name)?;
        ctx.metadata.insert("next_phase_todos_staged".to_string(), serde_json::Value::Bool(true));
        Ok(message)
    }
}

// ---------------------------------------------------------------------
// todo_complete
// ---------------------------------------------------------------------

/// Marks the current task done: the in-progress todo if there is one, else
/// the highest-priority pending one. The primary rhythm of tactical work —
/// work on a task, call this, read what's next, repeat. Phase-level
/// archiving and transition happen structurally in the graph's
/// `check_todos`/`archive_phase` nodes once `all_complete()` is true, not
/// here.
pub struct TodoCompleteTool;

#[async_trait]
impl Tool for TodoCompleteTool {
    fn name(&self) -> &str {
        "todo_complete"
    }

    fn description(&self) -> &str {
        "Mark the current task as complete. Call this AFTER finishing a task; it finds the \
         in-progress todo (or, if none, the highest-priority pending one) and marks it done."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, _args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String> {
        match ctx.todos.complete_first_pending() {
            Some((_, message, true)) => {
                if let Some(git) = ctx.workspace.git() {
                    git.commit(&message, false);
                }
                Ok(format!(
                    "{message}\nAll todos in this phase are complete. The next step will hand off to a strategic phase."
                ))
            }
            Some((_, message, false)) => {
                if let Some(git) = ctx.workspace.git() {
                    git.commit(&message, false);
                }
                let remaining = ctx.todos.list_pending().len();
                Ok(format!("{message}\n{remaining} todo(s) remaining."))
            }
            None => Ok("No todos to complete.".to_string()),
        }
    }
}

/// Shared priority-parsing entry point: unrecognized or absent strings fall
/// back to `Medium` rather than erroring, since this parses freeform
/// LLM-supplied tool arguments, not a file format.
pub fn parse_priority(raw: Option<&str>) -> Priority {
    raw.map(Priority::from_str_or_medium).unwrap_or(Priority::Medium)
}

fn parse_status(raw: &str) -> ToolInvokeResult<TodoStatus> {
    match raw {
        "pending" => Ok(TodoStatus::Pending),
        "in_progress" => Ok(TodoStatus::InProgress),
        "completed" => Ok(TodoStatus::Completed),
        other => Err(ToolError::Fatal(format!(
            "invalid status '{other}': expected one of pending, in_progress, completed"
        ))),
    }
}

// ---------------------------------------------------------------------
// todo_write
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct TodoWriteItem {
    content: String,
    status: String,
    priority: Option<String>,
    id: Option<String>,
}

#[derive(Deserialize)]
struct TodoWriteArgs {
    todos: Vec<TodoWriteItem>,
}

/// Atomically replaces the entire active todo list, the direct-write
/// counterpart to `next_phase_todos`'s staging path. Lets a role carry
/// explicit priorities and ids instead of the flat tactical-todo strings
/// `next_phase_todos` accepts.
pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the entire active todo list. Each todo needs content and status \
         (pending, in_progress, or completed); priority (high, medium, low; default medium) \
         and id are optional. This overwrites the current list, it does not append."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {"type": "string"},
                            "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]},
                            "priority": {"type": "string", "enum": ["high", "medium", "low"]},
                            "id": {"type": "string"}
                        },
                        "required": ["content", "status"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn invoke(&self, args: serde_json::Value, ctx: &mut ToolContext<'_, '_>) -> ToolInvokeResult<String> {
        let args: TodoWriteArgs = serde_json::from_value(args).map_err(|e| ToolError::Fatal(format!("invalid arguments: {e}")))?;

        let mut items = Vec::with_capacity(args.todos.len());
        for item in args.todos {
            let status = parse_status(&item.status)?;
            let priority = parse_priority(item.priority.as_deref());
            items.push((item.content, status, priority, item.id));
        }

        let count = items.len();
        ctx.todos.set_todos_from_list(items);
        let (total, completed, pending, percentage) = ctx.todos.get_progress();
        Ok(format!(
            "Replaced active todo list with {count} item(s). {completed}/{total} complete, {pending} pending ({percentage:.0}%).\n{}",
            ctx.todos.format_for_display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceConfig;
    use tempfile::tempdir;

    fn workspace(dir: &std::path::Path) -> Workspace {
        let mut config = WorkspaceConfig::default();
        config.git_versioning = false;
        let ws = Workspace::new(dir, "test-job", config);
        ws.initialize().unwrap();
        ws
    }

    #[test]
    fn looks_like_error_matches_known_prefixes() {
        assert!(looks_like_error("Error: disk full"));
        assert!(looks_like_error("Failed to open file"));
        assert!(!looks_like_error("This task has zero errors remaining"));
    }

    #[tokio::test]
    async fn write_then_read_file_round_trips() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mut todos = TodoManager::new(&ws, 1, 20);
        let mut metadata = HashMap::new();
        let mut ctx = ToolContext {
            workspace: &ws,
            todos: &mut todos,
            job_id: "test-job",
            metadata: &mut metadata,
        };

        let write = WriteFileTool;
        write
            .invoke(serde_json::json!({"path": "notes.md", "content": "hello"}), &mut ctx)
            .await
            .unwrap();

        let read = ReadFileTool;
        let result = read.invoke(serde_json::json!({"path": "notes.md"}), &mut ctx).await.unwrap();
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn job_complete_writes_sentinel_and_sets_metadata() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mut todos = TodoManager::new(&ws, 1, 20);
        let mut metadata = HashMap::new();
        let mut ctx = ToolContext {
            workspace: &ws,
            todos: &mut todos,
            job_id: "test-job",
            metadata: &mut metadata,
        };

        let tool = JobCompleteTool;
        tool.invoke(serde_json::json!({"summary": "done", "deliverables": ["output/a.md"]}), &mut ctx)
            .await
            .unwrap();

        assert!(ws.exists("output/job_completion.json").unwrap());
        assert_eq!(metadata.get("job_complete_invoked"), Some(&serde_json::Value::Bool(true)));
    }

    #[tokio::test]
    async fn next_phase_todos_stages_and_validates() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mut todos = TodoManager::new(&ws, 2, 20);
        let mut metadata = HashMap::new();
        let mut ctx = ToolContext {
            workspace: &ws,
            todos: &mut todos,
            job_id: "test-job",
            metadata: &mut metadata,
        };

        let tool = NextPhaseTodosTool;
        let err = tool
            .invoke(serde_json::json!({"todos": ["too short"], "phase_name": "phase two"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Todo(_)));

        tool.invoke(
            serde_json::json!({"todos": ["First real task here", "Second real task here"], "phase_name": "phase two"}),
            &mut ctx,
        )
        .await
        .unwrap();
        assert!(ctx.todos.has_staged_todos());
    }

    #[test]
    fn registry_with_builtins_registers_all_eight() {
        let registry = ToolRegistry::with_builtins();
        for name in [
            "read_file",
            "write_file",
            "list_files",
            "search_files",
            "job_complete",
            "next_phase_todos",
            "todo_complete",
            "todo_write",
        ] {
            assert!(registry.get(name).is_some(), "missing builtin tool: {name}");
        }
    }

    #[tokio::test]
    async fn todo_complete_marks_in_progress_then_falls_back_to_pending() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mut todos = TodoManager::new(&ws, 1, 20);
        let first = todos.add("First task", Priority::Medium);
        todos.start(&first.id);
        let mut metadata = HashMap::new();
        let mut ctx = ToolContext {
            workspace: &ws,
            todos: &mut todos,
            job_id: "test-job",
            metadata: &mut metadata,
        };

        let tool = TodoCompleteTool;
        let result = tool.invoke(serde_json::json!({}), &mut ctx).await.unwrap();
        assert!(result.contains("Completed"));
        assert!(ctx.todos.get(&first.id).unwrap().status == crate::todo::TodoStatus::Completed);

        let result = tool.invoke(serde_json::json!({}), &mut ctx).await.unwrap();
        assert_eq!(result, "No todos to complete.");
    }

    #[tokio::test]
    async fn todo_write_replaces_list_with_parsed_priorities_and_ids() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mut todos = TodoManager::new(&ws, 1, 20);
        todos.add("Stale leftover task", Priority::Low);
        let mut metadata = HashMap::new();
        let mut ctx = ToolContext {
            workspace: &ws,
            todos: &mut todos,
            job_id: "test-job",
            metadata: &mut metadata,
        };

        let tool = TodoWriteTool;
        let result = tool
            .invoke(
                serde_json::json!({"todos": [
                    {"content": "Write the parser", "status": "in_progress", "priority": "high", "id": "todo_fixed"},
                    {"content": "Write docs", "status": "pending"},
                ]}),
                &mut ctx,
            )
            .await
            .unwrap();

        assert!(result.contains("Replaced active todo list with 2 item(s)"));
        let item = ctx.todos.get("todo_fixed").unwrap();
        assert_eq!(item.priority, Priority::High);
        assert_eq!(item.status, crate::todo::TodoStatus::InProgress);
        // No id supplied, so one is auto-generated; priority defaults to Medium.
        let (total, _, _, _) = ctx.todos.get_progress();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn todo_write_rejects_unrecognized_status() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mut todos = TodoManager::new(&ws, 1, 20);
        let mut metadata = HashMap::new();
        let mut ctx = ToolContext {
            workspace: &ws,
            todos: &mut todos,
            job_id: "test-job",
            metadata: &mut metadata,
        };

        let tool = TodoWriteTool;
        let err = tool
            .invoke(
                serde_json::json!({"todos": [{"content": "Do a thing", "status": "not_a_status"}]}),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Fatal(_)));
    }
}
