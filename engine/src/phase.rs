//! Phase-transition support: predefined strategic todo sets and
//! `todos.yaml` validation.
//!
//! Strategic phases run off a built-in template rather than agent-authored
//! content; tactical phases run off `todos.yaml`, which the agent writes
//! during the preceding strategic phase and which this module validates
//! before it is applied.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::workspace::{Workspace, WorkspaceResult};

pub type PhaseResult<T> = Result<T, PhaseError>;

const PHASE_STATE_PATH: &str = "phase_state.yaml";

#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("todos.yaml validation failed at item {index}: {message}")]
    Validation { index: usize, message: String },
    #[error("todos.yaml is not a list of strings: {0}")]
    Malformed(String),
}

/// A built-in strategic todo, lighter weight than `todo::TodoItem` since it
/// exists only to seed a fresh `TodoManager` at phase start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredefinedTodo {
    pub id: u32,
    pub content: String,
}

fn from_overrides_or(template: &str, overrides: Option<&[String]>, defaults: Vec<&str>) -> Vec<PredefinedTodo> {
    match overrides {
        Some(items) if !items.is_empty() => items
            .iter()
            .enumerate()
            .map(|(i, content)| PredefinedTodo {
                id: i as u32 + 1,
                content: content.clone(),
            })
            .collect(),
        _ => {
            tracing::warn!(template, "no role override configured, using built-in default strategic todos");
            defaults
                .into_iter()
                .enumerate()
                .map(|(i, content)| PredefinedTodo {
                    id: i as u32 + 1,
                    content: content.to_string(),
                })
                .collect()
        }
    }
}

/// Todos for the first strategic phase (job start): workspace exploration,
/// plan drafting, phase division, first tactical handoff.
///
/// `overrides` is the role config's template, if one was configured; an
/// empty or absent override falls back to the built-in defaults below.
pub fn initial_strategic_todos(overrides: Option<&[String]>) -> Vec<PredefinedTodo> {
    from_overrides_or(
        "initial",
        overrides,
        vec![
            "Explore the workspace and populate workspace.md with an overview \
             of the environment, available tools, and any existing context.",
            "Read the instructions.md file and create an execution plan in \
             plan.md. The plan should outline the phases needed to \
             complete the task.",
            "Divide the plan into phases, where each phase contains 5-20 \
             concrete, actionable todos.",
            "Create todos for the first tactical phase using the \
             next_phase_todos tool.",
        ],
    )
}

/// Todos for strategic phases between tactical phases: summarize, update
/// memory and plan, hand off the next tactical phase (or call
/// `job_complete`).
pub fn transition_strategic_todos(overrides: Option<&[String]>) -> Vec<PredefinedTodo> {
    from_overrides_or(
        "transition",
        overrides,
        vec![
            "Summarize what was accomplished in the previous tactical phase. \
             Note any issues encountered, decisions made, or discoveries.",
            "Update workspace.md with new learnings, patterns discovered, \
             or important context for future phases.",
            "Update plan.md to mark completed phases and adjust \
             upcoming phases if needed based on learnings.",
            "Create todos for the next tactical phase using next_phase_todos, \
             or call job_complete if the plan is fully executed.",
        ],
    )
}

/// Todos for the resume-from-feedback strategic phase: process human
/// feedback, evaluate existing outputs, rewrite the plan with corrective
/// phases, stage corrective todos. Must not call `job_complete`.
pub fn resume_strategic_todos(overrides: Option<&[String]>) -> Vec<PredefinedTodo> {
    from_overrides_or(
        "resume",
        overrides,
        vec![
            "Process the human feedback: read the feedback message and feedback.md, \
             categorize each item, and update workspace.md with a feedback summary.",
            "Evaluate existing output files against the feedback. \
             Check which files need minor edits, major rework, or rewrite.",
            "Rewrite plan.md with corrective phases ordered by feedback severity. \
             Each phase must trace to specific feedback items.",
            "Create corrective todos using next_phase_todos. Each todo must \
             reference specific feedback items and files. Do NOT call job_complete \
             — corrections have not been made yet.",
        ],
    )
}

/// `phase_state.yaml` mirror: a single key-value block describing the
/// current phase, rewritten whenever a phase starts.
#[derive(Debug, Clone, Serialize)]
struct PhaseStateFile {
    phase_number: u32,
    phase_type: &'static str,
    phase_name: String,
    started_at: chrono::DateTime<Utc>,
}

/// Overwrite `phase_state.yaml` with the current phase's metadata. Never
/// fails the caller: a write error is the caller's to log, not propagate,
/// since this file is a convenience mirror, not checkpointed state.
pub fn write_phase_state(workspace: &Workspace, phase_number: u32, is_strategic_phase: bool, phase_name: &str) -> WorkspaceResult<()> {
    let file = PhaseStateFile {
        phase_number,
        phase_type: if is_strategic_phase { "strategic" } else { "tactical" },
        phase_name: phase_name.to_string(),
        started_at: Utc::now(),
    };
    let yaml = serde_yaml::to_string(&file).unwrap_or_default();
    workspace.write_file(PHASE_STATE_PATH, &yaml)
}

/// Parse `todos.yaml` (a top-level list of strings) and validate length and
/// per-item content against `[min_todos, max_todos]` and the 10
/// non-whitespace-character minimum.
pub fn parse_and_validate_todos_yaml(yaml: &str, min_todos: usize, max_todos: usize) -> PhaseResult<Vec<String>> {
    let items: Vec<String> = serde_yaml::from_str(yaml).map_err(|e| PhaseError::Malformed(e.to_string()))?;

    if items.len() < min_todos {
        return Err(PhaseError::Validation {
            index: 0,
            message: format!("expected {min_todos}-{max_todos} items, got {}", items.len()),
        });
    }
    if items.len() > max_todos {
        return Err(PhaseError::Validation {
            index: 0,
            message: format!("expected {min_todos}-{max_todos} items, got {}", items.len()),
        });
    }

    for (i, item) in items.iter().enumerate() {
        let non_whitespace = item.trim().chars().filter(|c| !c.is_whitespace()).count();
        if non_whitespace < 10 {
            return Err(PhaseError::Validation {
                index: i + 1,
                message: format!("item has {non_whitespace} non-whitespace characters, need >= 10"),
            });
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceConfig;

    #[test]
    fn write_phase_state_round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkspaceConfig::default();
        config.git_versioning = false;
        let ws = Workspace::new(dir.path(), "job1", config);
        ws.initialize().unwrap();

        write_phase_state(&ws, 2, false, "Tactical Phase").unwrap();
        let yaml = ws.read_file(PHASE_STATE_PATH).unwrap();
        assert!(yaml.contains("phase_number: 2"));
        assert!(yaml.contains("phase_type: tactical"));
        assert!(yaml.contains("Tactical Phase"));
    }

    #[test]
    fn initial_strategic_todos_default_has_four_items() {
        let todos = initial_strategic_todos(None);
        assert_eq!(todos.len(), 4);
        assert_eq!(todos[0].id, 1);
        assert!(todos[3].content.contains("next_phase_todos"));
    }

    #[test]
    fn overrides_replace_defaults() {
        let overrides = vec!["Custom step one".to_string(), "Custom step two".to_string()];
        let todos = transition_strategic_todos(Some(&overrides));
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].content, "Custom step one");
    }

    #[test]
    fn empty_overrides_fall_back_to_defaults() {
        let todos = resume_strategic_todos(Some(&[]));
        assert_eq!(todos.len(), 4);
        assert!(todos[3].content.contains("Do NOT call job_complete"));
    }

    #[test]
    fn validate_todos_yaml_accepts_boundary_length() {
        let yaml = "- \"1234567890\"\n- \"abcdefghij\"\n- \"klmnopqrst\"\n- \"uvwxyzABCD\"\n- \"EFGHIJKLMN\"\n";
        let result = parse_and_validate_todos_yaml(yaml, 5, 20).unwrap();
        assert_eq!(result.len(), 5);
    }

    #[test]
    fn validate_todos_yaml_rejects_short_item() {
        let yaml = "- \"123456789\"\n- \"abcdefghij\"\n- \"klmnopqrst\"\n- \"uvwxyzABCD\"\n- \"EFGHIJKLMN\"\n";
        let err = parse_and_validate_todos_yaml(yaml, 5, 20).unwrap_err();
        match err {
            PhaseError::Validation { index, .. } => assert_eq!(index, 1),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn validate_todos_yaml_rejects_too_few() {
        let yaml = "- \"1234567890\"\n- \"abcdefghij\"\n";
        let err = parse_and_validate_todos_yaml(yaml, 5, 20).unwrap_err();
        match err {
            PhaseError::Validation { message, .. } => assert!(message.contains("got 2")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }
}
