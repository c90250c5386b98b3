//! Role configuration: the layered config a job driver loads to parameterize
//! the engine for a given agent role ("Creator", "Validator", ...).
//!
//! Layering follows the teacher's pattern: a `Default` impl seeded from
//! environment variables, optionally overridden by a role TOML file handed
//! to the CLI. There is no additional env-var layer on top of the file —
//! env vars are the bottom layer, not an override of it, so a role file is
//! always authoritative once provided.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::context::ContextConfig;
use crate::llm::OpenAiCompatibleConfig;
use crate::workspace::WorkspaceConfig;

/// Built-in strategic todo templates a role config may override. An absent
/// or empty vector falls back to `phase`'s hardcoded defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategicTodoTemplates {
    #[serde(default)]
    pub initial: Vec<String>,
    #[serde(default)]
    pub transition: Vec<String>,
    #[serde(default)]
    pub resume: Vec<String>,
}

/// Top-level engine configuration for one job driver process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub role: String,
    pub workspace: WorkspaceConfig,
    pub context: ContextConfig,
    pub llm: OpenAiCompatibleConfig,
    pub strategic_todos: StrategicTodoTemplates,

    pub min_todos: usize,
    pub max_todos: usize,
    pub max_iterations: u64,
    pub max_consecutive_llm_errors: u32,

    pub tool_retry_count: u32,
    pub tool_retry_base_delay: Duration,
    pub tool_retry_max_delay: Duration,

    /// Upper bound the Layer-0 HTTP preflight enforces before sending a
    /// request, independent of `context.compaction_threshold_tokens`.
    pub hard_token_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            role: std::env::var("AGENT_ROLE").unwrap_or_else(|_| "default".to_string()),
            workspace: WorkspaceConfig::default(),
            context: ContextConfig::default(),
            llm: OpenAiCompatibleConfig::default(),
            strategic_todos: StrategicTodoTemplates::default(),
            min_todos: std::env::var("AGENT_MIN_TODOS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            max_todos: std::env::var("AGENT_MAX_TODOS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            max_iterations: std::env::var("AGENT_MAX_ITERATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            max_consecutive_llm_errors: std::env::var("AGENT_MAX_LLM_ERRORS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            tool_retry_count: std::env::var("AGENT_TOOL_RETRY_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            tool_retry_base_delay: Duration::from_millis(
                std::env::var("AGENT_TOOL_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            tool_retry_max_delay: Duration::from_secs(
                std::env::var("AGENT_TOOL_RETRY_MAX_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            hard_token_limit: std::env::var("AGENT_HARD_TOKEN_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(128_000),
        }
    }
}

/// On-disk role config shape (TOML). Every field is optional; absent
/// fields leave the `Default` value untouched.
#[derive(Debug, Deserialize, Default)]
struct RoleConfigFile {
    role: Option<String>,
    min_todos: Option<usize>,
    max_todos: Option<usize>,
    max_iterations: Option<u64>,
    max_consecutive_llm_errors: Option<u32>,
    hard_token_limit: Option<usize>,

    llm_base_url: Option<String>,
    llm_api_key: Option<String>,
    llm_model: Option<String>,

    #[serde(default)]
    strategic_todos: StrategicTodoTemplates,
}

impl EngineConfig {
    /// Load a role config TOML file on top of [`EngineConfig::default`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read role config {}: {e}", path.display()))?;
        let file: RoleConfigFile = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse role config {}: {e}", path.display()))?;
        config.apply(file);
        Ok(config)
    }

    fn apply(&mut self, file: RoleConfigFile) {
        if let Some(role) = file.role {
            self.role = role;
        }
        if let Some(v) = file.min_todos {
            self.min_todos = v;
        }
        if let Some(v) = file.max_todos {
            self.max_todos = v;
        }
        if let Some(v) = file.max_iterations {
            self.max_iterations = v;
        }
        if let Some(v) = file.max_consecutive_llm_errors {
            self.max_consecutive_llm_errors = v;
        }
        if let Some(v) = file.hard_token_limit {
            self.hard_token_limit = v;
        }
        if let Some(v) = file.llm_base_url {
            self.llm.base_url = v;
        }
        if let Some(v) = file.llm_api_key {
            self.llm.api_key = v;
        }
        if let Some(v) = file.llm_model {
            self.llm.model = v;
        }
        if !file.strategic_todos.initial.is_empty() {
            self.strategic_todos.initial = file.strategic_todos.initial;
        }
        if !file.strategic_todos.transition.is_empty() {
            self.strategic_todos.transition = file.strategic_todos.transition;
        }
        if !file.strategic_todos.resume.is_empty() {
            self.strategic_todos.resume = file.strategic_todos.resume;
        }
    }

    pub fn checkpoint_db_path(&self, base: &Path, job_id: &str) -> PathBuf {
        base.join("checkpoints").join(format!("job_{job_id}.db"))
    }

    pub fn snapshot_base_path(&self, base: &Path) -> PathBuf {
        base.join("phase_snapshots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        std::env::remove_var("AGENT_MIN_TODOS");
        std::env::remove_var("AGENT_MAX_TODOS");
        let config = EngineConfig::default();
        assert_eq!(config.min_todos, 5);
        assert_eq!(config.max_todos, 20);
        assert!(config.hard_token_limit > 0);
    }

    #[test]
    fn load_applies_overrides_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("role.toml");
        std::fs::write(
            &path,
            r#"
            role = "validator"
            min_todos = 3
            max_todos = 10
            llm_model = "gpt-4o-mini"
            "#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.role, "validator");
        assert_eq!(config.min_todos, 3);
        assert_eq!(config.max_todos, 10);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn checkpoint_db_path_is_keyed_by_job_id() {
        let config = EngineConfig::default();
        let path = config.checkpoint_db_path(Path::new("/data"), "abc123");
        assert_eq!(path, PathBuf::from("/data/checkpoints/job_abc123.db"));
    }
}
