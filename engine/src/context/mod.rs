//! Context window management: tool-result clearing, truncation, trimming,
//! and LLM-driven summarization.
//!
//! Strategies are applied in order of increasing impact (cheapest first):
//! clearing old tool results, truncating long ones, trimming whole messages,
//! and finally summarizing with the LLM. Each is individually idempotent and
//! safe to call even when no compaction is actually needed.

mod retry;
mod tokens;

pub use retry::ToolRetryManager;
pub use tokens::{CharCountEstimator, TokenEstimator, WordCountEstimator};

use chrono::Utc;
use thiserror::Error;

use crate::message::{find_safe_slice_start, Message};
use crate::workspace::Workspace;

pub type ContextResult<T> = Result<T, ContextError>;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("summarization failed: {0}")]
    Summarization(String),
    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),
}

const PLACEHOLDER_TEXT: &str = "[Result processed - see workspace if needed]";

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub compaction_threshold_tokens: usize,
    pub summarization_threshold_tokens: usize,
    pub message_count_threshold: usize,
    pub message_count_min_tokens: usize,
    pub keep_recent_tool_results: usize,
    pub keep_recent_messages: usize,
    pub max_tool_result_length: usize,
    pub placeholder_text: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            compaction_threshold_tokens: 100_000,
            summarization_threshold_tokens: 100_000,
            message_count_threshold: 200,
            message_count_min_tokens: 30_000,
            keep_recent_tool_results: 10,
            keep_recent_messages: 10,
            max_tool_result_length: 5_000,
            placeholder_text: PLACEHOLDER_TEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextManagementState {
    pub total_tool_results_cleared: u64,
    pub total_messages_trimmed: u64,
    pub total_summarizations: u64,
    pub current_token_count: usize,
    pub summaries: Vec<String>,
    pub last_compaction_iteration: u64,
}

pub struct ContextManager {
    config: ContextConfig,
    estimator: Box<dyn TokenEstimator>,
    state: ContextManagementState,
}

impl ContextManager {
    pub fn new(config: ContextConfig, estimator: Box<dyn TokenEstimator>) -> Self {
        Self {
            config,
            estimator,
            state: ContextManagementState::default(),
        }
    }

    pub fn state(&self) -> &ContextManagementState {
        &self.state
    }

    pub fn get_token_count(&mut self, messages: &[Message]) -> usize {
        let count = self.estimator.estimate(messages);
        self.state.current_token_count = count;
        count
    }

    pub fn should_compact(&mut self, messages: &[Message]) -> bool {
        self.get_token_count(messages) > self.config.compaction_threshold_tokens
    }

    pub fn should_summarize(&mut self, messages: &[Message]) -> bool {
        let token_count = self.get_token_count(messages);
        let message_count = messages.len();

        if token_count > self.config.summarization_threshold_tokens {
            return true;
        }
        message_count > self.config.message_count_threshold
            && token_count > self.config.message_count_min_tokens
    }

    /// Replace old `ToolResult` messages with a placeholder, keeping the
    /// most recent `keep_recent` in full.
    pub fn clear_old_tool_results(&mut self, messages: &[Message], keep_recent: Option<usize>) -> Vec<Message> {
        let keep_recent = keep_recent.unwrap_or(self.config.keep_recent_tool_results);
        let tool_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_tool_result())
            .map(|(i, _)| i)
            .collect();

        if tool_indices.is_empty() {
            return messages.to_vec();
        }

        let num_to_clear = tool_indices.len().saturating_sub(keep_recent);
        let to_clear: std::collections::HashSet<usize> = tool_indices[..num_to_clear].iter().copied().collect();

        let mut cleared = 0u64;
        let result: Vec<Message> = messages
            .iter()
            .enumerate()
            .map(|(i, msg)| {
                if to_clear.contains(&i) {
                    if let Message::ToolResult { tool_call_id, .. } = msg {
                        cleared += 1;
                        return Message::tool_result(tool_call_id.clone(), self.config.placeholder_text.clone());
                    }
                }
                msg.clone()
            })
            .collect();

        if cleared > 0 {
            self.state.total_tool_results_cleared += cleared;
            tracing::debug!(cleared, "cleared old tool results");
        }
        result
    }

    /// Truncate `ToolResult` content beyond `max_length`, leaving the most
    /// recent `keep_recent` untouched.
    pub fn truncate_long_tool_results(
        &self,
        messages: &[Message],
        max_length: Option<usize>,
        keep_recent: Option<usize>,
    ) -> Vec<Message> {
        let max_length = max_length.unwrap_or(self.config.max_tool_result_length);
        let keep_recent = keep_recent.unwrap_or(self.config.keep_recent_tool_results);

        let tool_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_tool_result())
            .map(|(i, _)| i)
            .collect();
        if tool_indices.is_empty() {
            return messages.to_vec();
        }
        let recent: std::collections::HashSet<usize> = tool_indices
            .iter()
            .rev()
            .take(keep_recent)
            .copied()
            .collect();

        messages
            .iter()
            .enumerate()
            .map(|(i, msg)| match msg {
                Message::ToolResult { tool_call_id, content } if !recent.contains(&i) && content.len() > max_length => {
                    let omitted = content.len() - max_length;
                    let boundary = (0..=max_length).rev().find(|&i| content.is_char_boundary(i)).unwrap_or(0);
                    let truncated = format!(
                        "{}\n\n[TRUNCATED - {omitted} chars omitted, see workspace]",
                        &content[..boundary]
                    );
                    Message::tool_result(tool_call_id.clone(), truncated)
                }
                other => other.clone(),
            })
            .collect()
    }

    /// Trim to recent messages, preserving all `System` messages, the first
    /// `Human` message, and never orphaning a `ToolResult`.
    pub fn trim_messages(&mut self, messages: &[Message], keep_recent: Option<usize>) -> Vec<Message> {
        let keep_recent = keep_recent.unwrap_or(self.config.keep_recent_messages);

        let system_msgs: Vec<Message> = messages.iter().filter(|m| m.is_system()).cloned().collect();
        let conversation: Vec<Message> = messages.iter().filter(|m| !m.is_system()).cloned().collect();

        if conversation.len() <= keep_recent {
            return messages.to_vec();
        }

        let first_human_idx = conversation.iter().position(|m| m.is_human());

        let mut trimmed = Vec::new();
        let target_start = conversation.len() - keep_recent;
        if let Some(idx) = first_human_idx {
            if idx < target_start {
                trimmed.push(conversation[idx].clone());
            }
        }

        let safe_start = find_safe_slice_start(&conversation, target_start);
        trimmed.extend(conversation[safe_start..].iter().cloned());

        let trimmed_count = conversation.len() - trimmed.len();
        if trimmed_count > 0 {
            self.state.total_messages_trimmed += trimmed_count as u64;
            tracing::info!(trimmed_count, "trimmed old messages");
        }

        let mut result = system_msgs;
        result.extend(trimmed);
        result
    }

    /// Apply clearing, truncation, and (if still over threshold) trimming.
    pub fn prepare_messages_for_llm(&mut self, messages: &[Message], aggressive: bool) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let token_count = self.get_token_count(messages);
        let should_be_aggressive = aggressive || token_count > self.config.compaction_threshold_tokens;

        let mut result = if should_be_aggressive {
            self.clear_old_tool_results(messages, None)
        } else {
            messages.to_vec()
        };

        result = self.truncate_long_tool_results(&result, None, None);

        let new_token_count = self.get_token_count(&result);
        if new_token_count > self.config.compaction_threshold_tokens {
            tracing::warn!(
                new_token_count,
                threshold = self.config.compaction_threshold_tokens,
                "context still over threshold after tool compaction, trimming messages"
            );
            result = self.trim_messages(&result, None);
        }

        result
    }

    fn format_for_summary(messages: &[Message]) -> String {
        let mut parts = Vec::new();
        for msg in messages {
            match msg {
                Message::System { .. } => continue,
                Message::Human { content } => {
                    let snippet: String = content.chars().take(500).collect();
                    parts.push(format!("User: {snippet}"));
                }
                Message::Assistant { content, tool_calls } => {
                    if !tool_calls.is_empty() {
                        let names: Vec<&str> = tool_calls.iter().map(|tc| tc.name.as_str()).collect();
                        parts.push(format!("Assistant: [Called tools: {}]", names.join(", ")));
                    } else if !content.is_empty() {
                        let snippet: String = content.chars().take(300).collect();
                        parts.push(format!("Assistant: {snippet}..."));
                    }
                }
                Message::ToolResult { content, .. } => {
                    parts.push(format!("[Tool result: {} chars]", content.len()));
                }
            }
        }
        parts.join("\n")
    }

    /// Summarize `messages` via `llm` and record the summary in state.
    pub async fn summarize_conversation(
        &mut self,
        messages: &[Message],
        llm: &dyn crate::llm::LlmClient,
    ) -> String {
        let conversation_text = Self::format_for_summary(messages);
        let prompt = format!(
            "Summarize this agent conversation concisely.\n\
             Focus on:\n\
             1. What tasks were completed\n\
             2. Key decisions made\n\
             3. Important information discovered\n\
             4. Current progress and next steps\n\
             5. Any errors or blockers encountered\n\n\
             Keep the summary under 500 words. Use bullet points.\n\n\
             Conversation:\n{conversation_text}\n\n\
             Summary:"
        );

        match llm.invoke(&[Message::human(prompt)]).await {
            Ok(response) => {
                let summary = response.content().to_string();
                self.state.total_summarizations += 1;
                self.state.summaries.push(summary.clone());
                tracing::info!(chars = summary.len(), "generated summary");
                summary
            }
            Err(e) => {
                tracing::error!(error = %e, "summarization failed");
                format!("[Summarization failed: {e}]")
            }
        }
    }

    /// Summarize older messages and compact the conversation, replacing
    /// everything but the kept recent window with a single summary message.
    pub async fn summarize_and_compact(
        &mut self,
        messages: &[Message],
        llm: &dyn crate::llm::LlmClient,
    ) -> Vec<Message> {
        let system_msgs: Vec<Message> = messages.iter().filter(|m| m.is_system()).cloned().collect();
        let conversation: Vec<Message> = messages.iter().filter(|m| !m.is_system()).cloned().collect();

        if conversation.len() <= self.config.keep_recent_messages {
            return messages.to_vec();
        }

        let split = conversation.len() - self.config.keep_recent_messages;
        let to_summarize = &conversation[..split];
        let recent = &conversation[split..];

        let summary = self.summarize_conversation(to_summarize, llm).await;
        let summary_msg = Message::system(format!("[Summary of prior work]\n{summary}"));

        let mut result = system_msgs;
        result.push(summary_msg);
        result.extend(recent.iter().cloned());

        tracing::info!(
            before = messages.len(),
            after = result.len(),
            summarized = to_summarize.len(),
            "compacted conversation"
        );
        result
    }

    /// Bring `messages` within configured limits, escalating through
    /// compaction and, if still over budget (or `force`), summarization.
    ///
    /// `force=true` is used at the strategic→tactical boundary so the next
    /// phase starts from a clean context regardless of current thresholds.
    pub async fn ensure_within_limits(
        &mut self,
        messages: &[Message],
        llm: &dyn crate::llm::LlmClient,
        force: bool,
    ) -> Vec<Message> {
        let compacted = self.prepare_messages_for_llm(messages, force);
        if force || self.should_summarize(&compacted) {
            self.summarize_and_compact(&compacted, llm).await
        } else {
            compacted
        }
    }
}

/// Write an error report to `output/error_<timestamp>.md`. Best effort: a
/// write failure is logged, never propagated.
pub fn write_error_to_workspace(
    workspace: &Workspace,
    error_type: &str,
    message: &str,
    recoverable: bool,
    traceback: Option<&str>,
    context: &[(&str, &str)],
) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = format!("output/error_{timestamp}.md");

    let mut content = format!(
        "# Error Report\n\n\
         **Timestamp:** {}\n\
         **Error Type:** {error_type}\n\
         **Recoverable:** {recoverable}\n\n\
         ## Error Message\n\n{message}\n\n\
         ## Stack Trace\n\n```\n{}\n```\n\n\
         ## Context\n\n",
        Utc::now().to_rfc3339(),
        traceback.unwrap_or("No traceback available"),
    );

    if context.is_empty() {
        content.push_str("No additional context available.\n");
    } else {
        for (k, v) in context {
            content.push_str(&format!("- **{k}:** {v}\n"));
        }
    }

    content.push_str(
        "\n## Recovery Suggestions\n\n\
         1. Check the workspace files for partial results\n\
         2. Review the todo list for completed vs pending items\n\
         3. Check the archive folder for completed phase summaries\n\
         4. Review the error message for actionable information\n",
    );

    match workspace.write_file(&path, &content) {
        Ok(()) => {
            tracing::info!(path = %path, "error report written");
            path
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to write error report");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    fn mgr() -> ContextManager {
        ContextManager::new(ContextConfig::default(), Box::new(CharCountEstimator))
    }

    fn tc(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "read_file".to_string(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn clear_old_tool_results_keeps_recent() {
        let mut m = mgr();
        let msgs: Vec<Message> = (0..5)
            .flat_map(|i| {
                vec![
                    Message::assistant_with_tool_calls("", vec![tc(&format!("c{i}"))]),
                    Message::tool_result(format!("c{i}"), format!("result {i}")),
                ]
            })
            .collect();
        let cleared = m.clear_old_tool_results(&msgs, Some(2));
        let placeholders = cleared
            .iter()
            .filter(|msg| msg.is_tool_result() && msg.content() == PLACEHOLDER_TEXT)
            .count();
        assert_eq!(placeholders, 3);
        assert_eq!(m.state().total_tool_results_cleared, 3);
    }

    #[test]
    fn truncate_long_tool_results_preserves_recent() {
        let m = mgr();
        let long = "x".repeat(100);
        let msgs = vec![
            Message::tool_result("c1", long.clone()),
            Message::tool_result("c2", long.clone()),
        ];
        let result = m.truncate_long_tool_results(&msgs, Some(10), Some(1));
        assert!(result[0].content().contains("TRUNCATED"));
        assert_eq!(result[1].content(), long);
    }

    #[test]
    fn trim_messages_preserves_system_and_first_human() {
        let mut m = mgr();
        let mut msgs = vec![Message::system("sys"), Message::human("original task")];
        for i in 0..20 {
            msgs.push(Message::assistant(format!("turn {i}")));
        }
        let trimmed = m.trim_messages(&msgs, Some(5));
        assert!(trimmed.iter().any(|msg| msg.is_system()));
        assert!(trimmed.iter().any(|msg| msg.content() == "original task"));
        assert!(trimmed.len() < msgs.len());
    }

    #[test]
    fn trim_messages_never_orphans_tool_result() {
        let mut m = mgr();
        let msgs = vec![
            Message::human("task"),
            Message::assistant_with_tool_calls("", vec![tc("call_1")]),
            Message::tool_result("call_1", "result"),
            Message::assistant("done"),
        ];
        let trimmed = m.trim_messages(&msgs, Some(1));
        assert!(crate::message::validate_tool_pairing(&trimmed).is_ok());
    }

    #[test]
    fn should_summarize_on_token_threshold() {
        let mut config = ContextConfig::default();
        config.summarization_threshold_tokens = 10;
        let mut m = ContextManager::new(config, Box::new(CharCountEstimator));
        let msgs = vec![Message::human("x".repeat(100))];
        assert!(m.should_summarize(&msgs));
    }

    #[test]
    fn write_error_to_workspace_returns_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::workspace::WorkspaceConfig::default();
        config.git_versioning = false;
        let ws = Workspace::new(dir.path(), "test-job", config);
        ws.initialize().unwrap();
        let path = write_error_to_workspace(&ws, "llm_fatal", "boom", false, None, &[("phase", "1")]);
        assert!(path.starts_with("output/error_"));
        let written = ws.read_file(&path).unwrap();
        assert!(written.contains("## Stack Trace"));
        assert!(written.contains("No traceback available"));
    }

    #[test]
    fn write_error_to_workspace_includes_supplied_traceback() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::workspace::WorkspaceConfig::default();
        config.git_versioning = false;
        let ws = Workspace::new(dir.path(), "test-job", config);
        ws.initialize().unwrap();
        let path = write_error_to_workspace(&ws, "tool_fatal", "boom", true, Some("ToolFatal { tool: \"x\" }"), &[]);
        let written = ws.read_file(&path).unwrap();
        assert!(written.contains("ToolFatal { tool: \"x\" }"));
    }
}
