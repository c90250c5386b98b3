//! Conversation message model and the safe-slicing helper that keeps tool
//! call/result pairs intact across every compaction and trimming operation.

use serde::{Deserialize, Serialize};

/// A single tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Conversation message. Tagged variant, no duck typing: every compaction
/// helper pattern-matches on this enum directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    Human { content: String },
    Assistant {
        content: String,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content } => content,
            Self::Human { content } => content,
            Self::Assistant { content, .. } => content,
            Self::ToolResult { content, .. } => content,
        }
    }

    pub fn with_content(&self, content: String) -> Self {
        match self {
            Self::System { .. } => Self::System { content },
            Self::Human { .. } => Self::Human { content },
            Self::Assistant { tool_calls, .. } => Self::Assistant {
                content,
                tool_calls: tool_calls.clone(),
            },
            Self::ToolResult { tool_call_id, .. } => Self::ToolResult {
                tool_call_id: tool_call_id.clone(),
                content,
            },
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }
}

/// Verify the pairing invariant: every `ToolResult` in `messages` has a
/// preceding `Assistant` whose `tool_calls` contains a matching id.
pub fn validate_tool_pairing(messages: &[Message]) -> Result<(), String> {
    for (i, msg) in messages.iter().enumerate() {
        if let Message::ToolResult { tool_call_id, .. } = msg {
            let has_parent = messages[..i].iter().any(|m| {
                m.tool_calls().iter().any(|tc| &tc.id == tool_call_id)
            });
            if !has_parent {
                return Err(format!(
                    "ToolResult at index {i} (tool_call_id={tool_call_id}) has no preceding Assistant tool_call"
                ));
            }
        }
    }
    Ok(())
}

/// Find a safe starting index that doesn't orphan a `ToolResult` whose
/// `Assistant` parent would otherwise be dropped by the slice.
///
/// Walks backward from `target_start` until landing on an index that is
/// either: a `Human` message, an `Assistant` without tool calls, or the
/// `Assistant` that owns the `ToolResult` at the original boundary.
pub fn find_safe_slice_start(messages: &[Message], target_start: usize) -> usize {
    if target_start == 0 {
        return 0;
    }
    if target_start >= messages.len() {
        return messages.len();
    }

    let mut adjusted = target_start;

    match &messages[adjusted] {
        Message::ToolResult { tool_call_id, .. } => {
            let mut found = None;
            for i in (0..adjusted).rev() {
                match &messages[i] {
                    Message::Assistant { tool_calls, .. } => {
                        if tool_calls.iter().any(|tc| &tc.id == tool_call_id) {
                            found = Some(i);
                            break;
                        } else if tool_calls.is_empty() {
                            found = Some(i);
                            break;
                        }
                    }
                    Message::Human { .. } => {
                        found = Some(i);
                        break;
                    }
                    _ => {}
                }
            }
            adjusted = found.unwrap_or(0);
        }
        Message::Assistant { .. } | Message::Human { .. } => {
            // Already a safe boundary.
        }
        _ => {
            // System or other boundary messages are handled by callers
            // (they're usually filtered out before slicing); walking
            // backward one step mirrors the original's generic fallback.
            while adjusted > 0 {
                match &messages[adjusted] {
                    Message::ToolResult { .. } => adjusted -= 1,
                    _ => break,
                }
            }
        }
    }

    adjusted
}
