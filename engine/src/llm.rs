//! LLM client abstraction and a reqwest-based OpenAI-compatible implementation.
//!
//! Replaces the vendored completion-model crate the rest of this workspace
//! used to depend on (see DESIGN.md) with a small trait any chat-completions
//! endpoint can implement.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Message, ToolCall};

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("request body ({body_bytes} bytes, ~{token_count} tokens) exceeds hard limit of {limit} tokens")]
    ContextOverflow {
        token_count: usize,
        limit: usize,
        body_bytes: usize,
    },
}

/// A tool definition advertised to the model, JSON-Schema parameters.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The model's reply: free text and/or tool calls to execute.
#[derive(Debug, Clone)]
pub struct AssistantResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantResponse {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_message(self) -> Message {
        Message::assistant_with_tool_calls(self.content, self.tool_calls)
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> LlmResult<AssistantResponse>;

    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> LlmResult<AssistantResponse>;
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
    /// Layer-0 safety net: reject locally before sending if the serialized
    /// request implies more tokens than this, independent of whatever the
    /// `ContextManager` believes it already compacted down to.
    pub hard_token_limit: usize,
}

impl Default for OpenAiCompatibleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4".to_string(),
            request_timeout: Duration::from_secs(120),
            hard_token_limit: 128_000,
        }
    }
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: OpenAiCompatibleConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client config is valid");
        Self { http, config }
    }

    fn to_wire(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| match m {
                Message::System { content } => WireMessage {
                    role: "system".to_string(),
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Message::Human { content } => WireMessage {
                    role: "user".to_string(),
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Message::Assistant { content, tool_calls } => WireMessage {
                    role: "assistant".to_string(),
                    content: if content.is_empty() { None } else { Some(content.clone()) },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            tool_calls
                                .iter()
                                .map(|tc| WireToolCall {
                                    id: tc.id.clone(),
                                    r#type: "function".to_string(),
                                    function: WireFunctionCall {
                                        name: tc.name.clone(),
                                        arguments: tc.arguments.to_string(),
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: None,
                },
                Message::ToolResult { tool_call_id, content } => WireMessage {
                    role: "tool".to_string(),
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id.clone()),
                },
            })
            .collect()
    }

    async fn chat_completion(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> LlmResult<AssistantResponse> {
        let body = WireRequest {
            model: self.config.model.clone(),
            messages: Self::to_wire(messages),
            tools: if tools.is_empty() {
                None
            } else {
                Some(
                    tools
                        .iter()
                        .map(|t| WireToolDef {
                            r#type: "function".to_string(),
                            function: WireFunctionDef {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.parameters.clone(),
                            },
                        })
                        .collect(),
                )
            },
        };

        let body_bytes = serde_json::to_vec(&body).map_err(|e| LlmError::Malformed(e.to_string()))?;
        let estimated_tokens = body_bytes.len() / 4;
        if estimated_tokens > self.config.hard_token_limit {
            return Err(LlmError::ContextOverflow {
                token_count: estimated_tokens,
                limit: self.config.hard_token_limit,
                body_bytes: body_bytes.len(),
            });
        }

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body_bytes)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(LlmError::RateLimited { retry_after_ms });
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Transport(format!("{status}: {body}")));
        }

        let parsed: WireResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(AssistantResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn invoke(&self, messages: &[Message]) -> LlmResult<AssistantResponse> {
        self.chat_completion(messages, &[]).await
    }

    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> LlmResult<AssistantResponse> {
        self.chat_completion(messages, tools).await
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireToolDef>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireToolDef {
    r#type: String,
    function: WireFunctionDef,
}

#[derive(Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_wire_preserves_tool_call_shape() {
        let msgs = vec![Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_1".to_string(),
                name: "read_file".to_string(),
                arguments: serde_json::json!({"path": "plan.md"}),
            }],
        )];
        let wire = OpenAiCompatibleClient::to_wire(&msgs);
        assert_eq!(wire.len(), 1);
        let calls = wire[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "read_file");
    }

    #[test]
    fn to_wire_maps_tool_result_role() {
        let msgs = vec![Message::tool_result("call_1", "ok")];
        let wire = OpenAiCompatibleClient::to_wire(&msgs);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn chat_completion_rejects_oversized_body_before_sending() {
        let mut config = OpenAiCompatibleConfig::default();
        config.hard_token_limit = 10;
        let client = OpenAiCompatibleClient::new(config);
        let msgs = vec![Message::human("x".repeat(1000))];
        let err = client.chat_completion(&msgs, &[]).await.unwrap_err();
        match err {
            LlmError::ContextOverflow { limit, .. } => assert_eq!(limit, 10),
            other => panic!("expected ContextOverflow, got {other:?}"),
        }
    }
}
