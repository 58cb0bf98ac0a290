//! Reference transport against OpenAI-compatible chat-completions servers
//! (LM Studio, Ollama, llama.cpp, vLLM). Single non-streaming request per
//! call — no SSE parsing, per the crate's scope.

use super::{ModelRequest, ModelResponse, ModelTransport, Usage};
use crate::retry::{RetryConfig, retry_with_backoff_conditional};
use crate::types::{ContentBlock, Message, MessageRole};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn message_to_wire(message: &Message) -> Vec<WireMessage> {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    };

    // A single engine Message can carry multiple tool results; the wire
    // format wants one "tool" message per result, so a tool-result-bearing
    // message expands to N wire messages while every other message is 1:1.
    let tool_results: Vec<_> = message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult(r) => Some(r),
            _ => None,
        })
        .collect();

    if !tool_results.is_empty() {
        return tool_results
            .iter()
            .map(|r| WireMessage {
                role: "tool".to_string(),
                content: Some(r.content.to_string()),
                tool_calls: None,
                tool_call_id: Some(r.tool_use_id.clone()),
            })
            .collect();
    }

    let tool_calls: Vec<WireToolCall> = message
        .tool_uses()
        .into_iter()
        .map(|t| WireToolCall {
            id: t.id.clone(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: t.name.clone(),
                arguments: t.input.to_string(),
            },
        })
        .collect();

    let text = message.text();

    vec![WireMessage {
        role: role.to_string(),
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    }]
}

fn wire_response_to_message(choice: WireResponseMessage) -> Result<Message> {
    let mut content = Vec::new();

    if let Some(text) = choice.content {
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
    }

    for call in choice.tool_calls.into_iter().flatten() {
        let input: Value = serde_json::from_str(&call.function.arguments).map_err(Error::Json)?;
        content.push(ContentBlock::tool_use(call.id, call.function.name, input));
    }

    Ok(Message::new(MessageRole::Assistant, content))
}

/// Talks to any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatibleTransport {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl OpenAiCompatibleTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let wire_messages: Vec<WireMessage> = request.messages.iter().flat_map(message_to_wire).collect();

        let wire_request = WireRequest {
            model: request.model.clone(),
            messages: wire_messages,
            stream: false,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.clone())
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&wire_request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(Error::api(format!("API error {}: {}", status, body)));
        }

        let parsed: WireResponse = response.json().await.map_err(Error::Http)?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::api("response had no choices"))?;

        let message = wire_response_to_message(choice.message)?;

        let usage = parsed.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse { message, usage })
    }
}

#[async_trait]
impl ModelTransport for OpenAiCompatibleTransport {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse> {
        retry_with_backoff_conditional(self.retry.clone(), || self.send_once(&request)).await
    }
}
