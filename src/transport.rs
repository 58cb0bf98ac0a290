//! The abstract model transport boundary.
//!
//! The engine ([`crate::engine`]) is generic over any [`ModelTransport`]
//! implementor; it knows nothing about HTTP, a specific provider's wire
//! format, or streaming. This crate ships one concrete implementation,
//! [`http::OpenAiCompatibleTransport`], as a convenience for callers who
//! just want to point at an OpenAI-compatible chat-completions endpoint —
//! but it is never required.

pub mod http;

use crate::Result;
use crate::types::Message;
use async_trait::async_trait;
use serde_json::Value;

/// One call to the model: the running conversation, the tools available
/// this turn, and generation parameters.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Tool declarations in OpenAI function-calling format
    /// (see [`crate::tools::Tool::to_openai_format`]).
    pub tools: Vec<Value>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Token accounting for a single model call, when the provider reports it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The model's reply to one [`ModelRequest`]: a single assistant message
/// (text and/or tool-use blocks) plus usage, if reported.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: Message,
    pub usage: Option<Usage>,
}

/// A single non-streaming request/response cycle with a model.
///
/// Implementors are responsible for translating [`ModelRequest`] into
/// their wire format and the raw reply back into a [`ModelResponse`].
/// Transient failures are the transport's concern (see
/// [`crate::retry`]); this trait only ever returns a fully-formed
/// response or a terminal [`crate::Error`].
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse>;
}
