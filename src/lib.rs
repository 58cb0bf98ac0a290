//! # agentic-loop
//!
//! A retry-bounded, iteration-bounded execution engine for tool-using LLM
//! agents against local OpenAI-compatible servers (LM Studio, Ollama,
//! llama.cpp, vLLM).
//!
//! ## Overview
//!
//! An [`agent::AgentDefinition`] pairs a prompt-assembly function, a set
//! of helper tools, and a terminal output tool with a validation
//! pipeline. [`engine::execute`] drives the conversation: it calls the
//! model, dispatches whatever tools it asks for through the
//! reducer-based [`tools::Tool`] protocol, and — once the model submits —
//! runs the candidate output through [`validation::ValidationPipeline`].
//! A validation failure starts a fresh attempt (up to
//! [`agent::ExecutionBounds::max_attempts`]); anything else (a transport
//! error, a malformed response, an exhausted iteration budget, or
//! cancellation) ends execution immediately with an
//! [`engine::ExecutionFailure`] — a typed [`error::ExecutionError`] paired
//! with the usage/latency metadata accumulated up to that point.
//!
//! ## Example
//!
//! ```rust,no_run
//! use agentic_loop::prelude::*;
//! use agentic_loop::transport::http::OpenAiCompatibleTransport;
//!
//! #[derive(Debug, Clone, Default)]
//! struct RunState;
//! #[derive(Debug, Clone, Default)]
//! struct AttemptState;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let answer_tool: Tool<RunState, AttemptState> = tool("record_answer", "Record the final answer")
//!         .param("answer", "string")
//!         .build(|state, input| async move { Ok(ToolOutcome::new(state, input)) });
//!
//!     let agent: AgentDefinition<RunState, AttemptState> = AgentDefinition::builder("qa-agent")
//!         .model(ModelConfig::new("qwen2.5-32b-instruct"))
//!         .output_tool(answer_tool)
//!         .assemble_prompt(|ctx| async move { Ok(ctx.input) })
//!         .build()?;
//!
//!     let transport = OpenAiCompatibleTransport::new("http://localhost:1234/v1", "not-needed")?;
//!
//!     let outcome = engine::execute(&agent, &transport, "What's the capital of France?", None).await?;
//!     println!("{}", outcome.output);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **agent**: [`agent::AgentDefinition`], its builder, and the
//!   observability event taxonomy.
//! - **engine**: the attempt/iteration state machine that drives execution.
//! - **tools**: the reducer-based tool protocol and builder.
//! - **validation**: the ordered validation-layer pipeline.
//! - **transport**: the [`transport::ModelTransport`] trait, plus the
//!   [`transport::http`] reference implementation.
//! - **types**: the wire-agnostic conversation data model.
//! - **hooks**: lifecycle hooks for observing and controlling execution.
//! - **context**: token estimation and history truncation utilities.
//! - **config**: provider configuration helpers for the reference transport.
//! - **retry**: exponential backoff with jitter, used by the reference transport.
//! - **sampler**: the diversity sampler for representative document snippets.
//! - **error**: [`error::Error`] (general) and [`error::ExecutionError`]
//!   (the fixed taxonomy `execute()` returns).

pub mod agent;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod retry;
pub mod sampler;
pub mod tools;
pub mod transport;
pub mod types;
pub mod validation;

pub use error::{Error, ExecutionError, Result};

/// Convenience module for the most commonly used types and functions.
/// Import with `use agentic_loop::prelude::*;`.
pub mod prelude {
    pub use crate::agent::{AgentDefinition, ExecutionBounds, ModelConfig, PromptContext};
    pub use crate::engine::{self, ExecutionFailure, ExecutionMetadata, ExecutionOutcome};
    pub use crate::error::{Error, ExecutionError, Result};
    pub use crate::hooks::{HookDecision, Hooks};
    pub use crate::tools::{Tool, ToolOutcome, ToolState, tool};
    pub use crate::transport::{ModelRequest, ModelResponse, ModelTransport};
    pub use crate::types::{ContentBlock, Message, MessageRole};
    pub use crate::validation::{ValidationLayer, ValidationPipeline};
}
