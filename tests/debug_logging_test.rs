//! Confirms debug logging is emitted along the engine's attempt/iteration/
//! tool-dispatch boundaries. Mirrors the teacher's own
//! `tests/debug_logging_test.rs` convention: `env_logger::builder()
//! .is_test(true)` so output interleaves correctly under `cargo test`,
//! `try_init()` since multiple test binaries may race to install the
//! global logger.

use agentic_loop::prelude::*;
use agentic_loop::types::ContentBlock;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct RunState;
#[derive(Debug, Clone, Default)]
struct AttemptState;

struct ScriptedTransport {
    responses: Mutex<Vec<Message>>,
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn complete(&self, _request: ModelRequest) -> agentic_loop::Result<ModelResponse> {
        let mut guard = self.responses.lock().unwrap();
        if guard.is_empty() {
            return Err(Error::api("scripted transport exhausted"));
        }
        Ok(ModelResponse {
            message: guard.remove(0),
            usage: None,
        })
    }
}

/// Exercises `engine::execute` with `RUST_LOG=debug`-level logging
/// enabled; this test verifies the run completes cleanly with the
/// logger installed, not the exact log text (`log`'s API gives no
/// supported way to capture emitted records).
#[tokio::test]
async fn test_execute_runs_cleanly_with_debug_logging_enabled() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();

    let helper = tool::<RunState, AttemptState>("noop", "Does nothing")
        .build(|state, _input| async move { Ok(ToolOutcome::new(state, json!("ok"))) });

    let output_tool = tool::<RunState, AttemptState>("record_answer", "Record the final answer")
        .param("answer", "string")
        .build(|state, input| async move { Ok(ToolOutcome::new(state, input)) });

    let agent: AgentDefinition<RunState, AttemptState> = AgentDefinition::builder("logging-agent")
        .model(ModelConfig::new("test-model"))
        .tool(helper)
        .output_tool(output_tool)
        .assemble_prompt(|ctx| async move { Ok(ctx.input) })
        .build()
        .unwrap();

    let transport = ScriptedTransport {
        responses: Mutex::new(vec![
            Message::assistant(vec![ContentBlock::tool_use("call_1", "noop", json!({}))]),
            Message::assistant(vec![ContentBlock::tool_use(
                "call_2",
                "record_answer",
                json!({"answer": "done"}),
            )]),
        ]),
    };

    let outcome = engine::execute(&agent, &transport, "go", None).await.unwrap();

    assert_eq!(outcome.output, json!({"answer": "done"}));
}
