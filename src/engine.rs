//! The execution engine: a retry-bounded, iteration-bounded state machine
//! driving a tool-using conversation with a model.
//!
//! Terminology:
//!
//! - An **attempt** is one full cycle: prompt assembly, the iteration
//!   loop, and validation. Only a validation failure on a well-formed
//!   candidate starts a new attempt; every other failure mode (a
//!   transport error, a turn with no tool calls, an exhausted iteration
//!   budget, or cancellation) ends execution immediately.
//! - An **iteration** is one model call plus whatever tool dispatch its
//!   reply triggers.
//!
//! Conversation history is a single growing log for the whole execution,
//! not reset per attempt: the initial user message is appended once, each
//! iteration appends an assistant message and a tool-results message, and
//! each failed attempt appends one feedback message quoting the failing
//! validation layer before a fresh attempt begins. Run state carries
//! across attempts; attempt state is reconstructed from scratch for each.
//!
//! Without reflection, calling the output tool ends the attempt
//! immediately with its input as the candidate. With reflection (an
//! agent built via [`crate::agent::AgentDefinitionBuilder::reflection`]),
//! calling the output tool instead runs the reflection handler and keeps
//! iterating; the model must call the reserved `submit` tool — injected
//! into the tool list only in this mode — to end the attempt. Calling
//! `submit` before any output has been recorded is
//! [`ExecutionError::SubmitBeforeOutput`].

use crate::agent::{AgentDefinition, ExecutionEvent, PromptContext};
use crate::error::{CancellationPhase, ExecutionError, LayerFailure};
use crate::hooks::{PostToolUseEvent, PreToolUseEvent, UserPromptSubmitEvent};
use crate::tools::ToolState;
use crate::transport::{ModelRequest, ModelTransport, Usage};
use crate::types::{ContentBlock, Message, MessageRole, ToolResultBlock, ToolUseBlock};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Reserved tool name injected into the model's tool list only in
/// reflection mode. Never dispatched through the tool-reducer protocol —
/// the engine handles it directly.
pub const SUBMIT_TOOL_NAME: &str = "submit";

fn submit_tool_schema() -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": SUBMIT_TOOL_NAME,
            "description": "Call this once the output tool's recorded candidate is ready to be the final answer.",
            "parameters": {"type": "object", "properties": {}},
        }
    })
}

/// Aggregate token usage across every model call in an `execute` run.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageTotals {
    fn add(&mut self, usage: Usage) {
        self.prompt_tokens += usage.prompt_tokens as u64;
        self.completion_tokens += usage.completion_tokens as u64;
        self.total_tokens += usage.total_tokens as u64;
    }
}

/// Observability summary for one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    pub attempts_used: u32,
    pub total_iterations: u32,
    pub usage: UsageTotals,
    pub elapsed: Duration,
    /// Errors raised by hook or observability callbacks. Callbacks never
    /// abort execution; their failures are only ever recorded here.
    pub callback_errors: Vec<String>,
}

/// The successful result of `execute`: the validated candidate output,
/// the run state as of the winning attempt, and observability metadata.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome<R> {
    pub output: Value,
    pub run_state: R,
    pub metadata: ExecutionMetadata,
}

/// An `execute` failure, paired with the same observability metadata a
/// successful run carries — usage, elapsed time, and callback errors
/// accumulated up to the point of failure (`spec.md` §6, "Metadata shape
/// (success and failure)").
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    #[source]
    pub error: ExecutionError,
    pub metadata: ExecutionMetadata,
}

struct Emitter<'a, R, A> {
    agent: &'a AgentDefinition<R, A>,
    callback_errors: Vec<String>,
}

impl<'a, R, A> Emitter<'a, R, A> {
    fn new(agent: &'a AgentDefinition<R, A>) -> Self {
        Self {
            agent,
            callback_errors: Vec::new(),
        }
    }

    /// Fire-and-forget: an observability handler never influences control
    /// flow or propagates an error back to the caller, per the callback
    /// safety wrapper (`spec.md` §4.8).
    async fn emit(&mut self, event: ExecutionEvent) {
        if let Some(handler) = &self.agent.on_event {
            handler(event).await;
        }
    }

    fn record_callback_error(&mut self, context: &str, reason: impl Into<String>) {
        self.callback_errors
            .push(format!("{context}: {}", reason.into()));
    }
}

fn check_cancelled(
    cancel: Option<&Arc<AtomicBool>>,
    attempt: u32,
    phase: CancellationPhase,
) -> Result<(), ExecutionError> {
    if let Some(flag) = cancel {
        if flag.load(Ordering::SeqCst) {
            return Err(ExecutionError::ExecutionCancelled { attempt, phase });
        }
    }
    Ok(())
}

/// What one iteration's model turn resolved to, after classifying its
/// tool-use blocks per `spec.md` §4.1a.
enum TurnOutcome {
    /// Helpers (and, in reflection mode, the output tool) ran; keep
    /// iterating. Carries the tool-result blocks to append to history.
    Continue(Vec<ContentBlock>),
    /// The attempt is over with this candidate. No tool-result message
    /// is appended for this turn — the attempt's history is about to be
    /// judged or discarded either way.
    Output(Value),
    /// `submit` fired before any output was ever recorded.
    SubmitBeforeOutput,
    /// The model's turn contained no tool calls at all.
    NoToolUse,
}

#[allow(clippy::too_many_arguments)]
async fn run_tool_calls<R, A>(
    agent: &AgentDefinition<R, A>,
    tool_uses: &[ToolUseBlock],
    state: &mut ToolState<R, A>,
    last_candidate: &mut Option<Value>,
    history_snapshot: &[Message],
    attempt: u32,
    iteration: u32,
    emitter: &mut Emitter<'_, R, A>,
) -> TurnOutcome
where
    R: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    let has_reflection = agent.reflection.is_some();

    if tool_uses.is_empty() {
        return TurnOutcome::NoToolUse;
    }

    let submit_call = has_reflection
        .then(|| tool_uses.iter().find(|t| t.name == SUBMIT_TOOL_NAME))
        .flatten();

    if let Some(_submit) = submit_call {
        // Submit dominates: an output call in the same turn is taken
        // directly as the candidate without running reflection on it.
        if let Some(output_call) = tool_uses.iter().rev().find(|t| t.name == agent.output_tool.name) {
            return TurnOutcome::Output(output_call.input.clone());
        }
        return match last_candidate.take() {
            Some(candidate) => TurnOutcome::Output(candidate),
            None => TurnOutcome::SubmitBeforeOutput,
        };
    }

    let output_call = tool_uses.iter().rev().find(|t| t.name == agent.output_tool.name);

    if let Some(output_call) = output_call {
        if !has_reflection {
            // Output tool's reducer never runs; helpers alongside it
            // still execute in document order (spec.md §9, open question
            // resolution: execute all helpers, then exit with the last
            // output block as candidate).
            run_helpers(agent, tool_uses, state, history_snapshot, attempt, iteration, emitter).await;
            return TurnOutcome::Output(output_call.input.clone());
        }

        // Reflection mode: run the reflection handler in place of the
        // output tool's ordinary reducer, record the candidate, and keep
        // iterating. Other tool calls in the same turn still execute.
        let mut results = Vec::new();
        for tool_use in tool_uses {
            if tool_use.name == agent.output_tool.name {
                continue;
            }
            results.push(
                dispatch_one(agent, tool_use, state, history_snapshot, attempt, iteration, emitter).await,
            );
        }

        let reflection = agent.reflection.as_ref().expect("has_reflection checked above");
        let pre_event = PreToolUseEvent::new(
            output_call.name.clone(),
            output_call.input.clone(),
            output_call.id.clone(),
            history_snapshot.to_vec(),
        );
        let mut effective_input = output_call.input.clone();
        let mut blocked = None;
        if let Some(decision) = agent.hooks.execute_pre_tool_use(pre_event).await {
            if !decision.continue_execution {
                blocked = Some(decision.reason.unwrap_or_else(|| "blocked by hook".to_string()));
            } else if let Some(modified) = decision.modified_input {
                effective_input = modified;
            }
        }

        let feedback_block = if let Some(reason) = blocked {
            ContentBlock::ToolResult(ToolResultBlock::error(
                output_call.id.clone(),
                Value::String(format!("Error: {reason}")),
            ))
        } else {
            match reflection(state.clone(), effective_input.clone()).await {
                Ok(outcome) => {
                    *state = outcome.state;
                    *last_candidate = Some(output_call.input.clone());
                    emitter
                        .emit(ExecutionEvent::ToolCallCompleted {
                            attempt,
                            iteration,
                            tool_name: output_call.name.clone(),
                            success: true,
                        })
                        .await;
                    ContentBlock::tool_result(output_call.id.clone(), outcome.result)
                }
                Err(reason) => {
                    emitter
                        .emit(ExecutionEvent::ToolCallCompleted {
                            attempt,
                            iteration,
                            tool_name: output_call.name.clone(),
                            success: false,
                        })
                        .await;
                    ContentBlock::ToolResult(ToolResultBlock::error(
                        output_call.id.clone(),
                        Value::String(format!("Error: {reason}")),
                    ))
                }
            }
        };

        // Reinsert the output tool's result in its original document
        // position so the returned block order matches `tool_uses`.
        let mut ordered = Vec::with_capacity(tool_uses.len());
        let mut non_output = results.into_iter();
        for tool_use in tool_uses {
            if tool_use.name == agent.output_tool.name {
                ordered.push(feedback_block.clone());
            } else {
                ordered.push(non_output.next().expect("one result per non-output tool use"));
            }
        }

        return TurnOutcome::Continue(ordered);
    }

    let results = run_helpers(agent, tool_uses, state, history_snapshot, attempt, iteration, emitter).await;
    TurnOutcome::Continue(results)
}

async fn run_helpers<R, A>(
    agent: &AgentDefinition<R, A>,
    tool_uses: &[ToolUseBlock],
    state: &mut ToolState<R, A>,
    history_snapshot: &[Message],
    attempt: u32,
    iteration: u32,
    emitter: &mut Emitter<'_, R, A>,
) -> Vec<ContentBlock>
where
    R: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    let mut results = Vec::with_capacity(tool_uses.len());
    for tool_use in tool_uses {
        if tool_use.name == agent.output_tool.name || tool_use.name == SUBMIT_TOOL_NAME {
            continue;
        }
        results.push(dispatch_one(agent, tool_use, state, history_snapshot, attempt, iteration, emitter).await);
    }
    results
}

/// Dispatch one helper tool-use block: fires PreToolUse/PostToolUse
/// around the reducer, maps an unknown tool name or a reducer error to
/// an `is_error` tool-result rather than aborting the loop.
async fn dispatch_one<R, A>(
    agent: &AgentDefinition<R, A>,
    tool_use: &ToolUseBlock,
    state: &mut ToolState<R, A>,
    history_snapshot: &[Message],
    attempt: u32,
    iteration: u32,
    emitter: &mut Emitter<'_, R, A>,
) -> ContentBlock
where
    R: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    log::debug!(
        "agent '{}' attempt {attempt} iteration {iteration} dispatching tool '{}'",
        agent.name,
        tool_use.name
    );
    emitter
        .emit(ExecutionEvent::ToolCallStarted {
            attempt,
            iteration,
            tool_name: tool_use.name.clone(),
        })
        .await;

    let Some(matched) = agent.tools.iter().find(|t| t.name == tool_use.name) else {
        emitter
            .emit(ExecutionEvent::ToolCallCompleted {
                attempt,
                iteration,
                tool_name: tool_use.name.clone(),
                success: false,
            })
            .await;
        return ContentBlock::ToolResult(ToolResultBlock::error(
            tool_use.id.clone(),
            Value::String(format!("Error: Unknown tool {}", tool_use.name)),
        ));
    };

    let pre_event = PreToolUseEvent::new(
        tool_use.name.clone(),
        tool_use.input.clone(),
        tool_use.id.clone(),
        history_snapshot.to_vec(),
    );

    let mut effective_input = tool_use.input.clone();
    if let Some(decision) = agent.hooks.execute_pre_tool_use(pre_event).await {
        if !decision.continue_execution {
            emitter
                .emit(ExecutionEvent::ToolCallCompleted {
                    attempt,
                    iteration,
                    tool_name: tool_use.name.clone(),
                    success: false,
                })
                .await;
            let reason = decision.reason.unwrap_or_else(|| "blocked by hook".to_string());
            return ContentBlock::ToolResult(ToolResultBlock::error(
                tool_use.id.clone(),
                Value::String(format!("Error: {reason}")),
            ));
        }
        if let Some(modified) = decision.modified_input {
            effective_input = modified;
        }
    }

    match matched.execute(state.clone(), effective_input.clone()).await {
        Ok(outcome) => {
            *state = outcome.state;

            let post_event = PostToolUseEvent::new(
                tool_use.name.clone(),
                effective_input,
                tool_use.id.clone(),
                outcome.result.clone(),
                history_snapshot.to_vec(),
            );
            let mut final_result = outcome.result;
            if let Some(decision) = agent.hooks.execute_post_tool_use(post_event).await {
                if let Some(modified) = decision.modified_input {
                    final_result = modified;
                }
            }

            emitter
                .emit(ExecutionEvent::ToolCallCompleted {
                    attempt,
                    iteration,
                    tool_name: tool_use.name.clone(),
                    success: true,
                })
                .await;
            ContentBlock::tool_result(tool_use.id.clone(), final_result)
        }
        Err(reason) => {
            emitter
                .emit(ExecutionEvent::ToolCallCompleted {
                    attempt,
                    iteration,
                    tool_name: tool_use.name.clone(),
                    success: false,
                })
                .await;
            ContentBlock::ToolResult(ToolResultBlock::error(
                tool_use.id.clone(),
                Value::String(format!("Error: {reason}")),
            ))
        }
    }
}

enum AttemptOutcome {
    Validated(Value),
    LayerFailed(LayerFailure),
    HardStop(ExecutionError),
}

#[allow(clippy::too_many_arguments)]
async fn run_attempt<R, A>(
    agent: &AgentDefinition<R, A>,
    transport: &dyn ModelTransport,
    attempt: u32,
    run_state: &mut R,
    history: &mut Vec<Message>,
    cancel: Option<&Arc<AtomicBool>>,
    emitter: &mut Emitter<'_, R, A>,
    usage: &mut UsageTotals,
) -> (u32, AttemptOutcome)
where
    R: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    log::debug!("agent '{}' starting attempt {attempt}", agent.name);

    if let Err(e) = check_cancelled(cancel, attempt, CancellationPhase::PromptGeneration) {
        return (0, AttemptOutcome::HardStop(e));
    }

    let mut state = ToolState::new(run_state.clone(), agent.initial_attempt_state());
    let mut iteration: u32 = 0;
    let mut last_candidate: Option<Value> = None;

    let outcome = loop {
        iteration += 1;
        emitter
            .emit(ExecutionEvent::IterationStarted { attempt, iteration })
            .await;

        if iteration > agent.bounds.max_iterations {
            log::warn!(
                "agent '{}' attempt {attempt} exceeded max_iterations ({})",
                agent.name,
                agent.bounds.max_iterations
            );
            break AttemptOutcome::HardStop(ExecutionError::MaxIterationsExceeded {
                attempt,
                iteration_count: iteration - 1,
                max_iterations: agent.bounds.max_iterations,
            });
        }

        if let Err(e) = check_cancelled(cancel, attempt, CancellationPhase::ApiCall) {
            break AttemptOutcome::HardStop(e);
        }

        let mut tool_schemas = vec![agent.output_tool.to_openai_format()];
        tool_schemas.extend(agent.tools.iter().map(|t| t.to_openai_format()));
        if agent.reflection.is_some() {
            tool_schemas.push(submit_tool_schema());
        }

        let request = ModelRequest {
            model: agent.model.model.clone(),
            messages: history.clone(),
            tools: tool_schemas,
            temperature: agent.model.temperature,
            max_tokens: agent.model.max_tokens,
        };

        let response = match transport.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                break AttemptOutcome::HardStop(ExecutionError::ApiError {
                    attempt,
                    message: e.to_string(),
                });
            }
        };

        if let Some(u) = response.usage {
            usage.add(u);
        }

        let assistant_message = response.message.clone();
        let tool_uses: Vec<ToolUseBlock> = assistant_message.tool_uses().into_iter().cloned().collect();
        history.push(assistant_message);

        let turn = run_tool_calls(
            agent,
            &tool_uses,
            &mut state,
            &mut last_candidate,
            history,
            attempt,
            iteration,
            emitter,
        )
        .await;

        match turn {
            TurnOutcome::NoToolUse => {
                break AttemptOutcome::HardStop(ExecutionError::OutputToolNotUsed {
                    attempt,
                    iteration_count: iteration,
                    expected_tool: agent.output_tool.name.clone(),
                });
            }
            TurnOutcome::SubmitBeforeOutput => {
                break AttemptOutcome::HardStop(ExecutionError::SubmitBeforeOutput {
                    attempt,
                    iteration_count: iteration,
                });
            }
            TurnOutcome::Output(candidate) => {
                if let Err(e) = check_cancelled(cancel, attempt, CancellationPhase::Validation) {
                    break AttemptOutcome::HardStop(e);
                }

                let pipeline = crate::validation::ValidationPipeline::new(
                    agent.output_tool.parameters.clone(),
                    agent.extra_validation_layers.clone(),
                );

                let mut layer_events = Vec::new();
                let result = pipeline.run(&candidate, |event| layer_events.push(event)).await;

                for event in layer_events {
                    match event {
                        crate::validation::LayerEvent::Start { layer_name } => {
                            emitter
                                .emit(ExecutionEvent::ValidationLayerStarted { attempt, layer_name })
                                .await;
                        }
                        crate::validation::LayerEvent::Complete { layer_name, passed } => {
                            emitter
                                .emit(ExecutionEvent::ValidationLayerCompleted {
                                    attempt,
                                    layer_name,
                                    passed,
                                })
                                .await;
                        }
                    }
                }

                match result {
                    Ok(()) => {
                        log::debug!("agent '{}' attempt {attempt} passed validation", agent.name);
                        break AttemptOutcome::Validated(candidate);
                    }
                    Err((layer_name, reason)) => {
                        log::warn!(
                            "agent '{}' attempt {attempt} failed validation layer '{layer_name}': {reason}",
                            agent.name
                        );
                        let layer_description = agent
                            .extra_validation_layers
                            .iter()
                            .find(|l| l.name == layer_name)
                            .map(|l| l.description.clone())
                            .unwrap_or_else(|| "Validates output shape".to_string());

                        break AttemptOutcome::LayerFailed(LayerFailure {
                            layer_name,
                            layer_description,
                            error: reason,
                        });
                    }
                }
            }
            TurnOutcome::Continue(tool_results) => {
                // No dedicated checkpoint here: per spec.md §4.7 the four
                // checkpoints are prompt assembly, each transport call,
                // validation, and error-prompt assembly — cancellation
                // raised here is observed at the next loop's ApiCall check.
                history.push(Message::new(MessageRole::User, tool_results));
            }
        }
    };

    *run_state = state.run;
    (iteration, outcome)
}

fn failure_with_metadata(
    error: ExecutionError,
    attempts_used: u32,
    total_iterations: u32,
    usage: UsageTotals,
    started: Instant,
    callback_errors: Vec<String>,
) -> ExecutionFailure {
    ExecutionFailure {
        error,
        metadata: ExecutionMetadata {
            attempts_used,
            total_iterations,
            usage,
            elapsed: started.elapsed(),
            callback_errors,
        },
    }
}

/// Run the execution engine: attempt a validated output for `input`,
/// retrying fresh attempts on validation failure up to
/// `agent.bounds.max_attempts`, each bounded to `agent.bounds.max_iterations`
/// model calls. `cancel`, if given, is polled cooperatively at phase
/// boundaries — it requests cancellation, it doesn't forcibly interrupt an
/// in-flight model call.
///
/// On failure the returned [`ExecutionFailure`] still carries usage,
/// elapsed time, and callback errors accumulated up to that point, so a
/// caller can log, retry, or bill a partially-completed run.
pub async fn execute<R, A>(
    agent: &AgentDefinition<R, A>,
    transport: &dyn ModelTransport,
    input: impl Into<String>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<ExecutionOutcome<R>, ExecutionFailure>
where
    R: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    let started = Instant::now();
    let input = input.into();
    let mut run_state = agent.initial_run_state();
    let mut emitter = Emitter::new(agent);
    let mut usage = UsageTotals::default();
    let mut total_iterations: u32 = 0;

    let mut history: Vec<Message> = Vec::new();
    if !agent.system_prompt.is_empty() {
        history.push(Message::system(agent.system_prompt.clone()));
    }

    if let Err(e) = check_cancelled(cancel.as_ref(), 1, CancellationPhase::PromptGeneration) {
        return Err(failure_with_metadata(e, 0, 0, usage, started, emitter.callback_errors.clone()));
    }

    let initial_prompt = match (agent.assemble_prompt)(PromptContext {
        run_state: run_state.clone(),
        attempt_state: agent.initial_attempt_state(),
        input: input.clone(),
        previous_error: None,
    })
    .await
    {
        Ok(text) => text,
        Err(e) => {
            let error = ExecutionError::ApiError {
                attempt: 1,
                message: e.to_string(),
            };
            return Err(failure_with_metadata(error, 0, 0, usage, started, emitter.callback_errors.clone()));
        }
    };

    let prompt_event = UserPromptSubmitEvent::new(initial_prompt.clone(), history.clone());
    let mut final_prompt = initial_prompt;
    match agent.hooks.execute_user_prompt_submit(prompt_event).await {
        Some(decision) if !decision.continue_execution => {
            emitter.record_callback_error(
                "user_prompt_submit hook",
                decision.reason.unwrap_or_else(|| "blocked".to_string()),
            );
        }
        Some(decision) => {
            if let Some(modified) = decision.modified_prompt {
                final_prompt = modified;
            }
        }
        None => {}
    }
    history.push(Message::user(final_prompt));

    for attempt in 1..=agent.bounds.max_attempts {
        emitter.emit(ExecutionEvent::AttemptStarted { attempt }).await;

        let (iterations_run, outcome) = run_attempt(
            agent,
            transport,
            attempt,
            &mut run_state,
            &mut history,
            cancel.as_ref(),
            &mut emitter,
            &mut usage,
        )
        .await;

        total_iterations += iterations_run;

        match outcome {
            AttemptOutcome::Validated(output) => {
                emitter
                    .emit(ExecutionEvent::AttemptSucceeded { attempt })
                    .await;

                return Ok(ExecutionOutcome {
                    output,
                    run_state,
                    metadata: ExecutionMetadata {
                        attempts_used: attempt,
                        total_iterations,
                        usage,
                        elapsed: started.elapsed(),
                        callback_errors: emitter.callback_errors,
                    },
                });
            }
            AttemptOutcome::LayerFailed(failure) => {
                emitter
                    .emit(ExecutionEvent::AttemptFailed {
                        attempt,
                        reason: failure.to_string(),
                    })
                    .await;

                if attempt == agent.bounds.max_attempts {
                    let error = ExecutionError::MaxAttemptsExceeded {
                        attempts: attempt,
                        max_attempts: agent.bounds.max_attempts,
                        last_error: Some(failure),
                    };
                    return Err(failure_with_metadata(
                        error,
                        attempt,
                        total_iterations,
                        usage,
                        started,
                        emitter.callback_errors.clone(),
                    ));
                }

                if let Err(e) = check_cancelled(cancel.as_ref(), attempt, CancellationPhase::Iteration) {
                    return Err(failure_with_metadata(
                        e,
                        attempt,
                        total_iterations,
                        usage,
                        started,
                        emitter.callback_errors.clone(),
                    ));
                }

                let feedback = match (agent.assemble_prompt)(PromptContext {
                    run_state: run_state.clone(),
                    attempt_state: agent.initial_attempt_state(),
                    input: input.clone(),
                    previous_error: Some(failure.to_string()),
                })
                .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        let error = ExecutionError::ApiError {
                            attempt: attempt + 1,
                            message: e.to_string(),
                        };
                        return Err(failure_with_metadata(
                            error,
                            attempt,
                            total_iterations,
                            usage,
                            started,
                            emitter.callback_errors.clone(),
                        ));
                    }
                };
                history.push(Message::user(feedback));
            }
            AttemptOutcome::HardStop(error) => {
                emitter
                    .emit(ExecutionEvent::AttemptFailed {
                        attempt,
                        reason: error.to_string(),
                    })
                    .await;
                return Err(failure_with_metadata(
                    error,
                    attempt,
                    total_iterations,
                    usage,
                    started,
                    emitter.callback_errors,
                ));
            }
        }
    }

    unreachable!("loop either returns or errors before exhausting max_attempts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentDefinition, ExecutionBounds, ModelConfig};
    use crate::tools::{ToolOutcome, tool};
    use crate::transport::ModelResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    struct RunState {
        helper_calls: u32,
    }
    #[derive(Debug, Clone, Default)]
    struct AttemptState;

    fn output_tool() -> crate::tools::Tool<RunState, AttemptState> {
        tool("record_answer", "Record the final answer")
            .param("answer", "string")
            .build(|state, input| async move { Ok(ToolOutcome::new(state, input)) })
    }

    fn build_agent(bounds: ExecutionBounds) -> AgentDefinition<RunState, AttemptState> {
        AgentDefinition::builder("test-agent")
            .model(ModelConfig::new("test-model"))
            .bounds(bounds)
            .output_tool(output_tool())
            .assemble_prompt(|ctx| async move { Ok(ctx.input) })
            .build()
            .unwrap()
    }

    struct ScriptedTransport {
        responses: Mutex<Vec<Message>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Message>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ModelTransport for ScriptedTransport {
        async fn complete(&self, _request: ModelRequest) -> crate::Result<ModelResponse> {
            let mut guard = self.responses.lock().unwrap();
            if guard.is_empty() {
                return Err(crate::Error::api("scripted transport exhausted"));
            }
            let message = guard.remove(0);
            Ok(ModelResponse { message, usage: None })
        }
    }

    fn assistant_tool_call(id: &str, name: &str, input: Value) -> Message {
        Message::assistant(vec![ContentBlock::tool_use(id, name, input)])
    }

    fn assistant_two_calls(a: (&str, &str, Value), b: (&str, &str, Value)) -> Message {
        Message::assistant(vec![
            ContentBlock::tool_use(a.0, a.1, a.2),
            ContentBlock::tool_use(b.0, b.1, b.2),
        ])
    }

    #[tokio::test]
    async fn test_immediate_success_no_reflection() {
        let agent = build_agent(ExecutionBounds {
            max_iterations: 5,
            max_attempts: 3,
        });

        let transport = ScriptedTransport::new(vec![assistant_tool_call(
            "call_1",
            "record_answer",
            json!({"answer": "42"}),
        )]);

        let outcome = execute(&agent, &transport, "what is the answer?", None)
            .await
            .unwrap();

        assert_eq!(outcome.output, json!({"answer": "42"}));
        assert_eq!(outcome.metadata.attempts_used, 1);
    }

    #[tokio::test]
    async fn test_output_tool_not_used_when_no_tool_calls() {
        let agent = build_agent(ExecutionBounds {
            max_iterations: 5,
            max_attempts: 1,
        });

        let transport = ScriptedTransport::new(vec![Message::assistant(vec![ContentBlock::text(
            "thinking out loud with no tool call",
        )])]);

        let result = execute(&agent, &transport, "go", None).await;
        let failure = result.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::OutputToolNotUsed { .. }));
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort_the_loop() {
        let agent = build_agent(ExecutionBounds {
            max_iterations: 5,
            max_attempts: 1,
        });

        let transport = ScriptedTransport::new(vec![
            assistant_tool_call("call_1", "does_not_exist", json!({})),
            assistant_tool_call("call_2", "record_answer", json!({"answer": "ok"})),
        ]);

        let outcome = execute(&agent, &transport, "go", None).await.unwrap();
        assert_eq!(outcome.output, json!({"answer": "ok"}));
    }

    #[tokio::test]
    async fn test_max_iterations_exceeded() {
        let helper = tool::<RunState, AttemptState>("noop", "Does nothing")
            .build(|state, _input| async move { Ok(ToolOutcome::new(state, json!("ok"))) });

        let agent = AgentDefinition::builder("test-agent")
            .model(ModelConfig::new("test-model"))
            .bounds(ExecutionBounds {
                max_iterations: 2,
                max_attempts: 1,
            })
            .tool(helper)
            .output_tool(output_tool())
            .assemble_prompt(|ctx| async move { Ok(ctx.input) })
            .build()
            .unwrap();

        let transport = ScriptedTransport::new(vec![
            assistant_tool_call("call_1", "noop", json!({})),
            assistant_tool_call("call_2", "noop", json!({})),
            assistant_tool_call("call_3", "noop", json!({})),
        ]);

        let result = execute(&agent, &transport, "go", None).await;
        let failure = result.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::MaxIterationsExceeded { .. }));
        assert_eq!(failure.metadata.total_iterations, 2);
    }

    #[tokio::test]
    async fn test_cancellation_observed_before_api_call() {
        let agent = build_agent(ExecutionBounds {
            max_iterations: 5,
            max_attempts: 1,
        });

        let cancel = Arc::new(AtomicBool::new(true));
        let transport = ScriptedTransport::new(vec![]);

        let result = execute(&agent, &transport, "go", Some(cancel)).await;
        let failure = result.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::ExecutionCancelled { .. }));
        assert_eq!(failure.metadata.attempts_used, 0);
    }

    #[tokio::test]
    async fn test_validation_retry_then_success() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"answer": {"type": "string", "minLength": 1}},
            "required": ["answer"],
        });

        let output_tool = tool("record_answer", "Record the final answer").schema(schema).build(
            |state, input| async move { Ok(ToolOutcome::new(state, input)) },
        );

        let agent: AgentDefinition<RunState, AttemptState> = AgentDefinition::builder("test")
            .model(ModelConfig::new("test-model"))
            .bounds(ExecutionBounds {
                max_iterations: 5,
                max_attempts: 2,
            })
            .output_tool(output_tool)
            .assemble_prompt(|ctx| async move {
                Ok(format!("{}|{:?}", ctx.input, ctx.previous_error))
            })
            .build()
            .unwrap();

        let transport = ScriptedTransport::new(vec![
            assistant_tool_call("call_1", "record_answer", json!({"answer": ""})),
            assistant_tool_call("call_2", "record_answer", json!({"answer": "ok"})),
        ]);

        let outcome = execute(&agent, &transport, "go", None).await.unwrap();
        assert_eq!(outcome.metadata.attempts_used, 2);
        assert_eq!(outcome.output, json!({"answer": "ok"}));
    }

    #[tokio::test]
    async fn test_reflection_then_submit() {
        let output_tool = tool::<RunState, AttemptState>("draft", "Draft the answer")
            .param("result", "string")
            .build(|state, input| async move { Ok(ToolOutcome::new(state, input)) });

        let agent: AgentDefinition<RunState, AttemptState> = AgentDefinition::builder("test")
            .model(ModelConfig::new("test-model"))
            .bounds(ExecutionBounds {
                max_iterations: 5,
                max_attempts: 1,
            })
            .output_tool(output_tool)
            .reflection(|state, input| async move {
                let preview = format!("Preview: {}", input.get("result").and_then(|r| r.as_str()).unwrap_or(""));
                Ok(ToolOutcome::new(state, json!(preview)))
            })
            .assemble_prompt(|ctx| async move { Ok(ctx.input) })
            .build()
            .unwrap();

        let transport = ScriptedTransport::new(vec![
            assistant_tool_call("call_1", "draft", json!({"result": "draft1"})),
            assistant_tool_call("call_2", "draft", json!({"result": "draft2"})),
            assistant_two_calls(
                ("call_3", "draft", json!({"result": "final"})),
                ("call_4", "submit", json!({})),
            ),
        ]);

        let outcome = execute(&agent, &transport, "go", None).await.unwrap();
        assert_eq!(outcome.output, json!({"result": "final"}));
    }

    #[tokio::test]
    async fn test_submit_before_output_is_hard_stop() {
        let output_tool = tool::<RunState, AttemptState>("draft", "Draft the answer")
            .build(|state, input| async move { Ok(ToolOutcome::new(state, input)) });

        let agent: AgentDefinition<RunState, AttemptState> = AgentDefinition::builder("test")
            .model(ModelConfig::new("test-model"))
            .bounds(ExecutionBounds {
                max_iterations: 5,
                max_attempts: 1,
            })
            .output_tool(output_tool)
            .reflection(|state, input| async move { Ok(ToolOutcome::new(state, input)) })
            .assemble_prompt(|ctx| async move { Ok(ctx.input) })
            .build()
            .unwrap();

        let transport =
            ScriptedTransport::new(vec![assistant_tool_call("call_1", "submit", json!({}))]);

        let result = execute(&agent, &transport, "go", None).await;
        assert!(matches!(
            result.unwrap_err().error,
            ExecutionError::SubmitBeforeOutput { .. }
        ));
    }
}
