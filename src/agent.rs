//! Agent definition: the frozen, validated configuration an execution
//! binds prompts, model parameters, tools, validation, and observability
//! to. An [`AgentDefinition`] is built once via [`AgentDefinitionBuilder`]
//! and then reused across many calls to [`crate::engine::execute`] — it
//! holds no per-call state itself, only the two factories that produce
//! fresh state for each call and each attempt within it.

use crate::hooks::Hooks;
use crate::tools::{Tool, ToolHandler};
use crate::validation::ValidationLayer;
use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A reflection handler runs in place of the output tool's ordinary
/// reducer when the agent is built with one: given the candidate output
/// just produced, it returns formatted feedback for the model (fed back
/// as that tool call's result) instead of ending the attempt. Its
/// presence is what gates whether the reserved `submit` tool is injected
/// into the model's tool list — see [`crate::engine`].
pub type ReflectionHandler<R, A> = ToolHandler<R, A>;

/// Generation parameters sent with every model call.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The attempt and iteration budgets for one call to `execute`.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionBounds {
    /// Model calls allowed within a single attempt before it fails with
    /// `OutputToolNotUsed` or `MaxIterationsExceeded`.
    pub max_iterations: u32,
    /// Fresh attempts allowed before execution fails with
    /// `MaxAttemptsExceeded`.
    pub max_attempts: u32,
}

impl Default for ExecutionBounds {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_attempts: 3,
        }
    }
}

/// Everything the prompt-assembly function needs to produce the next
/// user-turn text: the live state, the caller's original input, and —
/// on a retried attempt — the validation failure that ended the
/// previous one.
#[derive(Debug, Clone)]
pub struct PromptContext<R, A> {
    pub run_state: R,
    pub attempt_state: A,
    pub input: String,
    pub previous_error: Option<String>,
}

/// Assembles the prompt for an attempt. May suspend on I/O (e.g. loading
/// a template from disk or a prompt-management service) — this is why
/// it's async rather than a plain closure.
pub type PromptFn<R, A> = Arc<
    dyn Fn(PromptContext<R, A>) -> Pin<Box<dyn Future<Output = Result<String>> + Send>>
        + Send
        + Sync,
>;

/// Produces the initial value of a state slot. Called once per call to
/// `execute` for run state, and once per attempt for attempt state.
pub type StateFactory<S> = Arc<dyn Fn() -> S + Send + Sync>;

/// Lifecycle events the engine reports for observability. Handlers are
/// fire-and-forget: a handler that errors or panics never aborts
/// execution (see [`crate::engine`]'s callback-safety wrapper), it's
/// only recorded.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    AttemptStarted { attempt: u32 },
    IterationStarted { attempt: u32, iteration: u32 },
    ToolCallStarted { attempt: u32, iteration: u32, tool_name: String },
    ToolCallCompleted {
        attempt: u32,
        iteration: u32,
        tool_name: String,
        success: bool,
    },
    ValidationLayerStarted { attempt: u32, layer_name: String },
    ValidationLayerCompleted {
        attempt: u32,
        layer_name: String,
        passed: bool,
    },
    AttemptFailed { attempt: u32, reason: String },
    AttemptSucceeded { attempt: u32 },
}

pub type ObservabilityHandler =
    Arc<dyn Fn(ExecutionEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A frozen, validated configuration binding everything one kind of
/// agent needs: prompts, model parameters, its helper and output tools,
/// validation, hooks, observability, and the two state factories.
pub struct AgentDefinition<R, A> {
    pub name: String,
    pub system_prompt: String,
    pub assemble_prompt: PromptFn<R, A>,
    pub model: ModelConfig,
    pub bounds: ExecutionBounds,
    /// Helper tools the model may call any number of times per attempt.
    pub tools: Vec<Tool<R, A>>,
    /// The terminal tool. Calling it ends the current iteration loop with
    /// a candidate output, which the validation pipeline then judges —
    /// unless `reflection` is set, in which case calling it records a
    /// candidate and keeps iterating until `submit` is called.
    pub output_tool: Tool<R, A>,
    /// When present, the output tool's calls run this handler instead of
    /// its ordinary reducer, and the reserved `submit` tool is injected
    /// into the model's tool list (see `spec.md` §9, "reflection as a
    /// type-level gate" — no separate toggle, the two states are tied to
    /// this field's presence alone).
    pub reflection: Option<ReflectionHandler<R, A>>,
    /// Layers run after the implicit schema layer, in order.
    pub extra_validation_layers: Vec<ValidationLayer>,
    pub hooks: Hooks,
    pub on_event: Option<ObservabilityHandler>,
    initial_run_state: StateFactory<R>,
    initial_attempt_state: StateFactory<A>,
}

impl<R, A> AgentDefinition<R, A> {
    pub fn initial_run_state(&self) -> R {
        (self.initial_run_state)()
    }

    pub fn initial_attempt_state(&self) -> A {
        (self.initial_attempt_state)()
    }
}

impl<R, A> AgentDefinition<R, A>
where
    R: Default + Send + 'static,
    A: Default + Send + 'static,
{
    pub fn builder(name: impl Into<String>) -> AgentDefinitionBuilder<R, A> {
        AgentDefinitionBuilder::new(name)
    }
}

impl<R, A> std::fmt::Debug for AgentDefinition<R, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("bounds", &self.bounds)
            .field("tool_count", &self.tools.len())
            .field("output_tool", &self.output_tool.name)
            .finish()
    }
}

/// Builder for [`AgentDefinition`]. `output_tool`, `model`, and
/// `assemble_prompt` are required; everything else has a sensible
/// default. [`Self::build`] validates the result (non-empty name,
/// non-zero bounds, output tool not duplicated among helper tools).
pub struct AgentDefinitionBuilder<R, A> {
    name: String,
    system_prompt: String,
    assemble_prompt: Option<PromptFn<R, A>>,
    model: Option<ModelConfig>,
    bounds: ExecutionBounds,
    tools: Vec<Tool<R, A>>,
    output_tool: Option<Tool<R, A>>,
    reflection: Option<ReflectionHandler<R, A>>,
    extra_validation_layers: Vec<ValidationLayer>,
    hooks: Hooks,
    on_event: Option<ObservabilityHandler>,
    initial_run_state: Option<StateFactory<R>>,
    initial_attempt_state: Option<StateFactory<A>>,
}

impl<R, A> AgentDefinitionBuilder<R, A>
where
    R: Default + Send + 'static,
    A: Default + Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: String::new(),
            assemble_prompt: None,
            model: None,
            bounds: ExecutionBounds::default(),
            tools: Vec::new(),
            output_tool: None,
            reflection: None,
            extra_validation_layers: Vec::new(),
            hooks: Hooks::new(),
            on_event: None,
            initial_run_state: Some(Arc::new(R::default)),
            initial_attempt_state: Some(Arc::new(A::default)),
        }
    }
}

impl<R, A> AgentDefinitionBuilder<R, A> {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn assemble_prompt<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PromptContext<R, A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.assemble_prompt = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn model(mut self, model: ModelConfig) -> Self {
        self.model = Some(model);
        self
    }

    pub fn bounds(mut self, bounds: ExecutionBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn tool(mut self, tool: Tool<R, A>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn output_tool(mut self, tool: Tool<R, A>) -> Self {
        self.output_tool = Some(tool);
        self
    }

    /// Enable reflection mode: the output tool's calls run `handler`
    /// instead of ending the attempt, and the reserved `submit` tool is
    /// added to the model's tool list.
    pub fn reflection<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(crate::tools::ToolState<R, A>, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<crate::tools::ToolOutcome<R, A>, String>>
            + Send
            + 'static,
    {
        self.reflection = Some(Arc::new(move |state, input| Box::pin(handler(state, input))));
        self
    }

    pub fn validation_layer(mut self, layer: ValidationLayer) -> Self {
        self.extra_validation_layers.push(layer);
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_event = Some(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    pub fn initial_run_state<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        self.initial_run_state = Some(Arc::new(factory));
        self
    }

    pub fn initial_attempt_state<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.initial_attempt_state = Some(Arc::new(factory));
        self
    }

    pub fn build(self) -> Result<AgentDefinition<R, A>> {
        if self.name.trim().is_empty() {
            return Err(Error::config("agent name must not be empty"));
        }

        let model = self
            .model
            .ok_or_else(|| Error::config("agent definition requires a model config"))?;

        let output_tool = self
            .output_tool
            .ok_or_else(|| Error::config("agent definition requires an output tool"))?;

        let assemble_prompt = self
            .assemble_prompt
            .ok_or_else(|| Error::config("agent definition requires a prompt-assembly function"))?;

        if self.tools.iter().any(|t| t.name == output_tool.name) {
            return Err(Error::config(format!(
                "output tool name '{}' collides with a helper tool",
                output_tool.name
            )));
        }

        if output_tool.name == crate::engine::SUBMIT_TOOL_NAME
            || self.tools.iter().any(|t| t.name == crate::engine::SUBMIT_TOOL_NAME)
        {
            return Err(Error::config("tool name 'submit' is reserved"));
        }

        if self.bounds.max_iterations == 0 {
            return Err(Error::config("max_iterations must be at least 1"));
        }
        if self.bounds.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }

        let initial_run_state = self
            .initial_run_state
            .ok_or_else(|| Error::config("agent definition requires initial_run_state"))?;
        let initial_attempt_state = self
            .initial_attempt_state
            .ok_or_else(|| Error::config("agent definition requires initial_attempt_state"))?;

        Ok(AgentDefinition {
            name: self.name,
            system_prompt: self.system_prompt,
            assemble_prompt,
            model,
            bounds: self.bounds,
            tools: self.tools,
            output_tool,
            reflection: self.reflection,
            extra_validation_layers: self.extra_validation_layers,
            hooks: self.hooks,
            on_event: self.on_event,
            initial_run_state,
            initial_attempt_state,
        })
    }
}
