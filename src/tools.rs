//! Tool-reducer protocol.
//!
//! A tool here is not a stateless function call — it is a reducer. Given
//! the run-scoped state `R` and the attempt-scoped state `A` at the time
//! of the call, plus the model-supplied arguments, a tool handler produces
//! either a new `(R, A)` pair and a result to hand back to the model, or
//! an error string. Handlers never panic across the boundary: anything
//! that would throw is mapped to `Err(String)` before it escapes.
//!
//! Tool definitions are the same ones used to build the model-facing
//! function-calling schema ([`Tool::to_openai_format`]), so a tool's
//! declared parameters and its handler's expectations can never drift
//! apart.

use serde_json::{Map, Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The run-scoped and attempt-scoped state threaded through tool calls.
///
/// `run` persists across attempts (set once by
/// [`crate::agent::AgentDefinition::initial_run_state`]); `attempt` is
/// reset at the start of every attempt (via `initial_attempt_state`).
#[derive(Debug, Clone)]
pub struct ToolState<R, A> {
    pub run: R,
    pub attempt: A,
}

impl<R, A> ToolState<R, A> {
    pub fn new(run: R, attempt: A) -> Self {
        Self { run, attempt }
    }
}

/// What a reducer call produces on success: the next state, and the
/// value handed back to the model as the tool's result.
#[derive(Debug, Clone)]
pub struct ToolOutcome<R, A> {
    pub state: ToolState<R, A>,
    pub result: Value,
}

impl<R, A> ToolOutcome<R, A> {
    pub fn new(state: ToolState<R, A>, result: Value) -> Self {
        Self { state, result }
    }
}

/// Type alias for a tool's reducer handler.
///
/// Boxed and pinned for the same reasons the model-transport and hook
/// handlers are: different async closures have different concrete
/// future types, and storing a heterogeneous collection of tools
/// requires erasing that difference behind a trait object.
pub type ToolHandler<R, A> = Arc<
    dyn Fn(ToolState<R, A>, Value) -> Pin<Box<dyn Future<Output = Result<ToolOutcome<R, A>, String>> + Send>>
        + Send
        + Sync,
>;

/// A single tool: its model-facing declaration plus its reducer.
#[derive(Clone)]
pub struct Tool<R, A> {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters, already normalized to the
    /// `{"type": "object", "properties": {...}, "required": [...]}` shape
    /// function-calling APIs expect.
    pub parameters: Value,
    handler: ToolHandler<R, A>,
}

impl<R, A> Tool<R, A>
where
    R: Send + 'static,
    A: Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: ToolHandler<R, A>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }

    /// Invoke the reducer with the given state and model-supplied input.
    pub async fn execute(
        &self,
        state: ToolState<R, A>,
        input: Value,
    ) -> Result<ToolOutcome<R, A>, String> {
        (self.handler)(state, input).await
    }

    /// Render this tool in the OpenAI-compatible function-calling format.
    pub fn to_openai_format(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

impl<R, A> std::fmt::Debug for Tool<R, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Builder for [`Tool`], accepting either simple type notation
/// (`"string"`) or a full per-parameter schema object for each param.
pub struct ToolBuilder<R, A> {
    name: String,
    description: String,
    params: Map<String, Value>,
    _marker: std::marker::PhantomData<fn() -> (R, A)>,
}

impl<R, A> ToolBuilder<R, A>
where
    R: Send + 'static,
    A: Send + 'static,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Map::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Declare a parameter. `type_spec` may be a bare type name
    /// (`"string"`, `"number"`) or a full schema fragment
    /// (`{"type": "string", "description": "..."}`).
    pub fn param(mut self, name: impl Into<String>, type_spec: impl Into<Value>) -> Self {
        self.params.insert(name.into(), type_spec.into());
        self
    }

    /// Use an already-complete JSON Schema object as the parameters
    /// schema, bypassing the simple-notation conversion entirely.
    pub fn schema(mut self, schema: Value) -> Self {
        if let Some(obj) = schema.as_object() {
            self.params = obj.clone();
            self.params
                .insert("__raw_schema__".to_string(), Value::Bool(true));
        }
        self
    }

    /// Finalize the tool with its reducer handler.
    pub fn build<F, Fut>(self, handler: F) -> Tool<R, A>
    where
        F: Fn(ToolState<R, A>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome<R, A>, String>> + Send + 'static,
    {
        let raw = self.params.contains_key("__raw_schema__");
        let mut params = self.params;
        params.remove("__raw_schema__");

        let parameters = if raw {
            Value::Object(params)
        } else {
            convert_schema_to_openai(&Value::Object(params))
        };

        Tool::new(
            self.name,
            self.description,
            parameters,
            Arc::new(move |state, input| Box::pin(handler(state, input))),
        )
    }
}

/// Start building a tool with the given name and description.
pub fn tool<R, A>(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder<R, A>
where
    R: Send + 'static,
    A: Send + 'static,
{
    ToolBuilder::new(name, description)
}

/// Normalize a simple parameter map into a JSON Schema object.
///
/// If `schema` already has `type` and `properties`, it is assumed to be
/// complete JSON Schema and returned unchanged.
pub fn convert_schema_to_openai(schema: &Value) -> Value {
    if let Some(obj) = schema.as_object() {
        if obj.contains_key("type") && obj.contains_key("properties") {
            return schema.clone();
        }

        let mut properties = Map::new();
        let mut required = Vec::new();

        for (key, value) in obj {
            properties.insert(key.clone(), type_to_json_schema(value));
            required.push(Value::String(key.clone()));
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    } else {
        json!({"type": "object", "properties": {}})
    }
}

/// Normalize one parameter's type spec: a bare string (`"number"`)
/// becomes `{"type": "number"}`; an object already shaped like a schema
/// fragment passes through unchanged.
fn type_to_json_schema(type_spec: &Value) -> Value {
    match type_spec {
        Value::String(s) => json!({"type": s}),
        Value::Object(obj) => {
            if obj.contains_key("type") {
                type_spec.clone()
            } else {
                json!({"type": "object"})
            }
        }
        other => other.clone(),
    }
}
