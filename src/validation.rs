//! Validation pipeline for candidate output.
//!
//! A pipeline is an ordered list of layers. The first layer is always the
//! implicit schema layer, checking the candidate output against the
//! output tool's declared JSON Schema; any layers the agent definition
//! supplies come after it. The pipeline runs layers in order and stops at
//! the first failure — a failing layer's error becomes the attempt's
//! failure reason and no later layer runs.
//!
//! Schema compilation failures are treated as a pass, not a hard error,
//! matching how schema validation is used elsewhere against
//! model-declared (not hand-audited) schemas: a malformed schema
//! shouldn't block every attempt forever.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Outcome of running a single validation layer.
#[derive(Debug, Clone)]
pub enum LayerResult {
    Pass,
    Fail(String),
}

impl LayerResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, LayerResult::Pass)
    }
}

/// A validator function: inspects the candidate output and returns a
/// pass/fail verdict. Validators must be idempotent — calling one twice
/// on the same candidate must produce the same verdict, since a pipeline
/// may be re-run across attempts against different candidates but the
/// engine never re-runs a layer against output it has already judged.
pub type ValidatorFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = LayerResult> + Send>> + Send + Sync>;

/// A single named layer in the pipeline.
#[derive(Clone)]
pub struct ValidationLayer {
    pub name: String,
    pub description: String,
    validator: ValidatorFn,
}

impl ValidationLayer {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, validator: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LayerResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            validator: Arc::new(move |value| Box::pin(validator(value))),
        }
    }

    /// Build the implicit schema layer for an output tool's parameter schema.
    pub fn schema(schema: Value) -> Self {
        Self::new("Schema", "Validates output shape", move |candidate| {
            let schema = schema.clone();
            async move {
                let Ok(validator) = jsonschema::validator_for(&schema) else {
                    // Uncompilable schema: graceful skip, not a hard failure.
                    return LayerResult::Pass;
                };

                let errors: Vec<String> = validator
                    .iter_errors(&candidate)
                    .map(|e| e.to_string())
                    .collect();

                if errors.is_empty() {
                    LayerResult::Pass
                } else {
                    LayerResult::Fail(errors.join("; "))
                }
            }
        })
    }

    pub async fn run(&self, candidate: Value) -> LayerResult {
        (self.validator)(candidate).await
    }
}

impl std::fmt::Debug for ValidationLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationLayer")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Fired as each layer starts and finishes, for observability ([C8]).
#[derive(Debug, Clone)]
pub enum LayerEvent {
    Start { layer_name: String },
    Complete { layer_name: String, passed: bool },
}

/// An ordered sequence of layers, run against one candidate at a time.
#[derive(Clone, Default)]
pub struct ValidationPipeline {
    layers: Vec<ValidationLayer>,
}

impl ValidationPipeline {
    pub fn new(output_schema: Value, extra_layers: Vec<ValidationLayer>) -> Self {
        let mut layers = vec![ValidationLayer::schema(output_schema)];
        layers.extend(extra_layers);
        Self { layers }
    }

    /// Run every layer in order against `candidate`, short-circuiting at
    /// the first failure. `on_event` is invoked for every layer start and
    /// completion, in order; it never influences the outcome.
    pub async fn run(
        &self,
        candidate: &Value,
        mut on_event: impl FnMut(LayerEvent),
    ) -> Result<(), (String, String)> {
        for layer in &self.layers {
            on_event(LayerEvent::Start {
                layer_name: layer.name.clone(),
            });

            let result = layer.run(candidate.clone()).await;
            let passed = result.is_pass();

            on_event(LayerEvent::Complete {
                layer_name: layer.name.clone(),
                passed,
            });

            if let LayerResult::Fail(reason) = result {
                return Err((layer.name.clone(), reason));
            }
        }

        Ok(())
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}
