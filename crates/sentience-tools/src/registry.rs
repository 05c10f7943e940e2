//! Typed dispatch of named tools with input/output schema validation and
//! trace emission (spec.md §4.A).

use crate::error::ToolError;
use sentience_core::{EventKind, Tracer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A handler bound to a registered tool. Implementations do the actual
/// work (driver calls, snapshot assertions, etc); the registry only owns
/// dispatch, validation, and timing.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: &ToolContext, input: Value) -> Result<Value, String>;
}

/// Runtime context threaded through a tool call: the active tracer (if
/// any) and the step id to tag emitted events with.
#[derive(Clone)]
pub struct ToolContext {
    pub tracer: Option<Arc<dyn Tracer>>,
    pub step_id: Option<String>,
}

impl ToolContext {
    pub fn new(tracer: Option<Arc<dyn Tracer>>, step_id: Option<String>) -> Self {
        Self { tracer, step_id }
    }
}

/// Declaration of a tool: its schemas, optional handler, and the
/// model-facing parameters blob (falls back to `input_schema` when absent).
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub output_schema: Value,
    pub handler: Option<Arc<dyn ToolHandler>>,
    pub parameters: Option<Value>,
}

/// What `describe_for_model` hands back to a planner.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

struct CompiledTool {
    spec: ToolSpec,
    input_validator: jsonschema::Validator,
    output_validator: jsonschema::Validator,
}

/// Stateless beyond its map of registered tools: dispatch timing is read
/// once at entry and once before emission, with no other shared state.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, CompiledTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), ToolError> {
        if self.tools.contains_key(&spec.name) {
            return Err(ToolError::AlreadyRegistered(spec.name));
        }
        let input_validator = jsonschema::validator_for(&spec.input_schema)
            .map_err(|e| ToolError::InvalidSchema(spec.name.clone(), e.to_string()))?;
        let output_validator = jsonschema::validator_for(&spec.output_schema)
            .map_err(|e| ToolError::InvalidSchema(spec.name.clone(), e.to_string()))?;
        let name = spec.name.clone();
        self.tools.insert(
            name,
            CompiledTool {
                spec,
                input_validator,
                output_validator,
            },
        );
        Ok(())
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    /// Lists every tool as `{name, description, parameters}`, where
    /// `parameters` is the declared JSON-schema `parameters` blob or, if
    /// absent, the input schema itself.
    pub fn describe_for_model(&self) -> Vec<ToolDescription> {
        let mut out: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|t| ToolDescription {
                name: t.spec.name.clone(),
                description: t.spec.description.clone(),
                parameters: t
                    .spec
                    .parameters
                    .clone()
                    .unwrap_or_else(|| t.spec.input_schema.clone()),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    #[tracing::instrument(skip(self, ctx, payload), fields(tool = %name))]
    pub async fn execute(
        &self,
        name: &str,
        payload: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let entry = self.tools.get(name).ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;
        let handler = entry
            .spec
            .handler
            .clone()
            .ok_or_else(|| ToolError::NoHandler(name.to_string()))?;

        if let Err(e) = entry.input_validator.validate(&payload) {
            return Err(ToolError::InvalidInput {
                tool: name.to_string(),
                message: e.to_string(),
            });
        }

        let started = Instant::now();
        let call_result = handler.call(ctx, payload.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match call_result {
            Ok(output) => {
                if let Err(e) = entry.output_validator.validate(&output) {
                    let err = ToolError::InvalidOutput {
                        tool: name.to_string(),
                        message: e.to_string(),
                    };
                    self.emit_tool_call(ctx, name, &payload, None, Some(&err.to_string()), duration_ms);
                    return Err(err);
                }
                self.emit_tool_call(ctx, name, &payload, Some(&output), None, duration_ms);
                Ok(output)
            }
            Err(message) => {
                let err = ToolError::HandlerFailed {
                    tool: name.to_string(),
                    message: message.clone(),
                };
                self.emit_tool_call(ctx, name, &payload, None, Some(&message), duration_ms);
                Err(err)
            }
        }
    }

    fn emit_tool_call(
        &self,
        ctx: &ToolContext,
        tool_name: &str,
        inputs: &Value,
        outputs: Option<&Value>,
        error: Option<&str>,
        duration_ms: u64,
    ) {
        let Some(tracer) = ctx.tracer.as_ref() else {
            return;
        };
        let mut data = Map::new();
        data.insert("tool_name".into(), Value::String(tool_name.to_string()));
        data.insert("inputs".into(), inputs.clone());
        if let Some(outputs) = outputs {
            data.insert("outputs".into(), outputs.clone());
        }
        if let Some(error) = error {
            data.insert("error".into(), Value::String(error.to_string()));
        }
        data.insert("success".into(), Value::Bool(error.is_none()));
        data.insert("duration_ms".into(), Value::from(duration_ms));
        tracer.emit(EventKind::ToolCall, Value::Object(data), ctx.step_id.as_deref());
    }
}
