//! The demo tool registry: a single `click` tool that advances the mock
//! driver's scripted snapshot cursor.

use crate::mock::MockDriver;
use sentience_tools::{ToolContext, ToolHandler, ToolRegistry, ToolSpec};
use serde_json::{json, Value};
use std::sync::Arc;

struct ClickHandler {
    driver: Arc<MockDriver>,
}

#[async_trait::async_trait]
impl ToolHandler for ClickHandler {
    async fn call(&self, _ctx: &ToolContext, input: Value) -> Result<Value, String> {
        let selector = input
            .get("selector")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing `selector`".to_string())?;
        self.driver.advance();
        Ok(json!({ "clicked": true, "selector": selector }))
    }
}

pub fn build_registry(driver: Arc<MockDriver>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(ToolSpec {
            name: "click".to_string(),
            description: Some("Clicks an element identified by a CSS selector.".to_string()),
            input_schema: json!({
                "type": "object",
                "required": ["selector"],
                "properties": { "selector": { "type": "string" } },
            }),
            output_schema: json!({
                "type": "object",
                "required": ["clicked"],
                "properties": { "clicked": { "type": "boolean" } },
            }),
            handler: Some(Arc::new(ClickHandler { driver })),
            parameters: None,
        })
        .expect("click tool registers exactly once");
    registry
}
