//! Tool Registry: typed dispatch of named tools, validated against
//! declared JSON schemas and traced through the core `Tracer` contract.

mod error;
mod registry;

pub use error::ToolError;
pub use registry::{ToolContext, ToolDescription, ToolHandler, ToolRegistry, ToolSpec};
