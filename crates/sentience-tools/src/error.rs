#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("tool '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("tool '{0}' is not registered")]
    ToolNotFound(String),

    #[error("tool '{0}' has no handler")]
    NoHandler(String),

    #[error("tool '{0}' has an invalid schema: {1}")]
    InvalidSchema(String, String),

    #[error("invalid input for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    #[error("invalid output for tool '{tool}': {message}")]
    InvalidOutput { tool: String, message: String },

    #[error("tool '{tool}' handler failed: {message}")]
    HandlerFailed { tool: String, message: String },
}
