//! The tracer contract (§6). The verification core only ever calls
//! `emit`/`run_id` — transport, storage, and indexing are the tracer
//! implementation's problem.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Verification,
    ToolCall,
    StepEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::ToolCall => "tool_call",
            Self::StepEnd => "step_end",
        }
    }
}

pub trait Tracer: Send + Sync {
    fn emit(&self, kind: EventKind, data: serde_json::Value, step_id: Option<&str>);
    fn run_id(&self) -> String;
}
