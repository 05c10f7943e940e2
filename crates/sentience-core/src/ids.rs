//! Identifier helpers: run ids (ULID) and step ids (`"step-" + index`).

use ulid::Ulid;

/// Generates a new run id. Uses a ULID, matching the teacher codebase's use
/// of ULIDs for session identity.
pub fn new_run_id() -> String {
    format!("run-{}", Ulid::new())
}

/// The canonical step id for a given step index. `StepState` and the
/// artifact buffer must agree on this format — step ids are never stored
/// independently of the index that produced them.
pub fn step_id(step_index: u32) -> String {
    format!("step-{step_index}")
}
