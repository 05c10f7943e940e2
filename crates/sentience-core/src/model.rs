//! Core data model: snapshots, assertion records, and step state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A single interactive element observed in a [`Snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Stable integer id, unique within the snapshot.
    pub id: u64,
    pub role: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub name: String,
    pub bbox: BBox,
    /// `"password" | "email" | "tel" | ...` — drives redaction in the
    /// artifact buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_redacted: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptchaDiagnostics {
    pub detected: bool,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha: Option<CaptchaDiagnostics>,
}

/// A structured observation of the page at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub url: String,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl Snapshot {
    pub fn captcha_detected(&self, min_confidence: f64) -> bool {
        self.diagnostics
            .captcha
            .as_ref()
            .is_some_and(|c| c.detected && c.confidence >= min_confidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadEvent {
    pub status: DownloadStatus,
    pub suggested_filename: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Context handed to a [`Predicate`]. Predicates must treat this as
/// read-only — nothing here is mutated after construction.
#[derive(Debug, Clone)]
pub struct AssertContext {
    pub snapshot: Option<Snapshot>,
    pub url: String,
    pub step_id: String,
    pub downloads: Vec<DownloadEvent>,
}

/// What a predicate returns: pass/fail, a human reason, and arbitrary
/// structured details (e.g. `{"selector": "#submit"}` to trigger
/// nearest-match diagnostics).
#[derive(Debug, Clone, Default)]
pub struct PredicateOutcome {
    pub passed: bool,
    pub reason: String,
    pub details: Map<String, Value>,
}

impl PredicateOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
            details: Map::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            details: Map::new(),
        }
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }
}

/// A pure, synchronous check against an [`AssertContext`]. Must not perform
/// I/O or mutate the context. Represented as a reference-counted closure so
/// callers can cheaply clone and store predicates for retry loops.
pub type Predicate = Arc<dyn Fn(&AssertContext) -> PredicateOutcome + Send + Sync>;

/// A single recorded assertion outcome. Appended to a step in evaluation
/// order and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionRecord {
    pub label: String,
    pub passed: bool,
    pub required: bool,
    pub reason: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

/// Per-step bookkeeping owned exclusively by the step lifecycle.
#[derive(Debug, Clone)]
pub struct StepState {
    pub step_id: String,
    pub step_index: u32,
    pub goal: String,
    pub pre_snapshot: Option<Snapshot>,
    pub pre_url: Option<String>,
    pub last_action: Option<String>,
    pub assertions: Vec<AssertionRecord>,
    pub task_done: bool,
    pub task_done_label: Option<String>,
}

impl StepState {
    pub fn new(step_index: u32, goal: impl Into<String>) -> Self {
        Self {
            step_id: crate::ids::step_id(step_index),
            step_index,
            goal: goal.into(),
            pre_snapshot: None,
            pre_url: None,
            last_action: None,
            assertions: Vec::new(),
            task_done: false,
            task_done_label: None,
        }
    }

    /// True iff every assertion marked `required` in this step passed.
    pub fn required_assertions_passed(&self) -> bool {
        self.assertions.iter().filter(|a| a.required).all(|a| a.passed)
    }

    pub fn push_assertion(&mut self, record: AssertionRecord) {
        self.assertions.push(record);
    }

    /// Captures `pre_snapshot`/`pre_url` on the first snapshot seen after
    /// `beginStep`. No-op on subsequent calls.
    pub fn record_pre_snapshot(&mut self, snapshot: &Snapshot) {
        if self.pre_snapshot.is_none() {
            self.pre_url = Some(snapshot.url.clone());
            self.pre_snapshot = Some(snapshot.clone());
        }
    }
}
