//! Step Lifecycle & Event Builder (spec.md §4.F): begins steps, records
//! actions (feeding the artifact buffer), and emits the terminal
//! `step_end` event.

use sentience_core::{
    AssertContext, Driver, EventKind, ScreenshotOptions, Snapshot, StepState, Tracer, snapshot_digest,
};
use sentience_artifacts::ArtifactBuffer;
use serde_json::json;
use std::sync::Arc;

/// Inputs to [`StepLifecycle::emit_step_end`]. All fields are optional —
/// callers supply what they observed for this step.
#[derive(Default, Clone)]
pub struct StepEndOptions {
    pub action: Option<String>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub outcome: Option<String>,
    pub duration_ms: Option<u64>,
    pub attempt: Option<u32>,
    pub verify_passed: Option<bool>,
    pub verify_signals: Vec<String>,
    pub post_url: Option<String>,
    pub post_snapshot_digest: Option<String>,
}

/// Owns the active [`StepState`] and drives it through begin / record /
/// emit. One instance per verification run.
pub struct StepLifecycle {
    driver: Arc<dyn Driver>,
    tracer: Arc<dyn Tracer>,
    artifacts: Option<Arc<ArtifactBuffer>>,
    step_index: Option<u32>,
    current: Option<StepState>,
    periodic_capture: Option<tokio::task::JoinHandle<()>>,
}

impl StepLifecycle {
    /// If `artifacts` is configured with a nonzero fixed capture rate
    /// (`ArtifactBufferOptions.fps`), starts its periodic screenshot
    /// capture for the lifetime of this lifecycle alongside the
    /// capture-on-action path driven by `record_action`.
    pub fn new(driver: Arc<dyn Driver>, tracer: Arc<dyn Tracer>, artifacts: Option<Arc<ArtifactBuffer>>) -> Self {
        let periodic_capture = artifacts.as_ref().and_then(|a| a.spawn_periodic_capture(driver.clone()));
        Self { driver, tracer, artifacts, step_index: None, current: None, periodic_capture }
    }

    /// Clears accumulated step state and starts a fresh one. `step_index`
    /// advances the internal counter by one unless an explicit value is
    /// supplied.
    pub fn begin_step(&mut self, goal: impl Into<String>, step_index: Option<u32>) -> String {
        let index = step_index.unwrap_or_else(|| self.step_index.map_or(0, |i| i + 1));
        self.step_index = Some(index);
        let step = StepState::new(index, goal);
        let step_id = step.step_id.clone();
        self.current = Some(step);
        step_id
    }

    fn current(&self) -> &StepState {
        self.current.as_ref().expect("begin_step must be called before using the step lifecycle")
    }

    fn current_mut(&mut self) -> &mut StepState {
        self.current.as_mut().expect("begin_step must be called before using the step lifecycle")
    }

    pub fn step_state(&self) -> &StepState {
        self.current()
    }

    pub fn step_state_mut(&mut self) -> &mut StepState {
        self.current_mut()
    }

    /// Captures `pre_snapshot`/`pre_url` the first time this is called
    /// after `begin_step`; a no-op afterwards.
    pub fn observe_snapshot(&mut self, snapshot: &Snapshot) {
        self.current_mut().record_pre_snapshot(snapshot);
    }

    /// Builds the read-only context predicates evaluate against, combining
    /// the last observed snapshot with the driver's accumulated downloads.
    pub fn build_context(&self, last_snapshot: Option<Snapshot>) -> AssertContext {
        let url = last_snapshot
            .as_ref()
            .map(|s| s.url.clone())
            .unwrap_or_else(|| self.driver.url());
        AssertContext {
            url,
            snapshot: last_snapshot,
            step_id: self.current().step_id.clone(),
            downloads: self.driver.downloads(),
        }
    }

    /// Records `action` as the step's last action, informs the artifact
    /// buffer, and captures one frame if `captureOnAction` is enabled.
    pub async fn record_action(&mut self, action: &str, url: Option<String>) {
        let (step_id, step_index) = {
            let step = self.current_mut();
            step.last_action = Some(action.to_string());
            (step.step_id.clone(), step.step_index)
        };

        let Some(artifacts) = self.artifacts.clone() else {
            return;
        };
        artifacts.record_step(action, &step_id, step_index, url);

        if artifacts.capture_on_action() {
            if let Ok(bytes) = self.driver.screenshot(ScreenshotOptions::default()).await {
                if let Err(e) = artifacts.add_frame(&bytes, "jpeg") {
                    tracing::warn!("failed to capture action frame: {e}");
                }
            }
        }
    }

    /// Emits the single terminal `step_end` event for the current step.
    pub fn emit_step_end(&self, opts: StepEndOptions) {
        let step = self.current();

        let pre_url = step.pre_url.clone();
        let post_url = opts.post_url.clone();
        let pre_snapshot_digest = step.pre_snapshot.as_ref().map(snapshot_digest);
        let post_snapshot_digest = opts.post_snapshot_digest.clone();

        let url_changed = matches!((&pre_url, &post_url), (Some(a), Some(b)) if a != b);

        let mut signals = opts.verify_signals.clone();
        if url_changed && !signals.iter().any(|s| s == "url_changed") {
            signals.push("url_changed".to_string());
        }
        if opts.error.is_some() && !signals.iter().any(|s| s == "error") {
            signals.push("error".to_string());
        }
        if step.task_done {
            if !signals.iter().any(|s| s == "task_done") {
                signals.push("task_done".to_string());
            }
            if let Some(label) = &step.task_done_label {
                signals.push(format!("task_done_label:{label}"));
            }
        }

        let verify_passed = opts.verify_passed.unwrap_or_else(|| step.required_assertions_passed());

        let data = json!({
            "step_id": step.step_id,
            "step_index": step.step_index,
            "goal": step.goal,
            "attempt": opts.attempt,
            "pre_url": pre_url,
            "post_url": post_url,
            "pre_snapshot_digest": pre_snapshot_digest,
            "post_snapshot_digest": post_snapshot_digest,
            "url_changed": url_changed,
            "execution": {
                "success": opts.success,
                "action": opts.action,
                "outcome": opts.outcome,
                "duration_ms": opts.duration_ms,
                "error": opts.error,
            },
            "verification": {
                "passed": verify_passed,
                "signals": signals,
                "assertions": step.assertions,
            },
            "task_done": step.task_done,
        });

        self.tracer.emit(EventKind::StepEnd, data, Some(&step.step_id));
    }
}

impl Drop for StepLifecycle {
    fn drop(&mut self) {
        if let Some(handle) = self.periodic_capture.take() {
            handle.abort();
        }
    }
}
