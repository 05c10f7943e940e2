//! Assertion Engine and Eventually Loop (spec.md §4.D, §4.E).

use crate::nearest::nearest_matches;
use sentience_core::{
    AssertContext, AssertionRecord, Driver, DriverError, EventKind, FailureArtifactSink,
    Predicate, PredicateOutcome, ScreenshotFormat, ScreenshotOptions, SnapshotOptions, StepState,
    Tracer, VisionOptions, VisionProvider,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options for [`PendingCheck::eventually`]. Defaults mirror spec.md §4.E.
#[derive(Clone)]
pub struct EventuallyOptions {
    pub timeout_ms: u64,
    pub poll_ms: u64,
    pub snapshot_options: SnapshotOptions,
    pub min_confidence: Option<f64>,
    pub max_snapshot_attempts: u32,
    pub vision_provider: Option<Arc<dyn VisionProvider>>,
    pub vision_system_prompt: String,
    pub vision_user_prompt: String,
}

impl Default for EventuallyOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_ms: 250,
            snapshot_options: SnapshotOptions::default(),
            min_confidence: None,
            max_snapshot_attempts: 3,
            vision_provider: None,
            vision_system_prompt: String::new(),
            vision_user_prompt: String::new(),
        }
    }
}

/// Owns the driver/tracer/artifact-sink handles assertions need. Predicate
/// evaluation itself stays pure — see [`sentience_core::Predicate`].
pub struct AssertEngine {
    driver: Arc<dyn Driver>,
    tracer: Arc<dyn Tracer>,
    sink: Option<Arc<dyn FailureArtifactSink>>,
}

impl AssertEngine {
    pub fn new(
        driver: Arc<dyn Driver>,
        tracer: Arc<dyn Tracer>,
        sink: Option<Arc<dyn FailureArtifactSink>>,
    ) -> Self {
        Self { driver, tracer, sink }
    }

    /// Evaluates `predicate` once against `ctx`, decorates failure details
    /// with nearest-match diagnostics, records the outcome on `step`, and
    /// emits a `verification` event. Triggers best-effort artifact
    /// persistence when a required assertion fails.
    pub async fn assert(
        &self,
        step: &mut StepState,
        ctx: &AssertContext,
        predicate: &Predicate,
        label: &str,
        required: bool,
    ) -> bool {
        let mut outcome = predicate(ctx);
        if !outcome.passed {
            outcome.details = self.decorate_nearest_matches(ctx, outcome.details);
        }

        let passed = outcome.passed;
        step.push_assertion(AssertionRecord {
            label: label.to_string(),
            passed,
            required,
            reason: outcome.reason.clone(),
            details: outcome.details.clone(),
        });

        self.emit_verification("assert", label, passed, required, &outcome.reason, &outcome.details);

        if required && !passed {
            self.persist(&format!("assert_failed:{label}")).await;
        }

        passed
    }

    /// `assert` with `required=true`; on pass, also marks the step's task
    /// as done and emits a `task_done` verification event.
    pub async fn assert_done(
        &self,
        step: &mut StepState,
        ctx: &AssertContext,
        predicate: &Predicate,
        label: &str,
    ) -> bool {
        let passed = self.assert(step, ctx, predicate, label, true).await;
        if passed {
            step.task_done = true;
            step.task_done_label = Some(label.to_string());
            self.emit_verification("task_done", label, true, true, "task done", &Map::new());
        }
        passed
    }

    fn decorate_nearest_matches(&self, ctx: &AssertContext, mut details: Map<String, Value>) -> Map<String, Value> {
        let Some(selector) = details.get("selector").and_then(Value::as_str).map(str::to_string) else {
            return details;
        };
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return details;
        };
        let matches = nearest_matches(snapshot, &selector);
        details.insert("nearest_matches".into(), Value::Array(matches));
        details
    }

    fn emit_verification(
        &self,
        kind: &str,
        label: &str,
        passed: bool,
        required: bool,
        reason: &str,
        details: &Map<String, Value>,
    ) {
        let data = json!({
            "kind": kind,
            "label": label,
            "passed": passed,
            "required": required,
            "reason": reason,
            "details": details,
        });
        self.tracer.emit(EventKind::Verification, data, None);
    }

    async fn persist(&self, reason: &str) {
        if let Some(sink) = &self.sink {
            sink.persist_failure(reason).await;
        }
    }

    /// Begins a labelled check. Call `.eventually(step, opts)` to retry it
    /// with snapshot retakes until it passes or the deadline elapses.
    pub fn check(&self, predicate: Predicate, label: impl Into<String>, required: bool) -> PendingCheck<'_> {
        PendingCheck {
            engine: self,
            predicate,
            label: label.into(),
            required,
        }
    }

    async fn eventually(
        &self,
        step: &mut StepState,
        label: &str,
        predicate: Predicate,
        required: bool,
        opts: EventuallyOptions,
    ) -> Result<bool, DriverError> {
        let deadline = Instant::now() + Duration::from_millis(opts.timeout_ms);
        let mut snapshot_attempt: u32 = 0;

        loop {
            let snapshot = self.driver.snapshot(opts.snapshot_options.clone()).await?;
            snapshot_attempt += 1;
            step.record_pre_snapshot(&snapshot);

            if let Some(min_confidence) = opts.min_confidence {
                if snapshot.diagnostics.confidence < min_confidence {
                    self.emit_attempt_outcome(label, "snapshot_low_confidence", false, &Map::new());

                    if snapshot_attempt >= opts.max_snapshot_attempts {
                        if let Some(passed) = self.try_vision_fallback(step, label, required, &opts).await {
                            return Ok(passed);
                        }
                        self.finish(step, label, required, false, "snapshot_exhausted", Map::new()).await;
                        return Ok(false);
                    }
                    if Instant::now() >= deadline {
                        self.finish(step, label, required, false, "timeout", Map::new()).await;
                        return Ok(false);
                    }
                    tokio::time::sleep(Duration::from_millis(opts.poll_ms)).await;
                    continue;
                }
            }

            let ctx = AssertContext {
                snapshot: Some(snapshot.clone()),
                url: snapshot.url.clone(),
                step_id: step.step_id.clone(),
                downloads: self.driver.downloads(),
            };
            let mut outcome = predicate(&ctx);
            if !outcome.passed {
                outcome.details = self.decorate_nearest_matches(&ctx, outcome.details);
            }
            self.emit_attempt_outcome(
                label,
                if outcome.passed { "pass" } else { "fail" },
                outcome.passed,
                &outcome.details,
            );

            if outcome.passed {
                self.finish(step, label, required, true, "pass", outcome.details).await;
                return Ok(true);
            }

            if Instant::now() >= deadline {
                self.finish(step, label, required, false, "timeout", outcome.details).await;
                return Ok(false);
            }

            tokio::time::sleep(Duration::from_millis(opts.poll_ms)).await;
        }
    }

    async fn try_vision_fallback(
        &self,
        step: &mut StepState,
        label: &str,
        required: bool,
        opts: &EventuallyOptions,
    ) -> Option<bool> {
        let provider = opts.vision_provider.as_ref()?;
        if !provider.supports_vision() {
            return None;
        }
        let screenshot = self
            .driver
            .screenshot(ScreenshotOptions {
                format: ScreenshotFormat::Png,
                quality: None,
            })
            .await
            .ok()?;
        let image_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, screenshot);
        let response = provider
            .generate_with_image(
                &opts.vision_system_prompt,
                &opts.vision_user_prompt,
                &image_b64,
                VisionOptions { temperature: 0.0 },
            )
            .await
            .ok()?;

        let passed = response.content.trim().to_lowercase().starts_with("yes");
        let mut details = Map::new();
        details.insert("vision_response".into(), json!(response.content));
        let reason_code = if passed { "vision_fallback_pass" } else { "vision_fallback_fail" };
        self.finish(step, label, required, passed, reason_code, details).await;
        Some(passed)
    }

    fn emit_attempt_outcome(&self, label: &str, reason_code: &str, passed: bool, details: &Map<String, Value>) {
        let data = json!({
            "kind": "assert",
            "label": label,
            "passed": passed,
            "reason_code": reason_code,
            "final": false,
            "details": details,
        });
        self.tracer.emit(EventKind::Verification, data, None);
    }

    async fn finish(
        &self,
        step: &mut StepState,
        label: &str,
        required: bool,
        passed: bool,
        reason_code: &str,
        details: Map<String, Value>,
    ) {
        let data = json!({
            "kind": "assert",
            "label": label,
            "passed": passed,
            "reason_code": reason_code,
            "final": true,
            "details": details,
        });
        self.tracer.emit(EventKind::Verification, data, None);

        step.push_assertion(AssertionRecord {
            label: label.to_string(),
            passed,
            required,
            reason: reason_code.to_string(),
            details,
        });

        if !passed && required {
            self.persist(&format!("assert_failed:{label}")).await;
        }
    }
}

/// A label + predicate + required-ness awaiting `.eventually(...)`.
pub struct PendingCheck<'a> {
    engine: &'a AssertEngine,
    predicate: Predicate,
    label: String,
    required: bool,
}

impl<'a> PendingCheck<'a> {
    pub async fn eventually(
        self,
        step: &mut StepState,
        opts: EventuallyOptions,
    ) -> Result<bool, DriverError> {
        self.engine
            .eventually(step, &self.label, self.predicate, self.required, opts)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentience_core::{DownloadEvent, Snapshot};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockDriver {
        snapshots: Mutex<Vec<Snapshot>>,
        next: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Driver for MockDriver {
        async fn snapshot(&self, _opts: SnapshotOptions) -> Result<Snapshot, DriverError> {
            let idx = self.next.fetch_add(1, Ordering::SeqCst) as usize;
            let snaps = self.snapshots.lock().unwrap();
            Ok(snaps[idx.min(snaps.len() - 1)].clone())
        }

        async fn screenshot(&self, _opts: ScreenshotOptions) -> Result<Vec<u8>, DriverError> {
            Ok(vec![0u8, 1, 2])
        }

        fn url(&self) -> String {
            "https://example.com".into()
        }

        async fn wait(&self, _ms: u64) {}

        fn downloads(&self) -> Vec<DownloadEvent> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct RecordingTracer {
        events: Mutex<Vec<Value>>,
    }

    impl Tracer for RecordingTracer {
        fn emit(&self, _kind: EventKind, data: Value, _step_id: Option<&str>) {
            self.events.lock().unwrap().push(data);
        }

        fn run_id(&self) -> String {
            "run-test".into()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl FailureArtifactSink for RecordingSink {
        async fn persist_failure(&self, reason: &str) {
            self.calls.lock().unwrap().push(reason.to_string());
        }
    }

    fn snapshot(url: &str, confidence: f64) -> Snapshot {
        Snapshot {
            url: url.into(),
            elements: vec![],
            diagnostics: sentience_core::Diagnostics {
                confidence,
                captcha: None,
            },
        }
    }

    fn ctx(snap: Snapshot) -> AssertContext {
        AssertContext {
            url: snap.url.clone(),
            snapshot: Some(snap),
            step_id: "step-0".into(),
            downloads: vec![],
        }
    }

    #[tokio::test]
    async fn assert_pass_records_and_returns_true() {
        let driver = Arc::new(MockDriver {
            snapshots: Mutex::new(vec![snapshot("https://a", 1.0)]),
            next: AtomicU32::new(0),
        });
        let tracer = Arc::new(RecordingTracer::default());
        let engine = AssertEngine::new(driver, tracer.clone(), None);
        let mut step = StepState::new(0, "goal");
        let c = ctx(snapshot("https://a", 1.0));
        let predicate: Predicate = Arc::new(|_ctx| PredicateOutcome::pass("ok"));

        let passed = engine.assert(&mut step, &c, &predicate, "my-check", true).await;
        assert!(passed);
        assert_eq!(step.assertions.len(), 1);
        assert!(step.required_assertions_passed());
    }

    #[tokio::test]
    async fn required_failure_triggers_persist() {
        let driver = Arc::new(MockDriver {
            snapshots: Mutex::new(vec![snapshot("https://a", 1.0)]),
            next: AtomicU32::new(0),
        });
        let tracer = Arc::new(RecordingTracer::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = AssertEngine::new(driver, tracer, Some(sink.clone()));
        let mut step = StepState::new(0, "goal");
        let c = ctx(snapshot("https://a", 1.0));
        let predicate: Predicate = Arc::new(|_ctx| PredicateOutcome::fail("nope"));

        let passed = engine.assert(&mut step, &c, &predicate, "required-check", true).await;
        assert!(!passed);
        assert_eq!(sink.calls.lock().unwrap().as_slice(), ["assert_failed:required-check"]);
    }

    #[tokio::test]
    async fn optional_failure_does_not_persist() {
        let driver = Arc::new(MockDriver {
            snapshots: Mutex::new(vec![snapshot("https://a", 1.0)]),
            next: AtomicU32::new(0),
        });
        let tracer = Arc::new(RecordingTracer::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = AssertEngine::new(driver, tracer, Some(sink.clone()));
        let mut step = StepState::new(0, "goal");
        let c = ctx(snapshot("https://a", 1.0));
        let predicate: Predicate = Arc::new(|_ctx| PredicateOutcome::fail("nope"));

        engine.assert(&mut step, &c, &predicate, "optional-check", false).await;
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn assert_done_sets_task_done_on_pass() {
        let driver = Arc::new(MockDriver {
            snapshots: Mutex::new(vec![snapshot("https://a", 1.0)]),
            next: AtomicU32::new(0),
        });
        let tracer = Arc::new(RecordingTracer::default());
        let engine = AssertEngine::new(driver, tracer, None);
        let mut step = StepState::new(0, "goal");
        let c = ctx(snapshot("https://a", 1.0));
        let predicate: Predicate = Arc::new(|_ctx| PredicateOutcome::pass("done"));

        let passed = engine.assert_done(&mut step, &c, &predicate, "finish").await;
        assert!(passed);
        assert!(step.task_done);
        assert_eq!(step.task_done_label.as_deref(), Some("finish"));
    }

    #[tokio::test]
    async fn nearest_matches_attached_on_selector_failure() {
        let mut snap = snapshot("https://a", 1.0);
        snap.elements.push(sentience_core::Element {
            id: 1,
            role: "button".into(),
            text: String::new(),
            name: "submit".into(),
            bbox: sentience_core::BBox::default(),
            input_type: None,
            value: None,
            value_redacted: None,
        });
        let driver = Arc::new(MockDriver {
            snapshots: Mutex::new(vec![snap.clone()]),
            next: AtomicU32::new(0),
        });
        let tracer = Arc::new(RecordingTracer::default());
        let engine = AssertEngine::new(driver, tracer, None);
        let mut step = StepState::new(0, "goal");
        let c = ctx(snap);
        let predicate: Predicate = Arc::new(|_ctx| {
            let mut details = Map::new();
            details.insert("selector".into(), json!("#submit"));
            PredicateOutcome::fail("not found").with_details(details)
        });

        engine.assert(&mut step, &c, &predicate, "selector-check", false).await;
        let recorded = &step.assertions[0];
        assert!(recorded.details.contains_key("nearest_matches"));
    }

    #[tokio::test]
    async fn eventually_passes_on_second_attempt() {
        let driver = Arc::new(MockDriver {
            snapshots: Mutex::new(vec![snapshot("https://a", 1.0), snapshot("https://b", 1.0)]),
            next: AtomicU32::new(0),
        });
        let tracer = Arc::new(RecordingTracer::default());
        let engine = AssertEngine::new(driver, tracer, None);
        let mut step = StepState::new(0, "goal");
        let predicate: Predicate = Arc::new(|ctx| {
            if ctx.url == "https://b" {
                PredicateOutcome::pass("arrived")
            } else {
                PredicateOutcome::fail("not yet")
            }
        });

        let opts = EventuallyOptions {
            timeout_ms: 2_000,
            poll_ms: 1,
            ..Default::default()
        };
        let passed = engine
            .check(predicate, "navigated", true)
            .eventually(&mut step, opts)
            .await
            .unwrap();
        assert!(passed);
        assert_eq!(step.assertions.len(), 1);
    }

    #[tokio::test]
    async fn eventually_times_out_and_persists_when_required() {
        let driver = Arc::new(MockDriver {
            snapshots: Mutex::new(vec![snapshot("https://a", 1.0)]),
            next: AtomicU32::new(0),
        });
        let tracer = Arc::new(RecordingTracer::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = AssertEngine::new(driver, tracer, Some(sink.clone()));
        let mut step = StepState::new(0, "goal");
        let predicate: Predicate = Arc::new(|_ctx| PredicateOutcome::fail("never"));

        let opts = EventuallyOptions {
            timeout_ms: 5,
            poll_ms: 1,
            ..Default::default()
        };
        let passed = engine
            .check(predicate, "never-passes", true)
            .eventually(&mut step, opts)
            .await
            .unwrap();
        assert!(!passed);
        assert_eq!(sink.calls.lock().unwrap().len(), 1);
        assert_eq!(step.assertions.len(), 1);
    }
}
