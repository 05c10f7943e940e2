//! An in-memory driver and tracer used by the demo flow. Real drivers and
//! tracers live outside this workspace (sentience_core::driver, ::tracer).

use sentience_core::{
    CaptchaDiagnostics, Diagnostics, Driver, DriverError, DownloadEvent, EventKind, ScreenshotFormat,
    ScreenshotOptions, Snapshot, SnapshotOptions, Tracer,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Replays a fixed sequence of snapshots, advancing one step per call —
/// enough to demonstrate a URL-changed assertion without a real browser.
pub struct MockDriver {
    snapshots: Vec<Snapshot>,
    cursor: AtomicUsize,
}

impl MockDriver {
    pub fn scripted_navigation() -> Self {
        Self {
            snapshots: vec![
                Snapshot {
                    url: "https://example.com/".into(),
                    elements: vec![sentience_core::Element {
                        id: 1,
                        role: "button".into(),
                        text: "Sign in".into(),
                        name: "sign-in".into(),
                        bbox: sentience_core::BBox::default(),
                        input_type: None,
                        value: None,
                        value_redacted: None,
                    }],
                    diagnostics: Diagnostics { confidence: 0.95, captcha: Some(CaptchaDiagnostics::default()) },
                },
                Snapshot {
                    url: "https://example.com/dashboard".into(),
                    elements: vec![sentience_core::Element {
                        id: 1,
                        role: "heading".into(),
                        text: "Welcome back".into(),
                        name: String::new(),
                        bbox: sentience_core::BBox::default(),
                        input_type: None,
                        value: None,
                        value_redacted: None,
                    }],
                    diagnostics: Diagnostics { confidence: 0.95, captcha: None },
                },
            ],
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    async fn snapshot(&self, _opts: SnapshotOptions) -> Result<Snapshot, DriverError> {
        let idx = self.cursor.load(Ordering::SeqCst).min(self.snapshots.len() - 1);
        Ok(self.snapshots[idx].clone())
    }

    async fn screenshot(&self, opts: ScreenshotOptions) -> Result<Vec<u8>, DriverError> {
        match opts.format {
            ScreenshotFormat::Jpeg => Ok(vec![0xFF, 0xD8, 0xFF]),
            ScreenshotFormat::Png => Ok(vec![0x89, b'P', b'N', b'G']),
        }
    }

    fn url(&self) -> String {
        let idx = self.cursor.load(Ordering::SeqCst).min(self.snapshots.len() - 1);
        self.snapshots[idx].url.clone()
    }

    async fn wait(&self, _ms: u64) {}

    fn downloads(&self) -> Vec<DownloadEvent> {
        Vec::new()
    }
}

impl MockDriver {
    /// Advances the scripted snapshot cursor, simulating the page having
    /// navigated somewhere new after an action.
    pub fn advance(&self) {
        let next = (self.cursor.load(Ordering::SeqCst) + 1).min(self.snapshots.len() - 1);
        self.cursor.store(next, Ordering::SeqCst);
    }
}

/// Collects every emitted event so the CLI can print a trace summary at
/// the end of the run.
#[derive(Default)]
pub struct MockTracer {
    run_id: String,
    events: Mutex<Vec<Value>>,
}

impl MockTracer {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self { run_id: run_id.into(), events: Mutex::new(Vec::new()) }
    }

    pub fn events(&self) -> Vec<Value> {
        self.events.lock().unwrap().clone()
    }
}

impl Tracer for MockTracer {
    fn emit(&self, kind: EventKind, data: Value, step_id: Option<&str>) {
        tracing::debug!(kind = kind.as_str(), step_id, "event emitted");
        self.events.lock().unwrap().push(serde_json::json!({
            "kind": kind.as_str(),
            "step_id": step_id,
            "data": data,
        }));
    }

    fn run_id(&self) -> String {
        self.run_id.clone()
    }
}
