//! Failure Artifact Buffer: a pre-roll frame ring plus one-shot, crash-safe
//! persistence to disk (spec.md §4.B).

use crate::clip::synthesize_clip;
use crate::clock::{Clock, SystemClock};
use crate::config::{ArtifactBufferOptions, BeforePersistInput, ClipMode, PersistMode};
use crate::fsutil::{write_atomic, write_json_atomic};
use crate::manifest::{ArtifactManifest, FrameEntry};
use sentience_core::{Diagnostics, Driver, ScreenshotOptions, Snapshot};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

struct FrameRecord {
    ts_ms: u64,
    path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct StepRecord {
    ts_ms: u64,
    action: String,
    step_id: String,
    step_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

pub struct ArtifactBuffer {
    run_id: String,
    options: ArtifactBufferOptions,
    scratch_dir: tempfile::TempDir,
    frames: Mutex<VecDeque<FrameRecord>>,
    steps: Mutex<Vec<StepRecord>>,
    persisted: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl ArtifactBuffer {
    pub fn new(run_id: impl Into<String>, options: ArtifactBufferOptions) -> std::io::Result<Self> {
        Self::with_clock(run_id, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        run_id: impl Into<String>,
        options: ArtifactBufferOptions,
        clock: Arc<dyn Clock>,
    ) -> std::io::Result<Self> {
        let scratch_dir = tempfile::Builder::new().prefix("sentience-artifacts-").tempdir()?;
        Ok(Self {
            run_id: run_id.into(),
            options,
            scratch_dir,
            frames: Mutex::new(VecDeque::new()),
            steps: Mutex::new(Vec::new()),
            persisted: AtomicBool::new(false),
            clock,
        })
    }

    pub fn record_step(&self, action: &str, step_id: &str, step_index: u32, url: Option<String>) {
        self.steps.lock().unwrap().push(StepRecord {
            ts_ms: self.clock.now_ms(),
            action: action.to_string(),
            step_id: step_id.to_string(),
            step_index,
            url,
        });
    }

    /// Writes `bytes` into the scratch directory as `frame_<ts>.<fmt>`,
    /// appends to the ring, then prunes anything older than
    /// `now - buffer_seconds*1000`.
    pub fn add_frame(&self, bytes: &[u8], fmt: &str) -> std::io::Result<()> {
        let ts_ms = self.clock.now_ms();
        let path = self.scratch_dir.path().join(format!("frame_{ts_ms}.{fmt}"));
        std::fs::write(&path, bytes)?;

        let mut frames = self.frames.lock().unwrap();
        frames.push_back(FrameRecord { ts_ms, path });

        let cutoff = ts_ms.saturating_sub(self.options.buffer_seconds * 1000);
        while let Some(front) = frames.front() {
            if front.ts_ms < cutoff {
                let evicted = frames.pop_front().unwrap();
                let _ = std::fs::remove_file(&evicted.path);
            } else {
                break;
            }
        }
        Ok(())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Idempotent: returns `None` on every call after the first.
    pub async fn persist(
        &self,
        reason: &str,
        status: &str,
        snapshot: Option<Snapshot>,
        diagnostics: Option<Diagnostics>,
        metadata: Option<Value>,
    ) -> Option<ArtifactManifest> {
        if self.persisted.swap(true, Ordering::SeqCst) {
            return None;
        }

        let now = self.clock.now_ms();
        let run_dir = self.options.output_dir.join(format!("{}-{}", self.run_id, now));
        let frames_dir = run_dir.join("frames");
        if let Err(e) = std::fs::create_dir_all(&frames_dir) {
            tracing::error!("failed to create artifact run directory: {e}");
            return None;
        }

        let (mut frame_paths, frame_ts): (Vec<PathBuf>, HashMap<PathBuf, u64>) = {
            let frames = self.frames.lock().unwrap();
            let paths = frames.iter().map(|f| f.path.clone()).collect();
            let ts = frames.iter().map(|f| (f.path.clone(), f.ts_ms)).collect();
            (paths, ts)
        };
        let mut frames_copied = copy_frames(&frame_paths, &frames_dir, &frame_ts, now);

        let mut snapshot = snapshot;
        if self.options.redact_snapshot_values {
            if let Some(snap) = snapshot.as_mut() {
                redact_snapshot(snap);
            }
        }
        let mut diagnostics = diagnostics;
        let mut frames_dropped = false;
        let metadata = metadata.unwrap_or(Value::Null);

        if let Some(hook) = self.options.on_before_persist.clone() {
            let input = BeforePersistInput {
                run_id: self.run_id.clone(),
                reason: reason.to_string(),
                status: status.to_string(),
                snapshot: snapshot.clone(),
                diagnostics: diagnostics.clone(),
                frame_paths: frame_paths.clone(),
                metadata: metadata.clone(),
            };
            match hook.call(input).await {
                Ok(output) => {
                    if let Some(s) = output.snapshot {
                        snapshot = Some(s);
                    }
                    if let Some(d) = output.diagnostics {
                        diagnostics = Some(d);
                    }
                    if let Some(paths) = output.frame_paths {
                        frame_paths = paths;
                    }
                    if output.drop_frames {
                        frames_dropped = true;
                    }
                }
                Err(message) => {
                    tracing::warn!("on_before_persist hook failed, dropping frames: {message}");
                    frames_dropped = true;
                }
            }
        }

        if frames_dropped {
            for f in &frames_copied {
                let _ = std::fs::remove_file(frames_dir.join(&f.file));
            }
            frames_copied.clear();
        } else {
            frames_copied = copy_frames(&frame_paths, &frames_dir, &frame_ts, now);
        }

        let steps = self.steps.lock().unwrap().clone();
        if write_json_atomic(&run_dir.join("steps.json"), &steps).is_err() {
            tracing::error!("failed to write steps.json");
        }

        let snapshot_file = if let Some(snap) = &snapshot {
            match write_json_atomic(&run_dir.join("snapshot.json"), snap) {
                Ok(()) => Some("snapshot.json".to_string()),
                Err(_) => None,
            }
        } else {
            None
        };

        let diagnostics_file = if let Some(diag) = &diagnostics {
            match write_json_atomic(&run_dir.join("diagnostics.json"), diag) {
                Ok(()) => Some("diagnostics.json".to_string()),
                Err(_) => None,
            }
        } else {
            None
        };

        let (clip_file, clip_fps) = if !frames_dropped && !frames_copied.is_empty() && self.options.clip.mode != ClipMode::Off
        {
            let out_path = run_dir.join("failure.mp4");
            match synthesize_clip(&frames_dir, &out_path, self.options.clip.fps, self.options.clip.mode).await {
                Some(_) => (Some("failure.mp4".to_string()), Some(self.options.clip.fps)),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        let manifest = ArtifactManifest {
            run_id: self.run_id.clone(),
            reason: reason.to_string(),
            status: status.to_string(),
            created_at_ms: now,
            buffer_seconds: self.options.buffer_seconds,
            frame_count: frames_copied.len(),
            frames_dropped,
            frames_redacted: self.options.redact_snapshot_values,
            frames: frames_copied,
            snapshot: snapshot_file,
            diagnostics: diagnostics_file,
            clip: clip_file,
            clip_fps,
            metadata,
        };

        if write_json_atomic(&run_dir.join("manifest.json"), &manifest).is_err() {
            tracing::error!("failed to write manifest.json");
        }

        Some(manifest)
    }

    /// Recursively removes the scratch directory. Safe to call regardless
    /// of whether `persist` ran.
    pub fn cleanup(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(self.scratch_dir.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.options.output_dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn persist_mode(&self) -> PersistMode {
        self.options.persist_mode
    }

    pub fn capture_on_action(&self) -> bool {
        self.options.capture_on_action
    }

    /// Spawns a background task that captures one frame every
    /// `1000/fps` ms via `driver`, independent of the capture-on-action
    /// path. Returns `None` when `fps == 0` (fixed-rate capture
    /// disabled, the default). Stops once `persist` has run or every
    /// other handle to this buffer has been dropped.
    pub fn spawn_periodic_capture(self: &Arc<Self>, driver: Arc<dyn Driver>) -> Option<tokio::task::JoinHandle<()>> {
        if self.options.fps == 0 {
            return None;
        }
        let period_ms = (1000 / self.options.fps).max(1) as u64;
        let weak = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(period_ms));
            loop {
                ticker.tick().await;
                let Some(buffer) = weak.upgrade() else {
                    return;
                };
                if buffer.persisted.load(Ordering::SeqCst) {
                    return;
                }
                if let Ok(bytes) = driver.screenshot(ScreenshotOptions::default()).await {
                    if let Err(e) = buffer.add_frame(&bytes, "jpeg") {
                        tracing::warn!("periodic capture failed to write frame: {e}");
                    }
                }
            }
        }))
    }
}

/// Copies each frame into `frames_dir`, pairing its filename with the
/// capture timestamp recorded when it was appended to the ring. Frames a
/// `BeforePersistHook` substituted in (not present in `frame_ts`) fall
/// back to `default_ts` since their true capture time is unknown.
fn copy_frames(
    paths: &[PathBuf],
    frames_dir: &std::path::Path,
    frame_ts: &HashMap<PathBuf, u64>,
    default_ts: u64,
) -> Vec<FrameEntry> {
    let mut entries = Vec::new();
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Ok(bytes) = std::fs::read(path) {
            if write_atomic(&frames_dir.join(name), &bytes).is_ok() {
                let ts = frame_ts.get(path).copied().unwrap_or(default_ts);
                entries.push(FrameEntry { file: name.to_string(), ts });
            }
        }
    }
    entries
}

fn redact_snapshot(snapshot: &mut Snapshot) {
    for element in &mut snapshot.elements {
        let should_redact = matches!(element.input_type.as_deref(), Some("password") | Some("email") | Some("tel"));
        if should_redact {
            element.value = None;
            element.value_redacted = Some(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::VirtualClock;
    use crate::config::ClipOptions;
    use sentience_core::{BBox, Element};

    fn buffer_with_clock(options: ArtifactBufferOptions, clock: Arc<VirtualClock>) -> ArtifactBuffer {
        ArtifactBuffer::with_clock("run-2", options, clock).unwrap()
    }

    #[test]
    fn prune_within_window() {
        let clock = Arc::new(VirtualClock::at(0));
        let options = ArtifactBufferOptions { buffer_seconds: 1, ..Default::default() };
        let buffer = buffer_with_clock(options, clock.clone());

        buffer.add_frame(b"one", "png").unwrap();
        assert_eq!(buffer.frame_count(), 1);

        clock.set(2000);
        buffer.add_frame(b"two", "png").unwrap();
        assert_eq!(buffer.frame_count(), 1);
    }

    #[tokio::test]
    async fn persist_manifest_matches_scenario() {
        let clock = Arc::new(VirtualClock::at(1000));
        let out_dir = tempfile::tempdir().unwrap();
        let options = ArtifactBufferOptions {
            output_dir: out_dir.path().to_path_buf(),
            clip: ClipOptions { mode: ClipMode::Off, ..Default::default() },
            ..Default::default()
        };
        let buffer = buffer_with_clock(options, clock);

        buffer.record_step("CLICK", "s1", 1, Some("https://example.com".to_string()));
        buffer.add_frame(b"frame", "png").unwrap();

        let snapshot = Snapshot { url: "https://example.com".into(), elements: vec![], diagnostics: Diagnostics::default() };
        let diagnostics = Diagnostics { confidence: 0.8, captcha: None };
        let metadata = json!({"backend": "MockBackend"});

        let manifest = buffer
            .persist("assert_failed", "failure", Some(snapshot), Some(diagnostics), Some(metadata))
            .await
            .unwrap();

        assert_eq!(manifest.run_id, "run-2");
        assert_eq!(manifest.frame_count, 1);
        assert_eq!(manifest.buffer_seconds, 15);
        assert!(manifest.frames_redacted);
        assert_eq!(manifest.frames[0].ts, 1000);
        assert_eq!(manifest.snapshot.as_deref(), Some("snapshot.json"));
        assert_eq!(manifest.diagnostics.as_deref(), Some("diagnostics.json"));

        let run_dir = out_dir.path().join("run-2-1000");
        let steps: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(run_dir.join("steps.json")).unwrap()).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn persist_is_one_shot() {
        let clock = Arc::new(VirtualClock::at(0));
        let out_dir = tempfile::tempdir().unwrap();
        let options = ArtifactBufferOptions { output_dir: out_dir.path().to_path_buf(), ..Default::default() };
        let buffer = buffer_with_clock(options, clock);

        let first = buffer.persist("r", "failure", None, None, None).await;
        assert!(first.is_some());
        let second = buffer.persist("r", "failure", None, None, None).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn redaction_defaults_apply() {
        let clock = Arc::new(VirtualClock::at(0));
        let out_dir = tempfile::tempdir().unwrap();
        let options = ArtifactBufferOptions {
            output_dir: out_dir.path().to_path_buf(),
            clip: ClipOptions { mode: ClipMode::Off, ..Default::default() },
            ..Default::default()
        };
        let buffer = buffer_with_clock(options, clock);

        let snapshot = Snapshot {
            url: "https://example.com".into(),
            elements: vec![
                Element { id: 1, role: "input".into(), text: String::new(), name: String::new(), bbox: BBox::default(), input_type: Some("password".into()), value: Some("secret".into()), value_redacted: None },
                Element { id: 2, role: "input".into(), text: String::new(), name: String::new(), bbox: BBox::default(), input_type: Some("email".into()), value: Some("user@x.com".into()), value_redacted: None },
            ],
            diagnostics: Diagnostics::default(),
        };

        let manifest = buffer.persist("r", "failure", Some(snapshot), None, None).await.unwrap();
        let run_dir = out_dir.path().join(format!("run-2-0"));
        let _ = manifest;
        let persisted: Snapshot = serde_json::from_str(&std::fs::read_to_string(run_dir.join("snapshot.json")).unwrap()).unwrap();
        for element in &persisted.elements {
            assert_eq!(element.value, None);
            assert_eq!(element.value_redacted, Some(true));
        }
    }

    #[tokio::test]
    async fn drop_frames_via_callback() {
        struct DropHook;
        #[async_trait::async_trait]
        impl crate::config::BeforePersistHook for DropHook {
            async fn call(&self, _input: BeforePersistInput) -> Result<crate::config::BeforePersistOutput, String> {
                Ok(crate::config::BeforePersistOutput { drop_frames: true, ..Default::default() })
            }
        }

        let clock = Arc::new(VirtualClock::at(0));
        let out_dir = tempfile::tempdir().unwrap();
        let options = ArtifactBufferOptions {
            output_dir: out_dir.path().to_path_buf(),
            on_before_persist: Some(Arc::new(DropHook)),
            clip: ClipOptions { mode: ClipMode::On, ..Default::default() },
            ..Default::default()
        };
        let buffer = buffer_with_clock(options, clock);
        buffer.add_frame(b"frame", "png").unwrap();

        let manifest = buffer.persist("r", "failure", None, None, None).await.unwrap();
        assert_eq!(manifest.frame_count, 0);
        assert!(manifest.frames_dropped);
        assert!(manifest.clip.is_none());
    }

    #[tokio::test]
    async fn clip_off_yields_null_clip() {
        let clock = Arc::new(VirtualClock::at(0));
        let out_dir = tempfile::tempdir().unwrap();
        let options = ArtifactBufferOptions {
            output_dir: out_dir.path().to_path_buf(),
            clip: ClipOptions { mode: ClipMode::Off, ..Default::default() },
            ..Default::default()
        };
        let buffer = buffer_with_clock(options, clock);
        buffer.add_frame(b"frame", "png").unwrap();

        let manifest = buffer.persist("r", "failure", None, None, None).await.unwrap();
        assert!(manifest.clip.is_none());
        assert!(manifest.clip_fps.is_none());
    }

    #[test]
    fn cleanup_is_safe_to_call_without_persist() {
        let clock = Arc::new(VirtualClock::at(0));
        let buffer = buffer_with_clock(ArtifactBufferOptions::default(), clock);
        buffer.cleanup().unwrap();
        buffer.cleanup().unwrap();
    }

    struct StillDriver;

    #[async_trait::async_trait]
    impl Driver for StillDriver {
        async fn snapshot(&self, _opts: sentience_core::SnapshotOptions) -> Result<Snapshot, sentience_core::DriverError> {
            unimplemented!()
        }

        async fn screenshot(&self, _opts: ScreenshotOptions) -> Result<Vec<u8>, sentience_core::DriverError> {
            Ok(vec![9, 9, 9])
        }

        fn url(&self) -> String {
            "https://a".into()
        }

        async fn wait(&self, _ms: u64) {}

        fn downloads(&self) -> Vec<sentience_core::DownloadEvent> {
            Vec::new()
        }
    }

    #[test]
    fn spawn_periodic_capture_disabled_when_fps_zero() {
        let clock = Arc::new(VirtualClock::at(0));
        let buffer = Arc::new(buffer_with_clock(ArtifactBufferOptions { fps: 0, ..Default::default() }, clock));
        assert!(buffer.spawn_periodic_capture(Arc::new(StillDriver)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_periodic_capture_adds_frames_at_fixed_rate() {
        let clock = Arc::new(VirtualClock::at(0));
        let buffer = Arc::new(buffer_with_clock(ArtifactBufferOptions { fps: 2, ..Default::default() }, clock));
        let handle = buffer.spawn_periodic_capture(Arc::new(StillDriver)).expect("fps > 0 spawns a task");

        tokio::time::advance(std::time::Duration::from_millis(1600)).await;
        tokio::task::yield_now().await;

        assert!(buffer.frame_count() >= 2);
        handle.abort();
    }
}
