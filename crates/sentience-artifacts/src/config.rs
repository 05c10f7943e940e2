use sentience_core::{Diagnostics, Snapshot};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    OnFail,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipMode {
    Off,
    Auto,
    On,
}

#[derive(Debug, Clone)]
pub struct ClipOptions {
    pub mode: ClipMode,
    pub fps: u32,
    pub seconds: Option<u32>,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self { mode: ClipMode::Auto, fps: 8, seconds: None }
    }
}

/// What [`BeforePersistHook`] receives.
#[derive(Debug, Clone)]
pub struct BeforePersistInput {
    pub run_id: String,
    pub reason: String,
    pub status: String,
    pub snapshot: Option<Snapshot>,
    pub diagnostics: Option<Diagnostics>,
    pub frame_paths: Vec<PathBuf>,
    pub metadata: Value,
}

/// Overrides a hook may apply before artifacts are written. `drop_frames`
/// causes the persist call to skip frame copying entirely.
#[derive(Debug, Clone, Default)]
pub struct BeforePersistOutput {
    pub snapshot: Option<Snapshot>,
    pub diagnostics: Option<Diagnostics>,
    pub frame_paths: Option<Vec<PathBuf>>,
    pub drop_frames: bool,
}

/// Redaction hook invoked before artifacts are written to disk. A thrown
/// error is treated identically to `drop_frames=true` (spec.md §7).
#[async_trait::async_trait]
pub trait BeforePersistHook: Send + Sync {
    async fn call(&self, input: BeforePersistInput) -> Result<BeforePersistOutput, String>;
}

#[derive(Clone)]
pub struct ArtifactBufferOptions {
    pub buffer_seconds: u64,
    pub capture_on_action: bool,
    pub fps: u32,
    pub persist_mode: PersistMode,
    pub output_dir: PathBuf,
    pub on_before_persist: Option<Arc<dyn BeforePersistHook>>,
    pub redact_snapshot_values: bool,
    pub clip: ClipOptions,
}

impl Default for ArtifactBufferOptions {
    fn default() -> Self {
        Self {
            buffer_seconds: 15,
            capture_on_action: true,
            fps: 0,
            persist_mode: PersistMode::OnFail,
            output_dir: PathBuf::from(".sentience/artifacts"),
            on_before_persist: None,
            redact_snapshot_values: true,
            clip: ClipOptions::default(),
        }
    }
}
