use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single persisted frame: its filename within `frames/` and the
/// capture timestamp it held in the ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEntry {
    pub file: String,
    pub ts: u64,
}

/// Written last, atomically, at the end of `persist` (spec.md §4.B step 7).
/// `frame_count == frames.len()`, and both are zero whenever `frames_dropped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub run_id: String,
    pub reason: String,
    pub status: String,
    pub created_at_ms: u64,
    pub buffer_seconds: u64,
    pub frame_count: usize,
    pub frames_dropped: bool,
    pub frames_redacted: bool,
    pub frames: Vec<FrameEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_fps: Option<u32>,
    #[serde(default)]
    pub metadata: Value,
}
