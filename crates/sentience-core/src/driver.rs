//! The browser automation driver contract (§6). Implementations live
//! outside this workspace — here we only own the trait and the option
//! records exchanged across it.

use crate::model::{DownloadEvent, Snapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotOptions {
    /// When true, the CAPTCHA interceptor must not run on the resulting
    /// snapshot (used by the interceptor's own wait-for-clear polling to
    /// avoid recursive re-entry).
    #[serde(default)]
    pub skip_captcha_handling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Jpeg,
    Png,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotOptions {
    #[serde(rename = "type")]
    pub format: ScreenshotFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            format: ScreenshotFormat::Jpeg,
            quality: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver I/O failure: {0}")]
    Io(String),
    #[error("driver timed out after {0}ms")]
    Timeout(u64),
}

/// The narrow surface the verification core needs from a browser driver.
/// Snapshot synthesis, navigation, and action primitives beyond mouse /
/// keyboard / screenshot are explicitly out of scope — see spec.md §1.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    async fn snapshot(&self, opts: SnapshotOptions) -> Result<Snapshot, DriverError>;
    async fn screenshot(&self, opts: ScreenshotOptions) -> Result<Vec<u8>, DriverError>;
    fn url(&self) -> String;
    async fn wait(&self, ms: u64);
    fn downloads(&self) -> Vec<DownloadEvent>;
}
