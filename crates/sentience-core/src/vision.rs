//! The vision-model provider contract (§6), used only as a last resort by
//! the eventually loop's confidence-exhaustion fallback.

use thiserror::Error;

#[derive(Debug, Clone, Copy, Default)]
pub struct VisionOptions {
    pub temperature: f64,
}

#[derive(Debug, Clone)]
pub struct VisionResponse {
    pub content: String,
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision provider error: {0}")]
    Provider(String),
}

/// A capability-gated collaborator: `supports_vision()` lets callers treat
/// an absent/incapable provider as a silent path rather than a failure
/// mode (§9 Design Notes).
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    fn supports_vision(&self) -> bool;

    async fn generate_with_image(
        &self,
        system: &str,
        user: &str,
        image_b64: &str,
        opts: VisionOptions,
    ) -> Result<VisionResponse, VisionError>;
}
