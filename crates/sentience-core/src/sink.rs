//! The failure-artifact persistence seam (§9 Design Notes: "model as an
//! abstract engine interface ... avoid cyclic ownership"). The assertion
//! engine and CAPTCHA interceptor trigger persistence through this trait
//! without depending on the artifact buffer crate directly.

/// Implemented by the failure artifact buffer. `persist_failure` is
/// best-effort: implementations must never let a persistence failure
/// propagate back into the caller.
#[async_trait::async_trait]
pub trait FailureArtifactSink: Send + Sync {
    async fn persist_failure(&self, reason: &str);
}
