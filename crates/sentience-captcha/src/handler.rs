use sentience_core::CaptchaDiagnostics;

/// Passed to the configured [`CaptchaHandler`] when a CAPTCHA is detected
/// with `policy=callback`.
#[derive(Debug, Clone)]
pub struct CaptchaEvent {
    pub run_id: String,
    pub step_index: u32,
    pub url: String,
    pub source: String,
    pub captcha: CaptchaDiagnostics,
}

/// What a handler decides to do about a detected CAPTCHA.
#[derive(Debug, Clone)]
pub enum CaptchaAction {
    Abort,
    RetryNewSession,
    WaitUntilCleared {
        timeout_ms: Option<u64>,
        poll_ms: Option<u64>,
    },
}

/// User-supplied callback invoked on CAPTCHA detection under
/// `policy=callback`. Returning `Err` is treated the same as the handler
/// throwing in the original design — it maps to `captcha_handler_error`.
#[async_trait::async_trait]
pub trait CaptchaHandler: Send + Sync {
    async fn handle(&self, event: CaptchaEvent) -> Result<CaptchaAction, String>;
}

/// Re-establishes a fresh session, invoked before a `retry_new_session`
/// action is accepted.
#[async_trait::async_trait]
pub trait ResetSession: Send + Sync {
    async fn reset(&self) -> Result<(), String>;
}
