use crate::handler::{CaptchaHandler, ResetSession};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaPolicy {
    Abort,
    Callback,
}

/// Configuration for [`crate::CaptchaInterceptor::set_captcha_options`].
/// Defaults match spec.md §4.C; the interceptor is disabled until this is
/// called at least once.
#[derive(Clone)]
pub struct CaptchaOptions {
    pub policy: CaptchaPolicy,
    pub min_confidence: f64,
    pub timeout_ms: u64,
    pub poll_ms: u64,
    pub max_retries_new_session: u32,
    pub handler: Option<Arc<dyn CaptchaHandler>>,
    pub reset_session: Option<Arc<dyn ResetSession>>,
}

impl Default for CaptchaOptions {
    fn default() -> Self {
        Self {
            policy: CaptchaPolicy::Abort,
            min_confidence: 0.7,
            timeout_ms: 120_000,
            poll_ms: 1_000,
            max_retries_new_session: 1,
            handler: None,
            reset_session: None,
        }
    }
}
