/// Machine-readable reason a CAPTCHA handling attempt was aborted
/// (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaReasonCode {
    CaptchaPolicyAbort,
    CaptchaHandlerError,
    CaptchaRetryExhausted,
    CaptchaWaitTimeout,
}

impl CaptchaReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaptchaPolicyAbort => "captcha_policy_abort",
            Self::CaptchaHandlerError => "captcha_handler_error",
            Self::CaptchaRetryExhausted => "captcha_retry_exhausted",
            Self::CaptchaWaitTimeout => "captcha_wait_timeout",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("captcha handling aborted: {}{}", reason_code.as_str(), message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct CaptchaHandlingError {
    pub reason_code: CaptchaReasonCode,
    pub message: Option<String>,
}

impl CaptchaHandlingError {
    pub fn new(reason_code: CaptchaReasonCode) -> Self {
        Self { reason_code, message: None }
    }

    pub fn with_message(reason_code: CaptchaReasonCode, message: impl Into<String>) -> Self {
        Self { reason_code, message: Some(message.into()) }
    }
}
