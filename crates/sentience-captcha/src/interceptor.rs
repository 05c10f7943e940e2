//! CAPTCHA Interceptor state machine (spec.md §4.C).

use crate::error::{CaptchaHandlingError, CaptchaReasonCode};
use crate::handler::CaptchaAction;
use crate::options::{CaptchaOptions, CaptchaPolicy};
use sentience_core::{Driver, DriverError, EventKind, Snapshot, SnapshotOptions, Tracer};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum GuardedSnapshotError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Captcha(#[from] CaptchaHandlingError),
}

/// Wraps a [`Driver`] so every snapshot (unless explicitly skipped) is
/// routed through CAPTCHA detection and, when configured, resolution.
pub struct CaptchaInterceptor {
    driver: Arc<dyn Driver>,
    tracer: Arc<dyn Tracer>,
    run_id: String,
    options: Mutex<Option<CaptchaOptions>>,
    retry_count: AtomicU32,
}

impl CaptchaInterceptor {
    pub fn new(driver: Arc<dyn Driver>, tracer: Arc<dyn Tracer>, run_id: impl Into<String>) -> Self {
        Self {
            driver,
            tracer,
            run_id: run_id.into(),
            options: Mutex::new(None),
            retry_count: AtomicU32::new(0),
        }
    }

    /// Enables interception with `options`, resetting `retry_count`
    /// (spec.md §5 idempotence).
    pub fn set_captcha_options(&self, options: CaptchaOptions) {
        self.retry_count.store(0, Ordering::SeqCst);
        *self.options.lock().unwrap() = Some(options);
    }

    fn options_snapshot(&self) -> Option<CaptchaOptions> {
        self.options.lock().unwrap().clone()
    }

    /// Takes a snapshot via the wrapped driver, running interception
    /// unless `opts.skip_captcha_handling` is set.
    pub async fn snapshot(
        &self,
        opts: SnapshotOptions,
        step_index: u32,
    ) -> Result<Snapshot, GuardedSnapshotError> {
        let skip = opts.skip_captcha_handling;
        let snapshot = self.driver.snapshot(opts).await?;
        if !skip {
            self.handle_captcha_if_needed(&snapshot, step_index).await?;
        }
        Ok(snapshot)
    }

    /// Core state machine: **IDLE** -> **DETECTED** on a confident CAPTCHA
    /// diagnostic, then dispatched per policy. No-ops when disabled or
    /// when the snapshot carries no confident detection.
    pub async fn handle_captcha_if_needed(
        &self,
        snapshot: &Snapshot,
        step_index: u32,
    ) -> Result<(), CaptchaHandlingError> {
        let Some(options) = self.options_snapshot() else {
            return Ok(());
        };
        if !snapshot.captcha_detected(options.min_confidence) {
            return Ok(());
        }

        self.emit("captcha_detected", snapshot);

        match options.policy {
            CaptchaPolicy::Abort => {
                self.emit("captcha_policy_abort", snapshot);
                Err(CaptchaHandlingError::new(CaptchaReasonCode::CaptchaPolicyAbort))
            }
            CaptchaPolicy::Callback => self.dispatch_callback(snapshot, step_index, &options).await,
        }
    }

    async fn dispatch_callback(
        &self,
        snapshot: &Snapshot,
        step_index: u32,
        options: &CaptchaOptions,
    ) -> Result<(), CaptchaHandlingError> {
        let Some(handler) = options.handler.as_ref() else {
            self.emit("captcha_handler_error", snapshot);
            return Err(CaptchaHandlingError::new(CaptchaReasonCode::CaptchaHandlerError));
        };

        let event = crate::handler::CaptchaEvent {
            run_id: self.run_id.clone(),
            step_index,
            url: snapshot.url.clone(),
            source: "gateway".to_string(),
            captcha: snapshot.diagnostics.captcha.clone().unwrap_or_default(),
        };

        let action = match handler.handle(event).await {
            Ok(action) => action,
            Err(message) => {
                self.emit("captcha_handler_error", snapshot);
                return Err(CaptchaHandlingError::with_message(
                    CaptchaReasonCode::CaptchaHandlerError,
                    message,
                ));
            }
        };

        match action {
            CaptchaAction::Abort => {
                self.emit("captcha_policy_abort", snapshot);
                Err(CaptchaHandlingError::new(CaptchaReasonCode::CaptchaPolicyAbort))
            }
            CaptchaAction::RetryNewSession => self.retry_new_session(snapshot, options).await,
            CaptchaAction::WaitUntilCleared { timeout_ms, poll_ms } => {
                self.wait_until_cleared(
                    step_index,
                    timeout_ms.unwrap_or(options.timeout_ms),
                    poll_ms.unwrap_or(options.poll_ms),
                )
                .await
            }
        }
    }

    async fn retry_new_session(
        &self,
        snapshot: &Snapshot,
        options: &CaptchaOptions,
    ) -> Result<(), CaptchaHandlingError> {
        let count = self.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > options.max_retries_new_session {
            self.emit("captcha_retry_exhausted", snapshot);
            return Err(CaptchaHandlingError::new(CaptchaReasonCode::CaptchaRetryExhausted));
        }
        let Some(reset) = options.reset_session.as_ref() else {
            self.emit("captcha_retry_exhausted", snapshot);
            return Err(CaptchaHandlingError::new(CaptchaReasonCode::CaptchaRetryExhausted));
        };
        if let Err(message) = reset.reset().await {
            self.emit("captcha_handler_error", snapshot);
            return Err(CaptchaHandlingError::with_message(
                CaptchaReasonCode::CaptchaHandlerError,
                message,
            ));
        }
        self.emit("captcha_retry_new_session", snapshot);
        Ok(())
    }

    async fn wait_until_cleared(
        &self,
        step_index: u32,
        timeout_ms: u64,
        poll_ms: u64,
    ) -> Result<(), CaptchaHandlingError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            tokio::time::sleep(Duration::from_millis(poll_ms)).await;

            let probe = self
                .driver
                .snapshot(SnapshotOptions { skip_captcha_handling: true })
                .await
                .map_err(|e| {
                    CaptchaHandlingError::with_message(CaptchaReasonCode::CaptchaWaitTimeout, e.to_string())
                })?;

            let min_confidence = self
                .options_snapshot()
                .map(|o| o.min_confidence)
                .unwrap_or(0.7);

            if !probe.captcha_detected(min_confidence) {
                self.emit("captcha_cleared", &probe);
                let _ = step_index;
                return Ok(());
            }

            if Instant::now() >= deadline {
                self.emit("captcha_wait_timeout", &probe);
                return Err(CaptchaHandlingError::new(CaptchaReasonCode::CaptchaWaitTimeout));
            }
        }
    }

    fn emit(&self, reason_code: &str, snapshot: &Snapshot) {
        let data = json!({
            "kind": "captcha",
            "passed": false,
            "reason_code": reason_code,
            "url": snapshot.url,
        });
        self.tracer.emit(EventKind::Verification, data, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentience_core::{CaptchaDiagnostics, Diagnostics, DownloadEvent, ScreenshotOptions};
    use std::sync::Mutex as StdMutex;

    struct MockDriver {
        snapshots: StdMutex<Vec<Snapshot>>,
    }

    #[async_trait::async_trait]
    impl Driver for MockDriver {
        async fn snapshot(&self, _opts: SnapshotOptions) -> Result<Snapshot, DriverError> {
            let mut snaps = self.snapshots.lock().unwrap();
            if snaps.len() > 1 {
                Ok(snaps.remove(0))
            } else {
                Ok(snaps[0].clone())
            }
        }

        async fn screenshot(&self, _opts: ScreenshotOptions) -> Result<Vec<u8>, DriverError> {
            Ok(vec![])
        }

        fn url(&self) -> String {
            "https://example.com".into()
        }

        async fn wait(&self, _ms: u64) {}

        fn downloads(&self) -> Vec<DownloadEvent> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct RecordingTracer {
        events: StdMutex<Vec<serde_json::Value>>,
    }

    impl Tracer for RecordingTracer {
        fn emit(&self, _kind: EventKind, data: serde_json::Value, _step_id: Option<&str>) {
            self.events.lock().unwrap().push(data);
        }

        fn run_id(&self) -> String {
            "run-test".into()
        }
    }

    fn detected_snapshot(confidence: f64) -> Snapshot {
        Snapshot {
            url: "https://example.com/captcha".into(),
            elements: vec![],
            diagnostics: Diagnostics {
                confidence: 0.9,
                captcha: Some(CaptchaDiagnostics { detected: true, confidence }),
            },
        }
    }

    fn clear_snapshot() -> Snapshot {
        Snapshot {
            url: "https://example.com".into(),
            elements: vec![],
            diagnostics: Diagnostics::default(),
        }
    }

    #[tokio::test]
    async fn disabled_by_default_is_a_no_op() {
        let driver = Arc::new(MockDriver { snapshots: StdMutex::new(vec![detected_snapshot(0.9)]) });
        let tracer = Arc::new(RecordingTracer::default());
        let interceptor = CaptchaInterceptor::new(driver, tracer, "run-1");
        let snap = detected_snapshot(0.9);
        let result = interceptor.handle_captcha_if_needed(&snap, 0).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn abort_policy_raises_without_retake() {
        let driver = Arc::new(MockDriver { snapshots: StdMutex::new(vec![detected_snapshot(0.9)]) });
        let tracer = Arc::new(RecordingTracer::default());
        let interceptor = CaptchaInterceptor::new(driver, tracer.clone(), "run-1");
        interceptor.set_captcha_options(CaptchaOptions {
            policy: CaptchaPolicy::Abort,
            ..Default::default()
        });

        let snap = detected_snapshot(0.9);
        let err = interceptor.handle_captcha_if_needed(&snap, 0).await.unwrap_err();
        assert_eq!(err.reason_code, CaptchaReasonCode::CaptchaPolicyAbort);

        let events = tracer.events.lock().unwrap();
        let reason_codes: Vec<&str> = events.iter().map(|e| e["reason_code"].as_str().unwrap()).collect();
        assert_eq!(reason_codes, vec!["captcha_detected", "captcha_policy_abort"]);
    }

    #[tokio::test]
    async fn low_confidence_detection_is_ignored() {
        let driver = Arc::new(MockDriver { snapshots: StdMutex::new(vec![detected_snapshot(0.1)]) });
        let tracer = Arc::new(RecordingTracer::default());
        let interceptor = CaptchaInterceptor::new(driver, tracer, "run-1");
        interceptor.set_captcha_options(CaptchaOptions::default());

        let snap = detected_snapshot(0.1);
        assert!(interceptor.handle_captcha_if_needed(&snap, 0).await.is_ok());
    }

    #[tokio::test]
    async fn callback_without_handler_errors() {
        let driver = Arc::new(MockDriver { snapshots: StdMutex::new(vec![detected_snapshot(0.9)]) });
        let tracer = Arc::new(RecordingTracer::default());
        let interceptor = CaptchaInterceptor::new(driver, tracer, "run-1");
        interceptor.set_captcha_options(CaptchaOptions {
            policy: CaptchaPolicy::Callback,
            ..Default::default()
        });

        let snap = detected_snapshot(0.9);
        let err = interceptor.handle_captcha_if_needed(&snap, 0).await.unwrap_err();
        assert_eq!(err.reason_code, CaptchaReasonCode::CaptchaHandlerError);
    }

    struct WaitHandler;

    #[async_trait::async_trait]
    impl crate::handler::CaptchaHandler for WaitHandler {
        async fn handle(&self, _event: crate::handler::CaptchaEvent) -> Result<CaptchaAction, String> {
            Ok(CaptchaAction::WaitUntilCleared { timeout_ms: Some(500), poll_ms: Some(1) })
        }
    }

    #[tokio::test]
    async fn wait_until_cleared_resumes_once_clear() {
        let driver = Arc::new(MockDriver {
            snapshots: StdMutex::new(vec![detected_snapshot(0.9), clear_snapshot()]),
        });
        let tracer = Arc::new(RecordingTracer::default());
        let interceptor = CaptchaInterceptor::new(driver, tracer.clone(), "run-1");
        interceptor.set_captcha_options(CaptchaOptions {
            policy: CaptchaPolicy::Callback,
            handler: Some(Arc::new(WaitHandler)),
            ..Default::default()
        });

        let snap = detected_snapshot(0.9);
        let result = interceptor.handle_captcha_if_needed(&snap, 0).await;
        assert!(result.is_ok());
        let events = tracer.events.lock().unwrap();
        let reason_codes: Vec<&str> = events.iter().map(|e| e["reason_code"].as_str().unwrap()).collect();
        assert_eq!(reason_codes, vec!["captcha_detected", "captcha_cleared"]);
    }

    struct RetryHandler;

    #[async_trait::async_trait]
    impl crate::handler::CaptchaHandler for RetryHandler {
        async fn handle(&self, _event: crate::handler::CaptchaEvent) -> Result<CaptchaAction, String> {
            Ok(CaptchaAction::RetryNewSession)
        }
    }

    struct NoopReset;

    #[async_trait::async_trait]
    impl crate::handler::ResetSession for NoopReset {
        async fn reset(&self) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn retry_new_session_exhausts_after_max_retries() {
        let driver = Arc::new(MockDriver { snapshots: StdMutex::new(vec![detected_snapshot(0.9)]) });
        let tracer = Arc::new(RecordingTracer::default());
        let interceptor = CaptchaInterceptor::new(driver, tracer, "run-1");
        interceptor.set_captcha_options(CaptchaOptions {
            policy: CaptchaPolicy::Callback,
            handler: Some(Arc::new(RetryHandler)),
            reset_session: Some(Arc::new(NoopReset)),
            max_retries_new_session: 1,
            ..Default::default()
        });

        let snap = detected_snapshot(0.9);
        let first = interceptor.handle_captcha_if_needed(&snap, 0).await;
        assert!(first.is_ok());
        let second = interceptor.handle_captcha_if_needed(&snap, 0).await.unwrap_err();
        assert_eq!(second.reason_code, CaptchaReasonCode::CaptchaRetryExhausted);
    }

    #[tokio::test]
    async fn set_captcha_options_resets_retry_count() {
        let driver = Arc::new(MockDriver { snapshots: StdMutex::new(vec![detected_snapshot(0.9)]) });
        let tracer = Arc::new(RecordingTracer::default());
        let interceptor = CaptchaInterceptor::new(driver, tracer, "run-1");
        interceptor.set_captcha_options(CaptchaOptions {
            policy: CaptchaPolicy::Callback,
            handler: Some(Arc::new(RetryHandler)),
            reset_session: Some(Arc::new(NoopReset)),
            max_retries_new_session: 1,
            ..Default::default()
        });

        let snap = detected_snapshot(0.9);
        interceptor.handle_captcha_if_needed(&snap, 0).await.unwrap();
        interceptor.set_captcha_options(CaptchaOptions {
            policy: CaptchaPolicy::Callback,
            handler: Some(Arc::new(RetryHandler)),
            reset_session: Some(Arc::new(NoopReset)),
            max_retries_new_session: 1,
            ..Default::default()
        });
        assert_eq!(interceptor.retry_count.load(Ordering::SeqCst), 0);
    }
}
