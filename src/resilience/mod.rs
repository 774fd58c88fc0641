//! Resilience controller: keeps the audio context, the capture stream and
//! the wake lock alive. Periodic health checks and external events (page
//! visibility, wake-lock release, cancelled unload) feed one recovery path
//! with a bounded retry budget per recovery kind.

pub mod session;
pub mod wake_lock;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{
    AcquisitionError, AudioBackend, AudioContextState, CaptureConstraints, MediaInput,
};
use crate::classifier::ClassifierAdapter;
use crate::config::ResilienceConfig;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::notify::{NotificationDispatcher, NotificationRequest, Severity};

pub use session::{
    AudioSessionState, HealthReport, HealthState, RecoveryKind, RecoveryOutcome, RetryBudget,
    Visibility,
};
pub use wake_lock::{WakeLockHandle, WakeLockProvider};

pub const UNLOAD_PROMPT: &str = "Sound detection is running. Are you sure you want to close?";

pub struct ResilienceController {
    session: tokio::sync::Mutex<AudioSessionState>,
    backend: Arc<dyn AudioBackend>,
    media: Arc<dyn MediaInput>,
    wake_lock: Option<Arc<dyn WakeLockProvider>>,
    classifier: Option<Arc<ClassifierAdapter>>,
    dispatcher: Arc<NotificationDispatcher>,
    constraints: CaptureConstraints,
    config: ResilienceConfig,
    metrics: Arc<MetricsRegistry>,
    /// Live between `start` and `stop`; recoveries abandon once it is cancelled.
    running: parking_lot::Mutex<CancellationToken>,
}

impl ResilienceController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        media: Arc<dyn MediaInput>,
        wake_lock: Option<Arc<dyn WakeLockProvider>>,
        classifier: Option<Arc<ClassifierAdapter>>,
        dispatcher: Arc<NotificationDispatcher>,
        constraints: CaptureConstraints,
        config: ResilienceConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            session: tokio::sync::Mutex::new(AudioSessionState::default()),
            backend,
            media,
            wake_lock,
            classifier,
            dispatcher,
            constraints,
            config,
            metrics,
            running: parking_lot::Mutex::new(stopped_token()),
        }
    }

    /// Initial acquisition of the audio pipeline and the wake lock.
    pub async fn start(&self) -> HealthReport {
        {
            let mut running = self.running.lock();
            if running.is_cancelled() {
                *running = CancellationToken::new();
            }
        }
        info!("starting audio session");
        let audio_pipeline = self.run_recovery(RecoveryKind::AudioPipeline).await;
        let wake_lock = if self.wake_lock.is_some() {
            self.run_recovery(RecoveryKind::WakeLock).await
        } else {
            RecoveryOutcome::Healthy
        };
        HealthReport {
            audio_pipeline,
            capture_stream: RecoveryOutcome::Healthy,
            wake_lock,
        }
    }

    /// Release everything. The controller can be started again.
    pub async fn stop(&self) {
        self.running.lock().cancel();
        let mut session = self.session.lock().await;
        if let Some(lock) = session.wake_lock.take() {
            lock.release();
        }
        if let Some(capture) = session.capture.take() {
            capture.stop();
        }
        if let Some(context) = session.context.take() {
            context.close().await;
        }
        session.refresh();
        info!("audio session stopped");
    }

    pub fn is_detection_active(&self) -> bool {
        !self.running.lock().is_cancelled()
    }

    pub async fn health(&self) -> HealthState {
        let mut session = self.session.lock().await;
        session.refresh();
        session.health.clone()
    }

    /// One pass of the periodic check. Pipeline and wake-lock repairs run
    /// concurrently; exhausted kinds are skipped.
    pub async fn check_health(&self) -> HealthReport {
        let health = self.health().await;
        debug!(
            context = %health.audio_context,
            capture = health.capture_stream_active,
            wake_lock = health.wake_lock_held,
            visible = health.page_visible,
            "health check"
        );

        let pipeline = async {
            if health.audio_context != AudioContextState::Running {
                (self.run_recovery(RecoveryKind::AudioPipeline).await, RecoveryOutcome::Healthy)
            } else if !health.capture_stream_active {
                (RecoveryOutcome::Healthy, self.run_recovery(RecoveryKind::CaptureStream).await)
            } else {
                (RecoveryOutcome::Healthy, RecoveryOutcome::Healthy)
            }
        };
        let wake = async {
            if self.wake_lock.is_some() && !health.wake_lock_held && health.page_visible {
                self.run_recovery(RecoveryKind::WakeLock).await
            } else {
                RecoveryOutcome::Healthy
            }
        };
        let ((audio_pipeline, capture_stream), wake_lock) = tokio::join!(pipeline, wake);

        HealthReport {
            audio_pipeline,
            capture_stream,
            wake_lock,
        }
    }

    /// `Visible` re-arms exhausted budgets and repairs whatever is down.
    pub async fn on_visibility_change(&self, visibility: Visibility) -> HealthReport {
        {
            let mut session = self.session.lock().await;
            session.health.page_visible = visibility == Visibility::Visible;
            if visibility == Visibility::Visible {
                for kind in RecoveryKind::ALL {
                    let budget = session.health.budgets.get_mut(kind);
                    if !budget.in_flight {
                        budget.rearm();
                    }
                }
            }
        }
        info!(visibility = ?visibility, "page visibility changed");
        match visibility {
            Visibility::Hidden => HealthReport::healthy(),
            Visibility::Visible => self.check_health().await,
        }
    }

    /// The platform dropped the wake lock; take it again if the page is shown.
    pub async fn on_wake_lock_released(&self) -> RecoveryOutcome {
        let visible = {
            let mut session = self.session.lock().await;
            session.wake_lock = None;
            session.health.wake_lock_held = false;
            let budget = session.health.budgets.get_mut(RecoveryKind::WakeLock);
            if !budget.in_flight {
                budget.rearm();
            }
            session.health.page_visible
        };
        info!(visible, "wake lock released by platform");
        if visible && self.wake_lock.is_some() {
            self.run_recovery(RecoveryKind::WakeLock).await
        } else {
            RecoveryOutcome::Skipped
        }
    }

    /// Advisory prompt text while detection is running.
    pub fn before_unload(&self) -> Option<String> {
        self.is_detection_active().then(|| UNLOAD_PROMPT.to_string())
    }

    /// The user stayed on the page: restart capture after a short delay if
    /// it died meanwhile.
    pub fn unload_cancelled(self: &Arc<Self>) -> JoinHandle<RecoveryOutcome> {
        let this = Arc::clone(self);
        let delay = Duration::from_millis(self.config.unload_restart_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let health = this.health().await;
            if !this.is_detection_active() || health.capture_stream_active {
                return RecoveryOutcome::Healthy;
            }
            if health.audio_context == AudioContextState::Running {
                this.run_recovery(RecoveryKind::CaptureStream).await
            } else {
                this.run_recovery(RecoveryKind::AudioPipeline).await
            }
        })
    }

    /// Bounded retry for one recovery kind. The session lock is held per
    /// attempt only, never across the retry delay.
    pub async fn run_recovery(&self, kind: RecoveryKind) -> RecoveryOutcome {
        let running = self.running.lock().clone();
        {
            let mut session = self.session.lock().await;
            if running.is_cancelled() {
                debug!(kind = %kind, "session stopped, recovery skipped");
                return RecoveryOutcome::Skipped;
            }
            let budget = session.health.budgets.get_mut(kind);
            if budget.exhausted || budget.in_flight {
                debug!(kind = %kind, exhausted = budget.exhausted, "recovery skipped");
                return RecoveryOutcome::Skipped;
            }
            budget.in_flight = true;
        }

        let span = self.metrics.span(metric_names::RECOVERY_RUN);
        let max_attempts = self.config.max_attempts.max(1);
        let delay = Duration::from_millis(self.config.retry_delay_ms);

        for attempt in 1..=max_attempts {
            let result = {
                let mut session = self.session.lock().await;
                if running.is_cancelled() {
                    session.health.budgets.get_mut(kind).in_flight = false;
                    info!(kind = %kind, attempt, "session stopped, recovery abandoned");
                    return RecoveryOutcome::Skipped;
                }
                let result = self.attempt(kind, &mut session).await;
                session.refresh();
                let budget = session.health.budgets.get_mut(kind);
                match &result {
                    Ok(_) => {
                        budget.failures = 0;
                        budget.in_flight = false;
                    }
                    Err(e) if e.is_permission_denied() => {
                        budget.failures += 1;
                        budget.exhausted = true;
                        budget.in_flight = false;
                    }
                    Err(_) => {
                        budget.failures += 1;
                        if attempt == max_attempts {
                            budget.exhausted = true;
                            budget.in_flight = false;
                        }
                    }
                }
                result
            };

            match result {
                Ok(resubscribe) => {
                    let elapsed_us = span.finish();
                    info!(kind = %kind, attempt, elapsed_us, "recovery_succeeded");
                    if resubscribe && !running.is_cancelled() {
                        if let Some(classifier) = &self.classifier {
                            classifier.relisten_all().await;
                        }
                    }
                    return RecoveryOutcome::Recovered;
                }
                Err(e) if e.is_permission_denied() => {
                    error!(kind = %kind, "access denied, recovery abandoned");
                    self.alert(permission_alert(kind)).await;
                    return RecoveryOutcome::Exhausted;
                }
                Err(e) => {
                    warn!(kind = %kind, attempt, max_attempts, error = %e, "recovery attempt failed");
                    if attempt < max_attempts {
                        tokio::select! {
                            _ = running.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        error!(kind = %kind, attempts = max_attempts, "recovery retries exhausted");
        self.alert(exhausted_alert(kind)).await;
        RecoveryOutcome::Exhausted
    }

    /// One repair attempt. `Ok(true)` means the capture input changed and the
    /// classifier listeners must be re-subscribed.
    async fn attempt(
        &self,
        kind: RecoveryKind,
        session: &mut AudioSessionState,
    ) -> Result<bool, AcquisitionError> {
        match kind {
            RecoveryKind::AudioPipeline => self.recover_pipeline(session).await,
            RecoveryKind::CaptureStream => self.recover_capture(session).await,
            RecoveryKind::WakeLock => self.recover_wake_lock(session).await.map(|_| false),
        }
    }

    async fn recover_pipeline(&self, session: &mut AudioSessionState) -> Result<bool, AcquisitionError> {
        if let Some(context) = &session.context {
            match context.state() {
                AudioContextState::Running => {
                    if session.capture.as_ref().map(|c| c.is_active()).unwrap_or(false) {
                        return Ok(false);
                    }
                }
                AudioContextState::Suspended => match context.resume().await {
                    Ok(()) if context.state() == AudioContextState::Running => {
                        debug!("audio context resumed");
                        if session.capture.as_ref().map(|c| c.is_active()).unwrap_or(false) {
                            return Ok(false);
                        }
                    }
                    Ok(()) => debug!("resume left context stopped, rebuilding"),
                    Err(e) => debug!(error = %e, "resume failed, rebuilding"),
                },
                AudioContextState::Uninitialized | AudioContextState::Closed => {}
            }
        }

        if let Some(capture) = session.capture.take() {
            capture.stop();
        }
        if let Some(old) = session.context.take() {
            old.close().await;
        }

        let context = self.backend.create_context()?;
        let capture = match self.media.acquire(&self.constraints).await {
            Ok(capture) => capture,
            Err(e) => {
                context.close().await;
                return Err(e);
            }
        };
        if let Err(e) = context.connect(capture.as_ref()) {
            capture.stop();
            context.close().await;
            return Err(e);
        }
        session.context = Some(context);
        session.capture = Some(capture);
        info!("audio pipeline rebuilt");
        Ok(true)
    }

    async fn recover_capture(&self, session: &mut AudioSessionState) -> Result<bool, AcquisitionError> {
        let Some(context) = &session.context else {
            return Err(AcquisitionError::ContextUnavailable("no audio context".into()));
        };
        let state = context.state();
        if state != AudioContextState::Running {
            return Err(AcquisitionError::ContextUnavailable(format!("context is {state}")));
        }

        if let Some(old) = session.capture.take() {
            old.stop();
        }
        let capture = self.media.acquire(&self.constraints).await?;
        context.connect(capture.as_ref())?;
        session.capture = Some(capture);
        info!("capture stream reacquired");
        Ok(true)
    }

    async fn recover_wake_lock(&self, session: &mut AudioSessionState) -> Result<(), AcquisitionError> {
        let Some(provider) = &self.wake_lock else {
            return Err(AcquisitionError::Unsupported("wake lock".into()));
        };
        if session.wake_lock.as_ref().map(|w| w.is_held()).unwrap_or(false) {
            return Ok(());
        }
        session.wake_lock = Some(provider.request().await?);
        info!("wake lock acquired");
        Ok(())
    }

    async fn alert(&self, request: NotificationRequest) {
        if let Err(e) = self.dispatcher.dispatch(request).await {
            warn!(error = %e, "recovery alert not delivered");
        }
    }
}

fn stopped_token() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}

fn exhausted_alert(kind: RecoveryKind) -> NotificationRequest {
    match kind {
        RecoveryKind::WakeLock => NotificationRequest::new(
            "Warning",
            "Unable to keep device awake. Sound detection may be interrupted.",
            Severity::Warning,
        ),
        RecoveryKind::AudioPipeline => NotificationRequest::new(
            "Error",
            "Sound detection error. Please refresh the page.",
            Severity::Error,
        ),
        RecoveryKind::CaptureStream => NotificationRequest::new(
            "Warning",
            "Microphone stream lost. Sound detection is paused.",
            Severity::Warning,
        ),
    }
}

fn permission_alert(kind: RecoveryKind) -> NotificationRequest {
    match kind {
        RecoveryKind::WakeLock => NotificationRequest::new(
            "Error",
            "Wake lock permission denied. Sound detection may be interrupted.",
            Severity::Error,
        ),
        RecoveryKind::AudioPipeline | RecoveryKind::CaptureStream => NotificationRequest::new(
            "Error",
            "Microphone access denied. Allow microphone access to use sound detection.",
            Severity::Error,
        ),
    }
}

/// Periodic health check until `shutdown` fires. The first check runs one
/// interval after start.
pub fn run_health_loop(
    controller: Arc<ResilienceController>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "health loop started");
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    controller.check_health().await;
                }
            }
        }
        info!("health loop stopped");
    })
}
