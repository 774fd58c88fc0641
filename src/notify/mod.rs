//! Notification dispatch.
//! Permission gate → delivery channel selection → bounded retry.
//! Delivery failures are retried with a fixed backoff; permission denial is not.

pub mod log_platform;
pub mod permission;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;
use crate::metrics::{metric_names, MetricsRegistry};

pub use permission::{Permission, PermissionState, PermissionTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    /// Platform grouping tag. Unique per request unless overridden, so rapid
    /// repeats are never collapsed by the OS.
    pub dedupe_tag: String,
}

impl NotificationRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity,
            dedupe_tag: unique_tag(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.dedupe_tag = tag.into();
        self
    }
}

fn unique_tag() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("sound-detection-{millis}-{}", &nonce[..8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryChannel {
    /// Service-worker style surface that survives a backgrounded page.
    Background,
    InPage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
    pub action: &'static str,
    pub title: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationOptions {
    pub severity: Severity,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub silent: bool,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
}

/// OS notification surface (permission prompt + show).
pub trait NotificationPlatform: Send + Sync {
    /// Permission already known to the platform, if any.
    fn current_permission(&self) -> Option<Permission>;

    fn request_permission(&self) -> BoxFuture<'_, Permission>;

    fn background_channel_available(&self) -> bool;

    fn show<'a>(
        &'a self,
        channel: DeliveryChannel,
        title: &'a str,
        options: &'a NotificationOptions,
    ) -> BoxFuture<'a, Result<(), String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationError {
    PermissionDenied,
    DeliveryExhausted { attempts: u32, last_error: String },
}

impl std::fmt::Display for NotificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationError::PermissionDenied => write!(f, "notification permission denied"),
            NotificationError::DeliveryExhausted { attempts, last_error } => {
                write!(f, "notification delivery failed after {attempts} attempts: {last_error}")
            }
        }
    }
}

pub struct NotificationDispatcher {
    platform: Arc<dyn NotificationPlatform>,
    permission: PermissionTracker,
    /// Serializes permission prompts so concurrent dispatches share one answer.
    prompt_lock: tokio::sync::Mutex<()>,
    config: NotificationConfig,
    metrics: Arc<MetricsRegistry>,
}

impl NotificationDispatcher {
    pub fn new(
        platform: Arc<dyn NotificationPlatform>,
        config: NotificationConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let initial = PermissionState::from_platform(platform.current_permission());
        Self {
            platform,
            permission: PermissionTracker::new(initial),
            prompt_lock: tokio::sync::Mutex::new(()),
            config,
            metrics,
        }
    }

    pub fn permission_state(&self) -> PermissionState {
        self.permission.current()
    }

    pub fn permission_tracker(&self) -> &PermissionTracker {
        &self.permission
    }

    /// Deliver a notification, prompting for permission first if needed.
    pub async fn dispatch(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        self.ensure_permission().await?;

        let channel = if self.platform.background_channel_available() {
            DeliveryChannel::Background
        } else {
            DeliveryChannel::InPage
        };
        let options = self.build_options(&request);
        let max_attempts = self.config.max_attempts.max(1);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let span = self.metrics.span(metric_names::NOTIFY_DELIVERY);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.platform.show(channel, &request.title, &options).await {
                Ok(()) => {
                    let elapsed_us = span.finish();
                    info!(
                        title = %request.title,
                        severity = %request.severity,
                        channel = ?channel,
                        attempt,
                        elapsed_us,
                        "notification_delivered"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        title = %request.title,
                        attempt,
                        max_attempts,
                        error = %e,
                        "notification delivery failed"
                    );
                    last_error = e;
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        error!(title = %request.title, attempts = max_attempts, "notification retries exhausted");
        Err(NotificationError::DeliveryExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Prompt the user again. The only way out of `Denied`.
    pub async fn request_permission(&self) -> PermissionState {
        let _prompt = self.prompt_lock.lock().await;
        let _ = self.prompt().await;
        self.permission.current()
    }

    /// Sends a fixed notification so the user can check delivery end to end.
    pub async fn send_test_notification(&self) -> Result<(), NotificationError> {
        self.dispatch(
            NotificationRequest::new(
                "Test Notification",
                "This is a test notification. If you see this, notifications are working!",
                Severity::Info,
            )
            .with_tag("test-notification"),
        )
        .await
    }

    async fn ensure_permission(&self) -> Result<(), NotificationError> {
        match self.permission.current() {
            PermissionState::Granted => return Ok(()),
            PermissionState::Denied => {
                debug!("notification suppressed: permission denied");
                return Err(NotificationError::PermissionDenied);
            }
            PermissionState::Unrequested | PermissionState::PermissionPending => {}
        }

        let _prompt = self.prompt_lock.lock().await;
        // Another dispatch may have answered the prompt while we waited.
        match self.permission.current() {
            PermissionState::Granted => Ok(()),
            PermissionState::Denied => Err(NotificationError::PermissionDenied),
            PermissionState::Unrequested | PermissionState::PermissionPending => {
                self.prompt().await
            }
        }
    }

    /// Caller must hold `prompt_lock`.
    async fn prompt(&self) -> Result<(), NotificationError> {
        let _ = self.permission.transition(PermissionState::PermissionPending);
        match self.platform.request_permission().await {
            Permission::Granted => {
                let _ = self.permission.transition(PermissionState::Granted);
                Ok(())
            }
            Permission::Denied => {
                let _ = self.permission.transition(PermissionState::Denied);
                warn!("notification permission denied by user");
                Err(NotificationError::PermissionDenied)
            }
            Permission::Default => {
                let _ = self.permission.transition(PermissionState::Unrequested);
                warn!("notification permission prompt dismissed");
                Err(NotificationError::PermissionDenied)
            }
        }
    }

    fn build_options(&self, request: &NotificationRequest) -> NotificationOptions {
        let icon = match request.severity {
            Severity::Warning => self.config.icon_warning.clone(),
            Severity::Info | Severity::Error => self.config.icon_default.clone(),
        };
        NotificationOptions {
            severity: request.severity,
            body: request.body.clone(),
            icon,
            badge: self.config.badge.clone(),
            tag: request.dedupe_tag.clone(),
            require_interaction: true,
            silent: false,
            vibrate: self.config.vibrate.clone(),
            actions: vec![
                NotificationAction {
                    action: "open",
                    title: "Open App",
                },
                NotificationAction {
                    action: "dismiss",
                    title: "Dismiss",
                },
            ],
        }
    }
}
