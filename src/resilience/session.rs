//! Shared audio session owned by the resilience controller.

use serde::Serialize;

use super::wake_lock::WakeLockHandle;
use crate::audio::{AudioContextHandle, AudioContextState, CaptureStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    AudioPipeline,
    CaptureStream,
    WakeLock,
}

impl RecoveryKind {
    pub const ALL: [RecoveryKind; 3] = [
        RecoveryKind::AudioPipeline,
        RecoveryKind::CaptureStream,
        RecoveryKind::WakeLock,
    ];
}

impl std::fmt::Display for RecoveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryKind::AudioPipeline => write!(f, "audio_pipeline"),
            RecoveryKind::CaptureStream => write!(f, "capture_stream"),
            RecoveryKind::WakeLock => write!(f, "wake_lock"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RetryBudget {
    /// Consecutive failed attempts; reset by any success.
    pub failures: u32,
    /// Retries used up; the periodic loop skips this kind until re-armed.
    pub exhausted: bool,
    pub in_flight: bool,
}

impl RetryBudget {
    pub fn rearm(&mut self) {
        self.failures = 0;
        self.exhausted = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RetryBudgets {
    pub audio_pipeline: RetryBudget,
    pub capture_stream: RetryBudget,
    pub wake_lock: RetryBudget,
}

impl RetryBudgets {
    pub fn get_mut(&mut self, kind: RecoveryKind) -> &mut RetryBudget {
        match kind {
            RecoveryKind::AudioPipeline => &mut self.audio_pipeline,
            RecoveryKind::CaptureStream => &mut self.capture_stream,
            RecoveryKind::WakeLock => &mut self.wake_lock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthState {
    pub audio_context: AudioContextState,
    pub wake_lock_held: bool,
    pub capture_stream_active: bool,
    pub page_visible: bool,
    pub budgets: RetryBudgets,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            audio_context: AudioContextState::Uninitialized,
            wake_lock_held: false,
            capture_stream_active: false,
            page_visible: true,
            budgets: RetryBudgets::default(),
        }
    }
}

#[derive(Default)]
pub struct AudioSessionState {
    pub context: Option<Box<dyn AudioContextHandle>>,
    pub capture: Option<Box<dyn CaptureStream>>,
    pub wake_lock: Option<Box<dyn WakeLockHandle>>,
    pub health: HealthState,
}

impl AudioSessionState {
    /// Re-read liveness from the live handles into `health`.
    pub fn refresh(&mut self) {
        self.health.audio_context = self
            .context
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(AudioContextState::Uninitialized);
        self.health.capture_stream_active =
            self.capture.as_ref().map(|c| c.is_active()).unwrap_or(false);
        self.health.wake_lock_held = self.wake_lock.as_ref().map(|w| w.is_held()).unwrap_or(false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Nothing needed repair.
    Healthy,
    Recovered,
    /// Exhausted earlier, or another recovery of this kind is running.
    Skipped,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub audio_pipeline: RecoveryOutcome,
    pub capture_stream: RecoveryOutcome,
    pub wake_lock: RecoveryOutcome,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            audio_pipeline: RecoveryOutcome::Healthy,
            capture_stream: RecoveryOutcome::Healthy,
            wake_lock: RecoveryOutcome::Healthy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}
