//! Audio input collaborators.
//! The audio context, the microphone capture stream and the media input that
//! produces it are owned by the resilience controller and rebuilt on failure.

pub mod cpal_backend;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Microphone request constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub channel_count: u16,
    pub sample_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            channel_count: 1,
            sample_rate: 44_100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AudioContextState {
    Uninitialized,
    Running,
    Suspended,
    Closed,
}

impl std::fmt::Display for AudioContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioContextState::Uninitialized => write!(f, "uninitialized"),
            AudioContextState::Running => write!(f, "running"),
            AudioContextState::Suspended => write!(f, "suspended"),
            AudioContextState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    /// The user or OS refused microphone (or wake-lock) access.
    PermissionDenied,
    NoInputDevice,
    ContextUnavailable(String),
    StreamFailed(String),
    Unsupported(String),
}

impl AcquisitionError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AcquisitionError::PermissionDenied)
    }
}

impl std::fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionError::PermissionDenied => write!(f, "access denied"),
            AcquisitionError::NoInputDevice => write!(f, "no audio input device available"),
            AcquisitionError::ContextUnavailable(msg) => write!(f, "audio context unavailable: {msg}"),
            AcquisitionError::StreamFailed(msg) => write!(f, "capture stream failed: {msg}"),
            AcquisitionError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

/// A live microphone stream.
pub trait CaptureStream: Send + Sync {
    fn is_active(&self) -> bool;
    fn stop(&self);
}

/// Produces microphone streams.
pub trait MediaInput: Send + Sync {
    fn acquire<'a>(
        &'a self,
        constraints: &'a CaptureConstraints,
    ) -> BoxFuture<'a, Result<Box<dyn CaptureStream>, AcquisitionError>>;
}

/// The processing graph the capture source is connected into.
pub trait AudioContextHandle: Send + Sync {
    fn state(&self) -> AudioContextState;
    fn resume(&self) -> BoxFuture<'_, Result<(), AcquisitionError>>;
    fn close(&self) -> BoxFuture<'_, ()>;
    /// Connect a capture source to the analyser.
    fn connect(&self, capture: &dyn CaptureStream) -> Result<(), AcquisitionError>;
}

pub trait AudioBackend: Send + Sync {
    fn create_context(&self) -> Result<Box<dyn AudioContextHandle>, AcquisitionError>;
}
