//! cpal-backed audio input for headless hosts.
//! The context is the default input device; each capture stream is a cpal
//! input stream owned by its own thread, since cpal streams are not `Send`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{
    AcquisitionError, AudioBackend, AudioContextHandle, AudioContextState, CaptureConstraints,
    CaptureStream, MediaInput,
};

#[derive(Debug, Default)]
pub struct CpalAudioBackend;

impl AudioBackend for CpalAudioBackend {
    fn create_context(&self) -> Result<Box<dyn AudioContextHandle>, AcquisitionError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(AcquisitionError::NoInputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());
        info!(device = %device_name, "audio context created");
        Ok(Box::new(CpalContext {
            device_name,
            state: Mutex::new(AudioContextState::Running),
        }))
    }
}

struct CpalContext {
    device_name: String,
    state: Mutex<AudioContextState>,
}

fn input_device_present() -> bool {
    cpal::default_host().default_input_device().is_some()
}

impl AudioContextHandle for CpalContext {
    fn state(&self) -> AudioContextState {
        let mut state = self.state.lock();
        // Unplugged device: treat like a suspended context until it returns.
        if *state == AudioContextState::Running && !input_device_present() {
            warn!(device = %self.device_name, "input device disappeared");
            *state = AudioContextState::Suspended;
        }
        *state
    }

    fn resume(&self) -> BoxFuture<'_, Result<(), AcquisitionError>> {
        async move {
            let mut state = self.state.lock();
            match *state {
                AudioContextState::Closed => Err(AcquisitionError::ContextUnavailable(
                    "context already closed".into(),
                )),
                _ if input_device_present() => {
                    *state = AudioContextState::Running;
                    Ok(())
                }
                _ => Err(AcquisitionError::NoInputDevice),
            }
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            *self.state.lock() = AudioContextState::Closed;
            debug!(device = %self.device_name, "audio context closed");
        }
        .boxed()
    }

    fn connect(&self, capture: &dyn CaptureStream) -> Result<(), AcquisitionError> {
        let state = *self.state.lock();
        if state != AudioContextState::Running {
            return Err(AcquisitionError::ContextUnavailable(format!("context is {state}")));
        }
        if !capture.is_active() {
            return Err(AcquisitionError::StreamFailed("capture stream is not active".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct StreamFlags {
    running: AtomicBool,
    failed: AtomicBool,
    stop: AtomicBool,
    samples: AtomicU64,
}

pub struct CpalCaptureStream {
    flags: Arc<StreamFlags>,
}

impl CaptureStream for CpalCaptureStream {
    fn is_active(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
            && !self.flags.failed.load(Ordering::SeqCst)
            && !self.flags.stop.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Default)]
pub struct CpalMediaInput;

impl MediaInput for CpalMediaInput {
    fn acquire<'a>(
        &'a self,
        constraints: &'a CaptureConstraints,
    ) -> BoxFuture<'a, Result<Box<dyn CaptureStream>, AcquisitionError>> {
        let constraints = constraints.clone();
        async move {
            let flags = Arc::new(StreamFlags::default());
            let (ready_tx, ready_rx) = oneshot::channel();
            let thread_flags = Arc::clone(&flags);
            std::thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || run_capture_thread(constraints, thread_flags, ready_tx))
                .map_err(|e| AcquisitionError::StreamFailed(format!("spawn capture thread: {e}")))?;

            match ready_rx.await {
                Ok(Ok(())) => Ok(Box::new(CpalCaptureStream { flags }) as Box<dyn CaptureStream>),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(AcquisitionError::StreamFailed(
                    "capture thread exited before reporting".into(),
                )),
            }
        }
        .boxed()
    }
}

/// Owns the cpal stream for its whole life; returns once `stop` is set.
fn run_capture_thread(
    constraints: CaptureConstraints,
    flags: Arc<StreamFlags>,
    ready: oneshot::Sender<Result<(), AcquisitionError>>,
) {
    let stream = match build_input_stream(&constraints, &flags) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(AcquisitionError::StreamFailed(format!(
            "failed to start input stream: {e}"
        ))));
        return;
    }

    flags.running.store(true, Ordering::SeqCst);
    info!(
        sample_rate = constraints.sample_rate,
        channels = constraints.channel_count,
        "capture stream started"
    );
    let _ = ready.send(Ok(()));

    while !flags.stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    flags.running.store(false, Ordering::SeqCst);
    info!(
        samples = flags.samples.load(Ordering::Relaxed),
        "capture stream stopped"
    );
}

fn build_input_stream(
    constraints: &CaptureConstraints,
    flags: &Arc<StreamFlags>,
) -> Result<cpal::Stream, AcquisitionError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or(AcquisitionError::NoInputDevice)?;

    // Echo cancellation, noise suppression and AGC are left to the OS input
    // chain; cpal exposes no switch for them.
    debug!(
        echo_cancellation = constraints.echo_cancellation,
        noise_suppression = constraints.noise_suppression,
        auto_gain_control = constraints.auto_gain_control,
        "capture constraints"
    );

    let stream_config = cpal::StreamConfig {
        channels: constraints.channel_count,
        sample_rate: cpal::SampleRate(constraints.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let data_flags = Arc::clone(flags);
    let error_flags = Arc::clone(flags);
    device
        .build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                data_flags
                    .samples
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
            },
            move |err| {
                error!(error = %err, "audio capture error");
                error_flags.failed.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| AcquisitionError::StreamFailed(format!("failed to build input stream: {e}")))
}
