//! Classifier adapter: one recognizer per tracked sound, continuous listening,
//! raw score arrays forwarded as ordered `ScoreFrame`s to the detection loop.

pub mod model;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SoundConfig;

pub use model::{MetadataClient, ModelMetadata, ModelSource, ScoreLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SoundId {
    DoorLock,
    WaterSound,
}

impl SoundId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundId::DoorLock => "doorLock",
            SoundId::WaterSound => "waterSound",
        }
    }
}

impl std::fmt::Display for SoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Background and target probabilities for one window, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreVector {
    pub background: f32,
    pub target: f32,
}

impl ScoreVector {
    pub fn new(background: f32, target: f32) -> Self {
        Self {
            background: sanitize(background),
            target: sanitize(target),
        }
    }

    /// `None` when the engine returned fewer scores than the layout needs.
    pub fn from_raw(raw: &[f32], layout: ScoreLayout) -> Option<Self> {
        if raw.len() < layout.required_len() {
            return None;
        }
        Some(Self::new(raw[layout.background_index], raw[layout.target_index]))
    }
}

fn sanitize(p: f32) -> f32 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreFrame {
    pub sound_id: SoundId,
    pub scores: ScoreVector,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenOptions {
    pub probability_threshold: f32,
    pub overlap_factor: f32,
    /// Also report windows the engine attributes to background or unknown.
    pub invoke_on_background: bool,
}

/// Invoked by the engine once per classified window with the raw scores.
pub type ScoreCallback = Arc<dyn Fn(Vec<f32>) + Send + Sync>;

/// A loaded model able to classify the shared microphone input.
pub trait Recognizer: Send + Sync {
    fn listen(
        &self,
        options: ListenOptions,
        callback: ScoreCallback,
    ) -> BoxFuture<'_, Result<(), ClassifierError>>;

    fn stop_listening(&self) -> BoxFuture<'_, Result<(), ClassifierError>>;

    fn is_listening(&self) -> bool;
}

pub trait ClassifierEngine: Send + Sync {
    /// Load `model.json` + `metadata.json` and wait until the model is ready.
    fn create<'a>(
        &'a self,
        source: &'a ModelSource,
    ) -> BoxFuture<'a, Result<Arc<dyn Recognizer>, ClassifierError>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierError {
    Load(String),
    Listen(String),
    Metadata(String),
}

impl std::fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierError::Load(msg) => write!(f, "model load failed: {msg}"),
            ClassifierError::Listen(msg) => write!(f, "listen failed: {msg}"),
            ClassifierError::Metadata(msg) => write!(f, "model metadata unavailable: {msg}"),
        }
    }
}

struct TrackedSound {
    source: ModelSource,
    recognizer: Option<Arc<dyn Recognizer>>,
    active: bool,
    /// Also set while a `listen` call is in flight.
    listening: bool,
    layout: ScoreLayout,
    probability_threshold: f32,
}

pub struct ClassifierAdapter {
    sounds: Mutex<HashMap<SoundId, TrackedSound>>,
    frames: mpsc::UnboundedSender<ScoreFrame>,
    overlap_factor: f32,
}

impl ClassifierAdapter {
    pub fn new(
        sounds: &[SoundConfig],
        overlap_factor: f32,
        frames: mpsc::UnboundedSender<ScoreFrame>,
    ) -> Self {
        let tracked = sounds
            .iter()
            .map(|s| {
                (
                    s.id,
                    TrackedSound {
                        source: ModelSource::new(s.model_url.clone()),
                        recognizer: None,
                        active: s.active,
                        listening: false,
                        layout: ScoreLayout::default(),
                        probability_threshold: s.probability_threshold,
                    },
                )
            })
            .collect();
        Self {
            sounds: Mutex::new(tracked),
            frames,
            overlap_factor,
        }
    }

    /// Create one recognizer per tracked sound, concurrently. A failed load
    /// leaves that sound without a recognizer. Returns how many loaded.
    pub async fn load_models(&self, engine: &dyn ClassifierEngine) -> usize {
        let pending: Vec<(SoundId, ModelSource)> = self
            .sounds
            .lock()
            .iter()
            .filter(|(_, t)| t.recognizer.is_none())
            .map(|(id, t)| (*id, t.source.clone()))
            .collect();

        let results = join_all(pending.iter().map(|(id, source)| async move {
            (*id, engine.create(source).await)
        }))
        .await;

        let mut loaded = 0;
        let mut sounds = self.sounds.lock();
        for (id, result) in results {
            match result {
                Ok(recognizer) => {
                    if let Some(tracked) = sounds.get_mut(&id) {
                        info!(sound = %id, url = %tracked.source.model_url(), "model loaded");
                        tracked.recognizer = Some(recognizer);
                        loaded += 1;
                    }
                }
                Err(e) => {
                    let base = sounds.get(&id).map(|t| t.source.base_url().to_string());
                    warn!(sound = %id, base = ?base, error = %e, "model load failed");
                }
            }
        }
        loaded
    }

    /// Read each model's `metadata.json` to locate its background/target
    /// scores. Failures keep the default layout.
    pub async fn resolve_layouts(&self, client: &MetadataClient) {
        let sources: Vec<(SoundId, ModelSource)> = self
            .sounds
            .lock()
            .iter()
            .map(|(id, t)| (*id, t.source.clone()))
            .collect();

        let results = join_all(sources.iter().map(|(id, source)| async move {
            (*id, client.fetch_layout(source).await)
        }))
        .await;

        let mut sounds = self.sounds.lock();
        for (id, result) in results {
            match result {
                Ok(layout) => {
                    if let Some(tracked) = sounds.get_mut(&id) {
                        debug!(
                            sound = %id,
                            background = layout.background_index,
                            target = layout.target_index,
                            "score layout resolved"
                        );
                        tracked.layout = layout;
                    }
                }
                Err(e) => warn!(sound = %id, error = %e, "using default score layout"),
            }
        }
    }

    /// Subscribe to continuous recognition for one sound. Never fails:
    /// unknown, inactive and unloaded sounds are logged and skipped.
    /// Returns whether the sound is listening afterwards.
    pub async fn start_tracking(&self, sound_id: SoundId) -> bool {
        let (recognizer, options, layout) = {
            let mut sounds = self.sounds.lock();
            let Some(tracked) = sounds.get_mut(&sound_id) else {
                warn!(sound = %sound_id, "start_tracking for untracked sound");
                return false;
            };
            if tracked.listening {
                return true;
            }
            if !tracked.active {
                debug!(sound = %sound_id, "sound inactive, not listening");
                return false;
            }
            let Some(recognizer) = tracked.recognizer.clone() else {
                warn!(sound = %sound_id, "model not loaded, cannot start tracking");
                return false;
            };
            tracked.listening = true;
            let options = ListenOptions {
                probability_threshold: tracked.probability_threshold,
                overlap_factor: self.overlap_factor,
                invoke_on_background: true,
            };
            (recognizer, options, tracked.layout)
        };

        let callback = self.frame_callback(sound_id, layout);
        match recognizer.listen(options, callback).await {
            Ok(()) => {
                info!(sound = %sound_id, "listening");
                true
            }
            Err(e) => {
                warn!(sound = %sound_id, error = %e, "listen failed");
                if let Some(tracked) = self.sounds.lock().get_mut(&sound_id) {
                    tracked.listening = false;
                }
                false
            }
        }
    }

    pub async fn stop_tracking(&self, sound_id: SoundId) {
        let recognizer = {
            let mut sounds = self.sounds.lock();
            match sounds.get_mut(&sound_id) {
                Some(tracked) if tracked.listening => {
                    tracked.listening = false;
                    tracked.recognizer.clone()
                }
                _ => None,
            }
        };
        if let Some(recognizer) = recognizer {
            if let Err(e) = recognizer.stop_listening().await {
                warn!(sound = %sound_id, error = %e, "stop listening failed");
            }
            info!(sound = %sound_id, "stopped listening");
        }
    }

    /// Start every active sound. Returns how many are listening.
    pub async fn start_all(&self) -> usize {
        let mut listening = 0;
        for id in self.tracked_ids() {
            if self.start_tracking(id).await {
                listening += 1;
            }
        }
        listening
    }

    /// Re-subscribe every active sound after the shared audio pipeline was
    /// rebuilt; the old subscriptions died with the old input.
    pub async fn relisten_all(&self) -> usize {
        for id in self.tracked_ids() {
            self.stop_tracking(id).await;
        }
        let listening = self.start_all().await;
        info!(listening, "classifier listeners re-subscribed");
        listening
    }

    pub fn is_listening(&self, sound_id: SoundId) -> bool {
        self.sounds
            .lock()
            .get(&sound_id)
            .map(|t| t.listening)
            .unwrap_or(false)
    }

    pub fn is_listening_any(&self) -> bool {
        self.sounds.lock().values().any(|t| t.listening)
    }

    pub fn is_loaded(&self, sound_id: SoundId) -> bool {
        self.sounds
            .lock()
            .get(&sound_id)
            .map(|t| t.recognizer.is_some())
            .unwrap_or(false)
    }

    pub fn layout(&self, sound_id: SoundId) -> Option<ScoreLayout> {
        self.sounds.lock().get(&sound_id).map(|t| t.layout)
    }

    fn tracked_ids(&self) -> Vec<SoundId> {
        let mut ids: Vec<SoundId> = self.sounds.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    fn frame_callback(&self, sound_id: SoundId, layout: ScoreLayout) -> ScoreCallback {
        let frames = self.frames.clone();
        Arc::new(move |raw: Vec<f32>| match ScoreVector::from_raw(&raw, layout) {
            Some(scores) => {
                let _ = frames.send(ScoreFrame {
                    sound_id,
                    scores,
                    received_at: Utc::now(),
                });
            }
            None => debug!(sound = %sound_id, len = raw.len(), "malformed score array dropped"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::testing::MockEngine;

    fn adapter() -> (ClassifierAdapter, mpsc::UnboundedReceiver<ScoreFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = MonitorConfig::default();
        (ClassifierAdapter::new(&config.sounds, 0.5, tx), rx)
    }

    #[test]
    fn test_sound_id_serde() {
        assert_eq!(serde_json::to_string(&SoundId::WaterSound).unwrap(), "\"waterSound\"");
        let id: SoundId = serde_json::from_str("\"doorLock\"").unwrap();
        assert_eq!(id, SoundId::DoorLock);
    }

    #[test]
    fn test_score_vector_from_raw() {
        let layout = ScoreLayout {
            background_index: 1,
            target_index: 0,
        };
        let v = ScoreVector::from_raw(&[0.8, 0.2], layout).unwrap();
        assert_eq!(v, ScoreVector::new(0.2, 0.8));
        assert!(ScoreVector::from_raw(&[0.5], ScoreLayout::default()).is_none());
        assert_eq!(ScoreVector::new(f32::NAN, 1.5), ScoreVector::new(0.0, 1.0));
    }

    #[tokio::test]
    async fn test_start_tracking_without_model_is_noop() {
        let (adapter, _rx) = adapter();
        assert!(!adapter.start_tracking(SoundId::WaterSound).await);
        assert!(!adapter.is_listening_any());
    }

    #[tokio::test]
    async fn test_load_failure_leaves_sound_unloaded() {
        let (adapter, _rx) = adapter();
        let engine = MockEngine::new();
        engine.fail_for("4JaX5pjX6");

        assert_eq!(adapter.load_models(&engine).await, 1);
        assert!(adapter.is_loaded(SoundId::WaterSound));
        assert!(!adapter.is_loaded(SoundId::DoorLock));
        assert_eq!(adapter.start_all().await, 1);
    }

    #[tokio::test]
    async fn test_start_tracking_is_idempotent_and_forwards_frames() {
        let (adapter, mut rx) = adapter();
        let engine = MockEngine::new();
        adapter.load_models(&engine).await;

        assert!(adapter.start_tracking(SoundId::WaterSound).await);
        assert!(adapter.start_tracking(SoundId::WaterSound).await);

        let recognizer = engine.recognizer("HMHHWzV40").unwrap();
        assert_eq!(recognizer.listen_calls(), 1);
        let options = recognizer.last_options().unwrap();
        assert_eq!(options.overlap_factor, 0.5);
        assert!(options.invoke_on_background);

        recognizer.emit(vec![0.25, 0.75]);
        recognizer.emit(vec![0.9, 0.1]);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sound_id, SoundId::WaterSound);
        assert_eq!(first.scores, ScoreVector::new(0.25, 0.75));
        assert_eq!(second.scores, ScoreVector::new(0.9, 0.1));
    }

    #[tokio::test]
    async fn test_relisten_all_resubscribes() {
        let (adapter, _rx) = adapter();
        let engine = MockEngine::new();
        adapter.load_models(&engine).await;
        adapter.start_all().await;

        assert_eq!(adapter.relisten_all().await, 2);
        let water = engine.recognizer("HMHHWzV40").unwrap();
        assert_eq!(water.listen_calls(), 2);
        assert_eq!(water.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_listen_clears_flag() {
        let (adapter, _rx) = adapter();
        let engine = MockEngine::new();
        adapter.load_models(&engine).await;
        engine.recognizer("HMHHWzV40").unwrap().fail_next_listen();

        assert!(!adapter.start_tracking(SoundId::WaterSound).await);
        assert!(!adapter.is_listening(SoundId::WaterSound));
        assert!(adapter.start_tracking(SoundId::WaterSound).await);
    }
}
