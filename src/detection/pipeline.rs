//! Frame loop: ordered score frames → evaluator → cooldown gate → dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DetectionEvaluator, DetectionEvent};
use crate::classifier::{ScoreFrame, SoundId};
use crate::config::SoundConfig;
use crate::notify::{NotificationDispatcher, NotificationRequest, Severity};

/// Minimum spacing between notifications per sound.
pub struct CooldownGate {
    cooldowns: HashMap<SoundId, Duration>,
    last_admitted: Mutex<HashMap<SoundId, Instant>>,
}

impl CooldownGate {
    pub fn new(sounds: &[SoundConfig]) -> Self {
        Self {
            cooldowns: sounds
                .iter()
                .map(|s| (s.id, Duration::from_secs(s.cooldown_secs)))
                .collect(),
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn admit(&self, sound_id: SoundId, now: Instant) -> bool {
        let cooldown = self.cooldowns.get(&sound_id).copied().unwrap_or_default();
        let mut last = self.last_admitted.lock();
        if let Some(prev) = last.get(&sound_id) {
            if !cooldown.is_zero() && now.saturating_duration_since(*prev) < cooldown {
                return false;
            }
        }
        last.insert(sound_id, now);
        true
    }
}

struct NotificationTemplate {
    title: String,
    severity: Severity,
}

pub fn detection_body(sound_id: SoundId, confidence: f64) -> String {
    let label = match sound_id {
        SoundId::DoorLock => "Door lock",
        SoundId::WaterSound => "Water",
    };
    format!("{label} detected ({confidence:.1}% confidence)")
}

/// Spawn the detection loop. Runs until `shutdown` fires or every frame
/// sender is dropped. Dispatch runs on its own task so a slow permission
/// prompt or delivery retry never stalls the frame stream.
pub fn spawn_detection_loop(
    mut frames: mpsc::UnboundedReceiver<ScoreFrame>,
    evaluator: Arc<DetectionEvaluator>,
    dispatcher: Arc<NotificationDispatcher>,
    sounds: &[SoundConfig],
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let gate = CooldownGate::new(sounds);
    let templates: HashMap<SoundId, NotificationTemplate> = sounds
        .iter()
        .map(|s| {
            (
                s.id,
                NotificationTemplate {
                    title: s.title.clone(),
                    severity: s.severity,
                },
            )
        })
        .collect();

    tokio::spawn(async move {
        info!("detection loop started");
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let Some(event) = evaluator.evaluate(frame.sound_id, frame.scores, frame.received_at)
            else {
                continue;
            };
            if !gate.admit(event.sound_id, Instant::now()) {
                debug!(sound = %event.sound_id, "detection within cooldown, not notified");
                continue;
            }
            let Some(template) = templates.get(&event.sound_id) else {
                continue;
            };
            spawn_dispatch(Arc::clone(&dispatcher), notification_for(&event, template));
        }
        info!("detection loop stopped");
    })
}

fn notification_for(event: &DetectionEvent, template: &NotificationTemplate) -> NotificationRequest {
    NotificationRequest::new(
        template.title.clone(),
        detection_body(event.sound_id, event.confidence_percent),
        template.severity,
    )
}

fn spawn_dispatch(dispatcher: Arc<NotificationDispatcher>, request: NotificationRequest) {
    tokio::spawn(async move {
        let title = request.title.clone();
        if let Err(e) = dispatcher.dispatch(request).await {
            warn!(title = %title, error = %e, "detection notification not delivered");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ScoreVector;
    use crate::config::{MonitorConfig, NotificationConfig};
    use crate::metrics::MetricsRegistry;
    use crate::testing::MockNotifier;
    use chrono::Utc;

    fn frame(sound_id: SoundId, background: f32, target: f32) -> ScoreFrame {
        ScoreFrame {
            sound_id,
            scores: ScoreVector::new(background, target),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_cooldown_gate() {
        let sounds = MonitorConfig::default().sounds;
        let gate = CooldownGate::new(&sounds);
        let t0 = Instant::now();
        assert!(gate.admit(SoundId::WaterSound, t0));
        assert!(!gate.admit(SoundId::WaterSound, t0 + Duration::from_secs(29)));
        assert!(gate.admit(SoundId::DoorLock, t0 + Duration::from_secs(29)));
        assert!(gate.admit(SoundId::WaterSound, t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_zero_cooldown_admits_everything() {
        let mut sounds = MonitorConfig::default().sounds;
        for s in &mut sounds {
            s.cooldown_secs = 0;
        }
        let gate = CooldownGate::new(&sounds);
        let t0 = Instant::now();
        assert!(gate.admit(SoundId::WaterSound, t0));
        assert!(gate.admit(SoundId::WaterSound, t0));
    }

    #[test]
    fn test_detection_body() {
        assert_eq!(
            detection_body(SoundId::WaterSound, 82.456),
            "Water detected (82.5% confidence)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_notifies_in_band_once_per_cooldown() {
        let sounds = MonitorConfig::default().sounds;
        let metrics = Arc::new(MetricsRegistry::new());
        let evaluator = Arc::new(DetectionEvaluator::new(&sounds, Arc::clone(&metrics)));
        let platform = Arc::new(MockNotifier::granted());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            platform.clone(),
            NotificationConfig::default(),
            metrics,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let handle = spawn_detection_loop(
            rx,
            Arc::clone(&evaluator),
            dispatcher,
            &sounds,
            shutdown.clone(),
        );

        tx.send(frame(SoundId::WaterSound, 0.1, 0.9)).unwrap();
        tx.send(frame(SoundId::WaterSound, 0.2, 0.8)).unwrap();
        tx.send(frame(SoundId::WaterSound, 0.9, 0.1)).unwrap();
        tx.send(frame(SoundId::DoorLock, 0.0, 1.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(platform.shown_titles(), vec!["Water Running"]);
        assert_eq!(
            platform.shown()[0].options.body,
            "Water detected (90.0% confidence)"
        );
        assert_eq!(evaluator.status_of(SoundId::WaterSound).unwrap().windows, 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        tx.send(frame(SoundId::WaterSound, 0.0, 1.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(platform.show_calls(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
