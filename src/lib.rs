//! Soundwatch: ambient sound monitor with daily reminders.
//! Main library: collaborator wiring, task spawning, tracing setup.

pub mod audio;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod metrics;
pub mod notify;
pub mod reminders;
pub mod resilience;
pub mod storage;

#[cfg(test)]
mod testing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use audio::{AudioBackend, MediaInput};
use classifier::{ClassifierAdapter, ClassifierEngine, MetadataClient};
use config::MonitorConfig;
use detection::{pipeline::spawn_detection_loop, DetectionEvaluator, SoundStatus};
use metrics::{MetricSummary, MetricsRegistry};
use notify::{NotificationDispatcher, NotificationPlatform};
use reminders::{BuiltinReminders, Clock, ReminderScheduler};
use resilience::{run_health_loop, HealthState, ResilienceController, WakeLockProvider};
use storage::KeyValueStore;

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("soundwatch=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    // A second init (tests, embedding hosts) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Host-provided platform pieces.
pub struct Collaborators {
    pub notifications: Arc<dyn NotificationPlatform>,
    pub audio_backend: Arc<dyn AudioBackend>,
    pub media_input: Arc<dyn MediaInput>,
    pub wake_lock: Option<Arc<dyn WakeLockProvider>>,
    /// Without an engine no sound is classified; reminders still run.
    pub classifier_engine: Option<Arc<dyn ClassifierEngine>>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MonitorStatus {
    pub detection_active: bool,
    pub sounds: Vec<SoundStatus>,
    pub health: HealthState,
    pub reminders: usize,
    pub armed_reminders: usize,
}

pub struct Monitor {
    config: MonitorConfig,
    metrics: Arc<MetricsRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    classifier: Arc<ClassifierAdapter>,
    evaluator: Arc<DetectionEvaluator>,
    resilience: Arc<ResilienceController>,
    reminders: Arc<ReminderScheduler>,
    builtins: Arc<BuiltinReminders>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    /// Wire every component and start the background tasks: detection loop,
    /// health loop, reminder timers and built-in reminders.
    pub async fn start(config: MonitorConfig, collab: Collaborators) -> Arc<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let shutdown = CancellationToken::new();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            collab.notifications,
            config.notifications.clone(),
            Arc::clone(&metrics),
        ));

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let classifier = Arc::new(ClassifierAdapter::new(
            &config.sounds,
            config.classifier.overlap_factor,
            frame_tx,
        ));
        if let Some(engine) = &collab.classifier_engine {
            if config.classifier.prefetch_metadata {
                let timeout = Duration::from_secs(config.classifier.http_timeout_secs);
                match MetadataClient::new(timeout) {
                    Ok(client) => classifier.resolve_layouts(&client).await,
                    Err(e) => warn!(error = %e, "metadata client unavailable, default score layout"),
                }
            }
            let loaded = classifier.load_models(engine.as_ref()).await;
            info!(loaded, total = config.sounds.len(), "sound models loaded");
        } else {
            warn!("no classifier engine, sound detection disabled");
        }

        let evaluator = Arc::new(DetectionEvaluator::new(&config.sounds, Arc::clone(&metrics)));
        let mut tasks = vec![spawn_detection_loop(
            frame_rx,
            Arc::clone(&evaluator),
            Arc::clone(&dispatcher),
            &config.sounds,
            shutdown.clone(),
        )];

        let resilience = Arc::new(ResilienceController::new(
            collab.audio_backend,
            collab.media_input,
            collab.wake_lock,
            Some(Arc::clone(&classifier)),
            Arc::clone(&dispatcher),
            config.capture.clone(),
            config.resilience.clone(),
            Arc::clone(&metrics),
        ));
        let report = resilience.start().await;
        info!(?report, "audio session started");
        tasks.push(run_health_loop(
            Arc::clone(&resilience),
            Duration::from_secs(config.resilience.health_check_interval_secs),
            shutdown.clone(),
        ));

        let reminders = ReminderScheduler::new(
            collab.store,
            config.reminders.storage_key.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&collab.clock),
            shutdown.clone(),
        );
        match reminders.load() {
            Ok(count) => info!(count, "reminders restored"),
            Err(e) => warn!(error = %e, "reminder restore failed, starting empty"),
        }

        let builtins = BuiltinReminders::new(&config.reminders, Arc::clone(&dispatcher), collab.clock);
        tasks.extend(builtins.start(shutdown.clone()));

        info!("monitor started");
        Arc::new(Self {
            config,
            metrics,
            dispatcher,
            classifier,
            evaluator,
            resilience,
            reminders,
            builtins,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn classifier(&self) -> &Arc<ClassifierAdapter> {
        &self.classifier
    }

    pub fn resilience(&self) -> &Arc<ResilienceController> {
        &self.resilience
    }

    pub fn reminders(&self) -> &Arc<ReminderScheduler> {
        &self.reminders
    }

    pub fn builtins(&self) -> &Arc<BuiltinReminders> {
        &self.builtins
    }

    pub async fn status(&self) -> MonitorStatus {
        MonitorStatus {
            detection_active: self.resilience.is_detection_active(),
            sounds: self.evaluator.status(),
            health: self.resilience.health().await,
            reminders: self.reminders.list().len(),
            armed_reminders: self.reminders.armed_count(),
        }
    }

    pub fn metrics_summary(&self) -> HashMap<String, MetricSummary> {
        self.metrics.summary()
    }

    /// Stop every task and release the audio session. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("monitor shutting down");
        self.shutdown.cancel();
        self.reminders.cancel_all();
        // Stop the session first so a recovery in flight cannot re-subscribe.
        self.resilience.stop().await;
        for sound in &self.config.sounds {
            self.classifier.stop_tracking(sound.id).await;
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "task ended abnormally");
            }
        }
        info!("monitor stopped");
    }
}
