//! Headless monitor daemon. Notifications go to the log, audio comes from
//! the default input device, reminders persist to SQLite.
//!
//! There is no page here, so nothing ever reports a visibility change: once
//! a recovery budget is exhausted it stays exhausted until restart.

use std::sync::Arc;

use tracing::{error, info, warn};

use soundwatch::audio::cpal_backend::{CpalAudioBackend, CpalMediaInput};
use soundwatch::config::MonitorConfig;
use soundwatch::notify::log_platform::LogNotificationPlatform;
use soundwatch::reminders::SystemClock;
use soundwatch::storage::{KeyValueStore, MemoryStore, SqliteStore};
use soundwatch::{init_tracing, Collaborators, Monitor};

#[tokio::main]
async fn main() {
    let (config, config_path, load_error) = MonitorConfig::load_or_default();
    init_tracing(config.logging.json);
    match load_error {
        None => info!(path = %config_path.display(), "config loaded"),
        Some(e) if e.is_not_found() => {
            info!(path = %config_path.display(), "no config file, using defaults")
        }
        Some(e) => warn!(path = %config_path.display(), error = %e, "config load failed, using defaults"),
    }

    let store: Arc<dyn KeyValueStore> = match SqliteStore::open(&config.reminders.database_path) {
        Ok(store) => {
            info!(path = %config.reminders.database_path.display(), "reminder store opened");
            Arc::new(store)
        }
        Err(e) => {
            warn!(error = %e, "reminder store unavailable, reminders will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let monitor = Monitor::start(
        config,
        Collaborators {
            notifications: Arc::new(LogNotificationPlatform),
            audio_backend: Arc::new(CpalAudioBackend),
            media_input: Arc::new(CpalMediaInput),
            wake_lock: None,
            classifier_engine: None,
            store,
            clock: Arc::new(SystemClock),
        },
    )
    .await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal handler failed");
    }
    monitor.shutdown().await;
}
