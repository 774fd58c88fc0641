//! Built-in reminders: morning/evening key check and the hydration interval.
//! Each is gated by its flag at fire time, so toggling a flag never needs
//! the loops restarted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::time::{delay_until, next_occurrence, Clock, TimeOfDay};
use crate::config::ReminderConfig;
use crate::notify::{NotificationDispatcher, NotificationRequest, Severity};

struct BuiltinAlert {
    title: &'static str,
    body: &'static str,
    severity: Severity,
}

const MORNING_KEY_CHECK: BuiltinAlert = BuiltinAlert {
    title: "Morning Key Check",
    body: "Starting your day? Don't forget your keys!",
    severity: Severity::Warning,
};

const EVENING_KEY_CHECK: BuiltinAlert = BuiltinAlert {
    title: "Evening Key Check",
    body: "Heading out? Remember to take your keys!",
    severity: Severity::Warning,
};

const HYDRATION: BuiltinAlert = BuiltinAlert {
    title: "Hydration Time",
    body: "Remember to stay hydrated! Take a water break.",
    severity: Severity::Info,
};

pub struct BuiltinReminders {
    key_check: AtomicBool,
    hydration: AtomicBool,
    morning: TimeOfDay,
    evening: TimeOfDay,
    hydration_interval: Duration,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl BuiltinReminders {
    pub fn new(
        config: &ReminderConfig,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key_check: AtomicBool::new(config.key_check_enabled),
            hydration: AtomicBool::new(config.hydration_enabled),
            morning: config.morning_key_check,
            evening: config.evening_key_check,
            hydration_interval: Duration::from_secs(config.hydration_interval_mins * 60),
            dispatcher,
            clock,
        })
    }

    pub fn set_key_check_enabled(&self, enabled: bool) {
        self.key_check.store(enabled, Ordering::SeqCst);
        info!(enabled, "key check reminders toggled");
    }

    pub fn set_hydration_enabled(&self, enabled: bool) {
        self.hydration.store(enabled, Ordering::SeqCst);
        info!(enabled, "hydration reminders toggled");
    }

    pub fn key_check_enabled(&self) -> bool {
        self.key_check.load(Ordering::SeqCst)
    }

    pub fn hydration_enabled(&self) -> bool {
        self.hydration.load(Ordering::SeqCst)
    }

    /// Spawn the two daily key checks and the hydration loop.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_daily(self.morning, &MORNING_KEY_CHECK, shutdown.clone()),
            self.spawn_daily(self.evening, &EVENING_KEY_CHECK, shutdown.clone()),
            self.spawn_hydration(shutdown),
        ]
    }

    fn spawn_daily(
        self: &Arc<Self>,
        at: TimeOfDay,
        alert: &'static BuiltinAlert,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut after = this.clock.now();
            loop {
                let fire_at = next_occurrence(after, at);
                let delay = delay_until(this.clock.now(), fire_at);
                debug!(title = alert.title, fire_at = %fire_at, "built-in reminder armed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                after = fire_at.max(this.clock.now());
                if this.key_check_enabled() {
                    this.send(alert).await;
                }
            }
        })
    }

    fn spawn_hydration(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = self.hydration_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if this.hydration_enabled() {
                    this.send(&HYDRATION).await;
                }
            }
        })
    }

    async fn send(&self, alert: &BuiltinAlert) {
        let request = NotificationRequest::new(alert.title, alert.body, alert.severity);
        if let Err(e) = self.dispatcher.dispatch(request).await {
            warn!(title = alert.title, error = %e, "built-in reminder not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::config::NotificationConfig;
    use crate::metrics::MetricsRegistry;
    use crate::testing::{MockNotifier, TestClock};

    fn setup(h: u32, m: u32) -> (Arc<BuiltinReminders>, Arc<MockNotifier>, CancellationToken) {
        let platform = Arc::new(MockNotifier::granted());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            platform.clone(),
            NotificationConfig::default(),
            Arc::new(MetricsRegistry::new()),
        ));
        let start = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap();
        let builtins = BuiltinReminders::new(
            &ReminderConfig::default(),
            dispatcher,
            Arc::new(TestClock::new(start)),
        );
        (builtins, platform, CancellationToken::new())
    }

    fn count(platform: &MockNotifier, title: &str) -> usize {
        platform.shown_titles().iter().filter(|t| *t == title).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_checks_fire_daily() {
        let (builtins, platform, shutdown) = setup(7, 59);
        builtins.set_hydration_enabled(false);
        let handles = builtins.start(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(count(&platform, "Morning Key Check"), 1);
        assert_eq!(platform.shown()[0].options.severity, Severity::Warning);

        tokio::time::sleep(Duration::from_secs(10 * 3600)).await;
        assert_eq!(count(&platform, "Evening Key Check"), 1);

        // Next morning, exactly once more.
        tokio::time::sleep(Duration::from_secs(14 * 3600)).await;
        assert_eq!(count(&platform, "Morning Key Check"), 2);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hydration_gated_by_flag() {
        let (builtins, platform, shutdown) = setup(12, 0);
        builtins.set_key_check_enabled(false);
        builtins.set_hydration_enabled(false);
        builtins.start(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(2 * 3600 + 1)).await;
        assert_eq!(count(&platform, "Hydration Time"), 0);

        builtins.set_hydration_enabled(true);
        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
        assert_eq!(count(&platform, "Hydration Time"), 1);
        assert_eq!(count(&platform, "Evening Key Check"), 0);
        shutdown.cancel();
    }
}
