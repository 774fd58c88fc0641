//! Custom and preset reminders: the persisted list, one armed timer per
//! active record, fire → re-arm for the next day → dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::time::{delay_until, next_occurrence, Clock, TimeOfDay};
use super::timers::{TimerRegistry, TimerTicket};
use super::{Preset, ReminderDraft, ReminderError, ReminderId, ReminderRecord, DEFAULT_ICON};
use crate::notify::{NotificationDispatcher, NotificationRequest, Severity};
use crate::storage::KeyValueStore;

pub struct ReminderScheduler {
    records: Mutex<Vec<ReminderRecord>>,
    timers: TimerRegistry,
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    last_id: AtomicU64,
    shutdown: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        storage_key: impl Into<String>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
            timers: TimerRegistry::new(),
            store,
            storage_key: storage_key.into(),
            dispatcher,
            clock,
            last_id: AtomicU64::new(0),
            shutdown,
        })
    }

    /// Restore the persisted list and arm one timer per active record.
    /// Entries that fail to parse or repeat an earlier id are skipped.
    pub fn load(self: &Arc<Self>) -> Result<usize, ReminderError> {
        let Some(blob) = self.store.get(&self.storage_key)? else {
            debug!(key = %self.storage_key, "no saved reminders");
            return Ok(0);
        };

        let entries = match serde_json::from_str::<Vec<serde_json::Value>>(&blob) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(key = %self.storage_key, error = %e, "saved reminders unreadable, starting empty");
                return Ok(0);
            }
        };

        let mut loaded: Vec<ReminderRecord> = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<ReminderRecord>(entry) {
                Ok(record) if loaded.iter().any(|r| r.id == record.id) => {
                    warn!(id = record.id, "duplicate reminder id skipped");
                }
                Ok(record) => loaded.push(record),
                Err(e) => warn!(error = %e, "invalid reminder entry skipped"),
            }
        }

        self.timers.cancel_all();
        let max_id = loaded.iter().map(|r| r.id).max().unwrap_or(0);
        self.last_id.fetch_max(max_id, Ordering::SeqCst);
        let to_arm: Vec<(ReminderId, TimeOfDay)> = loaded
            .iter()
            .filter(|r| r.active)
            .map(|r| (r.id, r.time))
            .collect();
        let count = loaded.len();
        *self.records.lock() = loaded;

        let now = self.clock.now();
        for (id, time) in to_arm {
            self.arm(id, time, now);
        }
        info!(count, armed = self.timers.armed_count(), "reminders loaded");
        Ok(count)
    }

    /// Persist the whole list, preserving insertion order.
    pub fn save(&self) -> Result<(), ReminderError> {
        let blob = serde_json::to_string(&*self.records.lock())?;
        self.store.set(&self.storage_key, &blob)?;
        Ok(())
    }

    pub fn create(self: &Arc<Self>, draft: ReminderDraft) -> Result<ReminderRecord, ReminderError> {
        let record = self.insert(draft)?;
        self.confirm(
            "Reminder Created",
            format!("Reminder \"{}\" set for {}", record.title, record.time),
        );
        Ok(record)
    }

    pub fn create_preset(self: &Arc<Self>, preset: Preset) -> Result<ReminderRecord, ReminderError> {
        let record = self.insert(preset.draft())?;
        self.confirm(
            "Reminder Created",
            format!("{} reminder set for {}", record.title, record.time),
        );
        Ok(record)
    }

    /// Title-only reminder; the message is derived from the title.
    pub fn create_quick(
        self: &Arc<Self>,
        title: &str,
        time: TimeOfDay,
        icon: Option<String>,
    ) -> Result<ReminderRecord, ReminderError> {
        let mut draft = ReminderDraft::new(title, format!("Time for: {title}"), time);
        draft.icon = icon;
        let record = self.insert(draft)?;
        self.confirm(
            "Reminder Created",
            format!("{} reminder set for {}", record.title, time.display_12h()),
        );
        Ok(record)
    }

    /// Flip `active` and persist. An armed timer is left in place (it will
    /// skip when it fires); turning on arms only when nothing is armed.
    pub fn toggle(self: &Arc<Self>, id: ReminderId, active: bool) -> Result<(), ReminderError> {
        let time = {
            let mut records = self.records.lock();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(ReminderError::NotFound(id))?;
            record.active = active;
            record.time
        };
        self.persist();
        if active && !self.timers.is_armed(id) {
            self.arm(id, time, self.clock.now());
        }
        info!(id, active, "reminder toggled");
        Ok(())
    }

    /// Move a reminder to a new time and re-arm it.
    pub fn edit(
        self: &Arc<Self>,
        id: ReminderId,
        new_time: TimeOfDay,
    ) -> Result<ReminderRecord, ReminderError> {
        let record = {
            let mut records = self.records.lock();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(ReminderError::NotFound(id))?;
            record.time = new_time;
            record.clone()
        };
        self.persist();
        if record.active {
            self.arm(id, new_time, self.clock.now());
        } else {
            self.timers.cancel(id);
        }
        self.confirm(
            "Reminder Updated",
            format!("{} reminder updated to {}", record.title, new_time.display_12h()),
        );
        Ok(record)
    }

    /// `edit` with a 12-hour `h:mm` time and AM/PM marker.
    pub fn edit_12h(
        self: &Arc<Self>,
        id: ReminderId,
        time: &str,
        period: &str,
    ) -> Result<ReminderRecord, ReminderError> {
        let new_time = TimeOfDay::parse_12h(time, period)?;
        self.edit(id, new_time)
    }

    pub fn delete(&self, id: ReminderId) -> Result<(), ReminderError> {
        {
            let mut records = self.records.lock();
            let before = records.len();
            records.retain(|r| r.id != id);
            if records.len() == before {
                return Err(ReminderError::NotFound(id));
            }
            self.timers.cancel(id);
        }
        self.persist();
        info!(id, "reminder deleted");
        Ok(())
    }

    pub fn list(&self) -> Vec<ReminderRecord> {
        self.records.lock().clone()
    }

    pub fn get(&self, id: ReminderId) -> Option<ReminderRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn is_armed(&self, id: ReminderId) -> bool {
        self.timers.is_armed(id)
    }

    pub fn next_fire(&self, id: ReminderId) -> Option<NaiveDateTime> {
        self.timers.fire_at(id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.armed_count()
    }

    pub fn cancel_all(&self) {
        self.timers.cancel_all();
    }

    fn insert(self: &Arc<Self>, draft: ReminderDraft) -> Result<ReminderRecord, ReminderError> {
        draft.validate()?;
        let record = ReminderRecord {
            id: self.next_id(),
            title: draft.title,
            message: draft.message,
            kind: draft.kind,
            time: draft.time,
            icon: draft.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            active: true,
        };
        self.records.lock().push(record.clone());
        self.persist();
        self.arm(record.id, record.time, self.clock.now());
        info!(id = record.id, title = %record.title, time = %record.time, "reminder created");
        Ok(record)
    }

    /// Millisecond timestamp, bumped past the last issued id when needed.
    fn next_id(&self) -> ReminderId {
        let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let prev = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last.saturating_add(1)))
            })
            .unwrap_or(0);
        now_ms.max(prev.saturating_add(1))
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(error = %e, "failed to persist reminders");
        }
    }

    /// Arm the next occurrence of `time` strictly after `after`.
    fn arm(self: &Arc<Self>, id: ReminderId, time: TimeOfDay, after: NaiveDateTime) {
        let fire_at = next_occurrence(after, time);
        let ticket = self.timers.arm(id, fire_at);
        let delay = delay_until(self.clock.now(), fire_at);
        debug!(id, fire_at = %fire_at, delay_secs = delay.as_secs(), "reminder armed");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = ticket.token().cancelled() => return,
                _ = this.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            this.fire(ticket).await;
        });
    }

    async fn fire(self: Arc<Self>, ticket: TimerTicket) {
        if !self.timers.release(&ticket) {
            return;
        }
        // Read and re-arm under the records lock; `delete` cancels under the
        // same lock, so a deleted id is never left armed.
        let record = {
            let records = self.records.lock();
            let Some(record) = records.iter().find(|r| r.id == ticket.id).cloned() else {
                debug!(id = ticket.id, "reminder deleted before firing");
                return;
            };
            if !record.active {
                debug!(id = ticket.id, "reminder inactive, not fired");
                return;
            }
            let after = ticket.fire_at.max(self.clock.now());
            self.arm(record.id, record.time, after);
            record
        };

        info!(id = record.id, title = %record.title, "reminder fired");
        let request = NotificationRequest::new(record.title, record.message, record.kind);
        if let Err(e) = self.dispatcher.dispatch(request).await {
            warn!(id = record.id, error = %e, "reminder notification not delivered");
        }
    }

    fn confirm(&self, title: &'static str, body: String) {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            let request = NotificationRequest::new(title, body, Severity::Info);
            if let Err(e) = dispatcher.dispatch(request).await {
                debug!(error = %e, "reminder confirmation not delivered");
            }
        });
    }
}
