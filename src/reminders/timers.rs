//! Reminder id → armed one-shot timer.
//! Each arm gets a fresh cancellation token and generation; a firing timer
//! must still own the current generation before it may act.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::ReminderId;

struct ArmedTimer {
    token: CancellationToken,
    generation: u64,
    fire_at: NaiveDateTime,
}

/// Handed to the timer task that was armed.
#[derive(Clone)]
pub struct TimerTicket {
    pub id: ReminderId,
    pub generation: u64,
    pub fire_at: NaiveDateTime,
    token: CancellationToken,
}

impl TimerTicket {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<ReminderId, ArmedTimer>>,
    generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer for `id`, cancelling any timer already armed for it.
    pub fn arm(&self, id: ReminderId, fire_at: NaiveDateTime) -> TimerTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let previous = self.timers.lock().insert(
            id,
            ArmedTimer {
                token: token.clone(),
                generation,
                fire_at,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        TimerTicket {
            id,
            generation,
            fire_at,
            token,
        }
    }

    pub fn cancel(&self, id: ReminderId) -> bool {
        match self.timers.lock().remove(&id) {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the entry if `ticket` still owns it. A `false` return means
    /// the timer was cancelled or re-armed and the caller must not fire.
    pub fn release(&self, ticket: &TimerTicket) -> bool {
        let mut timers = self.timers.lock();
        match timers.get(&ticket.id) {
            Some(timer) if timer.generation == ticket.generation => {
                timers.remove(&ticket.id);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, id: ReminderId) -> bool {
        self.timers.lock().contains_key(&id)
    }

    pub fn fire_at(&self, id: ReminderId) -> Option<NaiveDateTime> {
        self.timers.lock().get(&id).map(|t| t.fire_at)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn cancel_all(&self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_rearm_cancels_previous() {
        let registry = TimerRegistry::new();
        let first = registry.arm(1, t(9));
        let second = registry.arm(1, t(10));

        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());
        assert_eq!(registry.armed_count(), 1);
        assert_eq!(registry.fire_at(1), Some(t(10)));

        assert!(!registry.release(&first));
        assert!(registry.release(&second));
        assert!(!registry.is_armed(1));
    }

    #[test]
    fn test_cancel() {
        let registry = TimerRegistry::new();
        let ticket = registry.arm(7, t(9));
        assert!(registry.cancel(7));
        assert!(ticket.token().is_cancelled());
        assert!(!registry.cancel(7));
        assert!(!registry.release(&ticket));
    }

    #[test]
    fn test_cancel_all() {
        let registry = TimerRegistry::new();
        let a = registry.arm(1, t(9));
        let b = registry.arm(2, t(9));
        registry.cancel_all();
        assert!(a.token().is_cancelled() && b.token().is_cancelled());
        assert_eq!(registry.armed_count(), 0);
    }
}
