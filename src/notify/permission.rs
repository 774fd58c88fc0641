//! Notification permission state machine:
//! Unrequested → PermissionPending → Granted | Denied.
//! Denied is only left through an explicit re-request by the caller.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PermissionState {
    Unrequested,
    PermissionPending,
    Granted,
    Denied,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Unrequested => write!(f, "Unrequested"),
            PermissionState::PermissionPending => write!(f, "PermissionPending"),
            PermissionState::Granted => write!(f, "Granted"),
            PermissionState::Denied => write!(f, "Denied"),
        }
    }
}

/// Answer reported by the notification platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Prompt dismissed without a decision.
    Default,
}

impl PermissionState {
    /// Starting state given what the platform already knows.
    pub fn from_platform(current: Option<Permission>) -> Self {
        match current {
            Some(Permission::Granted) => PermissionState::Granted,
            Some(Permission::Denied) => PermissionState::Denied,
            Some(Permission::Default) | None => PermissionState::Unrequested,
        }
    }

    pub fn can_transition_to(self, next: PermissionState) -> bool {
        matches!(
            (self, next),
            (PermissionState::Unrequested, PermissionState::PermissionPending)
                | (PermissionState::PermissionPending, PermissionState::Granted)
                | (PermissionState::PermissionPending, PermissionState::Denied)
                | (PermissionState::PermissionPending, PermissionState::Unrequested) // dismissed
                // explicit re-request by the caller
                | (PermissionState::Denied, PermissionState::PermissionPending)
                | (PermissionState::Granted, PermissionState::PermissionPending)
        )
    }
}

pub struct PermissionTracker {
    state: RwLock<PermissionState>,
    state_tx: watch::Sender<PermissionState>,
}

impl PermissionTracker {
    pub fn new(initial: PermissionState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            state: RwLock::new(initial),
            state_tx,
        }
    }

    pub fn current(&self) -> PermissionState {
        *self.state.read()
    }

    pub fn transition(&self, next: PermissionState) -> Result<PermissionState, String> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            let msg = format!("invalid permission transition: {} -> {}", current, next);
            warn!("{}", msg);
            return Err(msg);
        }
        *state = next;
        self.state_tx.send_replace(next);
        info!(from = %current, to = %next, "permission_transition");
        Ok(next)
    }

    pub fn subscribe(&self) -> watch::Receiver<PermissionState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_mirrors_platform() {
        assert_eq!(
            PermissionState::from_platform(Some(Permission::Granted)),
            PermissionState::Granted
        );
        assert_eq!(
            PermissionState::from_platform(Some(Permission::Denied)),
            PermissionState::Denied
        );
        assert_eq!(PermissionState::from_platform(None), PermissionState::Unrequested);
    }

    #[test]
    fn test_denied_cannot_jump_to_granted() {
        let tracker = PermissionTracker::new(PermissionState::Denied);
        assert!(tracker.transition(PermissionState::Granted).is_err());
        assert_eq!(tracker.current(), PermissionState::Denied);

        tracker.transition(PermissionState::PermissionPending).unwrap();
        tracker.transition(PermissionState::Granted).unwrap();
        assert_eq!(tracker.current(), PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let tracker = PermissionTracker::new(PermissionState::Unrequested);
        let mut rx = tracker.subscribe();
        tracker.transition(PermissionState::PermissionPending).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), PermissionState::PermissionPending);
    }
}
