use crate::server::ServerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::watch;

const MAX_EVENTS: usize = 100;

/// State of the supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// No child process
    Stopped,
    /// Child is being spawned
    Starting,
    /// Child is live
    Running,
    /// Shutdown requested, waiting for exit
    Stopping,
}

impl ServerState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Running -> Stopped` is the crash path observed by the reaper.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Stopping, Stopped)
        )
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the supervisor, published to readers without locking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    /// Current state
    pub state: ServerState,
    /// Instance id of the live child, if any
    pub server_id: Option<ServerId>,
    /// OS process id of the live child, if any
    pub pid: Option<u32>,
    /// When the live child was spawned
    pub started_at: Option<Instant>,
}

impl StateSnapshot {
    fn stopped() -> Self {
        Self {
            state: ServerState::Stopped,
            server_id: None,
            pid: None,
            started_at: None,
        }
    }
}

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerLifecycleEvent {
    /// Child spawned and running
    Started,
    /// Spawn failed
    StartFailed,
    /// Child exited after a stop request
    Stopped,
    /// Child ignored the stop request and was killed
    Killed,
    /// Child exited without a stop request
    Crashed,
}

/// Server lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Instance id, absent when no child was spawned
    pub server_id: Option<ServerId>,
    /// Event type
    pub event: ServerLifecycleEvent,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event details
    pub details: Option<String>,
}

/// Published supervisor state plus a bounded journal of lifecycle events.
///
/// Writers are the supervisor (under its state lock) and the reaper task of
/// the live child; readers subscribe through a `watch` channel and never
/// block writers.
pub(crate) struct StateCell {
    tx: watch::Sender<StateSnapshot>,
    events: Mutex<VecDeque<LifecycleEvent>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(StateSnapshot::stopped());
        Self {
            tx,
            events: Mutex::new(VecDeque::with_capacity(MAX_EVENTS)),
        }
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.tx.subscribe()
    }

    pub(crate) fn set_starting(&self) {
        self.transition(StateSnapshot {
            state: ServerState::Starting,
            ..StateSnapshot::stopped()
        });
    }

    pub(crate) fn set_running(&self, server_id: ServerId, pid: u32, started_at: Instant) {
        self.transition(StateSnapshot {
            state: ServerState::Running,
            server_id: Some(server_id),
            pid: Some(pid),
            started_at: Some(started_at),
        });
    }

    /// Moves the live child `server_id` to `Stopping`.
    ///
    /// Returns `false` if the reaper already observed its exit.
    pub(crate) fn set_stopping(&self, server_id: ServerId) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state == ServerState::Running && snapshot.server_id == Some(server_id) {
                snapshot.state = ServerState::Stopping;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn set_stopped(&self) {
        self.transition(StateSnapshot::stopped());
    }

    /// Flips `Running` to `Stopped` if `server_id` is still the live child.
    ///
    /// Returns `true` when the flip happened, i.e. the exit was not requested.
    pub(crate) fn mark_exited(&self, server_id: ServerId) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state == ServerState::Running && snapshot.server_id == Some(server_id) {
                *snapshot = StateSnapshot::stopped();
                true
            } else {
                false
            }
        })
    }

    fn transition(&self, next: StateSnapshot) {
        self.tx.send_modify(|snapshot| {
            if snapshot.state != next.state && !snapshot.state.can_transition_to(next.state) {
                tracing::warn!(from = %snapshot.state, to = %next.state, "Unexpected state transition");
            }
            *snapshot = next;
        });
    }

    /// Record a server event
    pub(crate) fn record_event(
        &self,
        server_id: Option<ServerId>,
        event: ServerLifecycleEvent,
        details: Option<String>,
    ) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(LifecycleEvent {
            server_id,
            event,
            timestamp: Utc::now(),
            details,
        });
    }

    /// Recent events, newest first.
    pub(crate) fn events(&self, limit: Option<usize>) -> Vec<LifecycleEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let limit = limit.unwrap_or(events.len());
        events.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use ServerState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Starting.can_transition_to(Stopping));
    }

    #[test]
    fn test_mark_exited_ignores_other_generation() {
        let cell = StateCell::new();
        let live = ServerId::new();
        let stale = ServerId::new();
        cell.set_starting();
        cell.set_running(live, 42, Instant::now());

        assert!(!cell.mark_exited(stale));
        assert!(!cell.set_stopping(stale));
        assert_eq!(cell.snapshot().state, ServerState::Running);

        assert!(cell.mark_exited(live));
        assert_eq!(cell.snapshot().state, ServerState::Stopped);
        assert!(!cell.mark_exited(live));
    }

    #[test]
    fn test_event_journal_is_bounded() {
        let cell = StateCell::new();
        for i in 0..(MAX_EVENTS + 5) {
            cell.record_event(None, ServerLifecycleEvent::StartFailed, Some(i.to_string()));
        }
        let events = cell.events(None);
        assert_eq!(events.len(), MAX_EVENTS);
        assert_eq!(events[0].details.as_deref(), Some("104"));
        assert_eq!(cell.events(Some(3)).len(), 3);
    }
}
