//! Counterpart activity ("typing…", "recording…") per conversation.

use cadence_core::ConversationKey;
use std::collections::HashMap;
use tokio::time::Instant;

/// Raw chat-state signal from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceSignal {
    Typing,
    Recording,
    Composing,
    Paused,
    Available,
}

impl PresenceSignal {
    /// Unknown states are treated as `Available`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "typing" => PresenceSignal::Typing,
            "recording" => PresenceSignal::Recording,
            "composing" => PresenceSignal::Composing,
            "paused" => PresenceSignal::Paused,
            _ => PresenceSignal::Available,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            PresenceSignal::Typing | PresenceSignal::Recording | PresenceSignal::Composing
        )
    }
}

impl From<&str> for PresenceSignal {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivityState {
    pub is_typing: bool,
    pub is_recording: bool,
    pub last_activity_at: Option<Instant>,
}

impl ActivityState {
    pub fn is_active(&self) -> bool {
        self.is_typing || self.is_recording
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityTransition {
    /// inactive → active
    Started,
    /// active → inactive
    Stopped,
    Unchanged,
}

/// Pure state: no timers, no I/O. Owned by the scheduler actor.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    states: HashMap<ConversationKey, ActivityState>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &mut self,
        conversation: &ConversationKey,
        signal: PresenceSignal,
        now: Instant,
    ) -> ActivityTransition {
        let state = self.states.entry(conversation.clone()).or_default();
        let was_active = state.is_active();

        state.is_typing = matches!(signal, PresenceSignal::Typing | PresenceSignal::Composing);
        state.is_recording = signal == PresenceSignal::Recording;
        if signal.is_active() {
            state.last_activity_at = Some(now);
        }

        match (was_active, signal.is_active()) {
            (false, true) => ActivityTransition::Started,
            (true, false) => ActivityTransition::Stopped,
            _ => ActivityTransition::Unchanged,
        }
    }

    pub fn is_active(&self, conversation: &ConversationKey) -> bool {
        self.states
            .get(conversation)
            .map(ActivityState::is_active)
            .unwrap_or(false)
    }

    pub fn state(&self, conversation: &ConversationKey) -> Option<&ActivityState> {
        self.states.get(conversation)
    }

    pub fn active_count(&self) -> usize {
        self.states.values().filter(|s| s.is_active()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_signal_is_available() {
        assert_eq!(PresenceSignal::parse("online"), PresenceSignal::Available);
        assert_eq!(PresenceSignal::parse(""), PresenceSignal::Available);
        assert_eq!(PresenceSignal::parse(" Typing "), PresenceSignal::Typing);
        assert!(PresenceSignal::Composing.is_active());
        assert!(!PresenceSignal::Paused.is_active());
    }

    #[test]
    fn test_transitions() {
        let mut tracker = ActivityTracker::new();
        let key = ConversationKey::new("a");
        let now = Instant::now();

        assert!(!tracker.is_active(&key));
        assert_eq!(
            tracker.update(&key, PresenceSignal::Typing, now),
            ActivityTransition::Started
        );
        assert_eq!(
            tracker.update(&key, PresenceSignal::Recording, now),
            ActivityTransition::Unchanged
        );
        assert!(tracker.state(&key).unwrap().is_recording);
        assert!(!tracker.state(&key).unwrap().is_typing);
        assert_eq!(
            tracker.update(&key, PresenceSignal::Paused, now),
            ActivityTransition::Stopped
        );
        assert_eq!(
            tracker.update(&key, PresenceSignal::Available, now),
            ActivityTransition::Unchanged
        );
    }

    #[test]
    fn test_last_activity_only_moves_when_active() {
        let mut tracker = ActivityTracker::new();
        let key = ConversationKey::new("a");
        let first = Instant::now();
        tracker.update(&key, PresenceSignal::Composing, first);
        tracker.update(&key, PresenceSignal::Available, first + std::time::Duration::from_secs(5));
        assert_eq!(tracker.state(&key).unwrap().last_activity_at, Some(first));
        assert!(!tracker.state(&key).unwrap().is_typing);
    }

    #[test]
    fn test_active_count() {
        let mut tracker = ActivityTracker::new();
        let now = Instant::now();
        tracker.update(&"a".into(), PresenceSignal::Typing, now);
        tracker.update(&"b".into(), PresenceSignal::Recording, now);
        tracker.update(&"c".into(), PresenceSignal::Available, now);
        assert_eq!(tracker.active_count(), 2);
    }
}
