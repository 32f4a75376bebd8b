//! Avatar session state machine.
//!
//! Enforces valid state transitions for the avatar lifecycle:
//! - Absent -> Initializing (user starts a session)
//! - Initializing -> Active (media stream signalled ready)
//! - Initializing -> Absent (start failed or ready never arrived)
//! - Active -> Absent (user stopped, or the stream disconnected)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::error::AvatarError;

/// Lifecycle state of the avatar session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarState {
    /// No session exists.
    #[default]
    Absent,
    /// Token acquired or being acquired, waiting for the media stream.
    Initializing,
    /// Media stream is live; chat answers are spoken.
    Active,
}

impl fmt::Display for AvatarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvatarState::Absent => write!(f, "absent"),
            AvatarState::Initializing => write!(f, "initializing"),
            AvatarState::Active => write!(f, "active"),
        }
    }
}

impl AvatarState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &AvatarState) -> bool {
        matches!(
            (self, target),
            (AvatarState::Absent, AvatarState::Initializing)
                | (AvatarState::Initializing, AvatarState::Active)
                | (AvatarState::Initializing, AvatarState::Absent)
                | (AvatarState::Active, AvatarState::Absent)
        )
    }
}

/// A state change, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: AvatarState,
    pub to: AvatarState,
    pub at: DateTime<Utc>,
}

/// State machine owned by the session actor.
///
/// The actor is the only writer. Readers observe the current state through a
/// `watch` channel and the sequence of changes through a `broadcast` channel.
#[derive(Debug)]
pub struct StateMachine {
    current: AvatarState,
    state_tx: watch::Sender<AvatarState>,
    transition_tx: broadcast::Sender<Transition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine initialized to `Absent`.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(AvatarState::Absent);
        let (transition_tx, _) = broadcast::channel(64);
        Self {
            current: AvatarState::Absent,
            state_tx,
            transition_tx,
        }
    }

    pub fn current(&self) -> AvatarState {
        self.current
    }

    pub fn watch(&self) -> watch::Receiver<AvatarState> {
        self.state_tx.subscribe()
    }

    /// Sender side of the transition feed, for handing out new receivers.
    pub fn transitions(&self) -> broadcast::Sender<Transition> {
        self.transition_tx.clone()
    }

    /// Attempt to transition to the target state.
    pub fn transition(&mut self, target: AvatarState) -> Result<(), AvatarError> {
        if !self.current.can_transition_to(&target) {
            return Err(AvatarError::InvalidTransition(self.current, target));
        }

        tracing::debug!("Avatar state: {} -> {}", self.current, target);
        let change = Transition {
            from: self.current,
            to: target,
            at: Utc::now(),
        };
        self.current = target;
        self.state_tx.send_replace(target);
        // No subscribers is fine.
        let _ = self.transition_tx.send(change);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(AvatarState::Absent.to_string(), "absent");
        assert_eq!(AvatarState::Initializing.to_string(), "initializing");
        assert_eq!(AvatarState::Active.to_string(), "active");
    }

    #[test]
    fn test_valid_transitions() {
        assert!(AvatarState::Absent.can_transition_to(&AvatarState::Initializing));
        assert!(AvatarState::Initializing.can_transition_to(&AvatarState::Active));
        assert!(AvatarState::Initializing.can_transition_to(&AvatarState::Absent));
        assert!(AvatarState::Active.can_transition_to(&AvatarState::Absent));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!AvatarState::Absent.can_transition_to(&AvatarState::Active));
        assert!(!AvatarState::Active.can_transition_to(&AvatarState::Initializing));

        assert!(!AvatarState::Absent.can_transition_to(&AvatarState::Absent));
        assert!(!AvatarState::Initializing.can_transition_to(&AvatarState::Initializing));
        assert!(!AvatarState::Active.can_transition_to(&AvatarState::Active));
    }

    #[test]
    fn test_all_valid_transitions_count() {
        let all = [
            AvatarState::Absent,
            AvatarState::Initializing,
            AvatarState::Active,
        ];
        let valid = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (from, to)))
            .filter(|(from, to)| from.can_transition_to(to))
            .count();
        assert_eq!(valid, 4);
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut sm = StateMachine::new();
        let watcher = sm.watch();
        let mut feed = sm.transitions().subscribe();

        sm.transition(AvatarState::Initializing).unwrap();
        sm.transition(AvatarState::Active).unwrap();
        sm.transition(AvatarState::Absent).unwrap();

        assert_eq!(sm.current(), AvatarState::Absent);
        assert_eq!(*watcher.borrow(), AvatarState::Absent);

        let seen: Vec<(AvatarState, AvatarState)> = (0..3)
            .map(|_| {
                let t = feed.try_recv().unwrap();
                (t.from, t.to)
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                (AvatarState::Absent, AvatarState::Initializing),
                (AvatarState::Initializing, AvatarState::Active),
                (AvatarState::Active, AvatarState::Absent),
            ]
        );
    }

    #[test]
    fn test_state_machine_invalid_transition_keeps_state() {
        let mut sm = StateMachine::new();
        let err = sm.transition(AvatarState::Active).unwrap_err();
        match err {
            AvatarError::InvalidTransition(from, to) => {
                assert_eq!(from, AvatarState::Absent);
                assert_eq!(to, AvatarState::Active);
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        assert_eq!(sm.current(), AvatarState::Absent);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AvatarState::Initializing).unwrap(),
            "\"initializing\""
        );
    }
}
