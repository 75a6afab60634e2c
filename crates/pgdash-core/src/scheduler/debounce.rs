//! Per-action rate limiting of user-triggered operations.
//!
//! A repeat of the same action inside its minimum gap is dropped. The poll
//! tick is never debounced.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum gap for actions without a specific rule.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Kind of user-triggered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Advance replay by one frame.
    ReplayStep,
    /// Start polling a session.
    StartSession,
    /// Remove a session.
    RemoveSession,
    /// Ad-hoc command on the secondary connection.
    Command,
}

impl ActionKind {
    pub fn min_gap(self) -> Duration {
        match self {
            ActionKind::ReplayStep => Duration::from_millis(100),
            ActionKind::StartSession | ActionKind::RemoveSession => Duration::from_millis(300),
            ActionKind::Command => DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Default)]
pub struct Debouncer {
    last_accepted: HashMap<ActionKind, Instant>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, kind: ActionKind) -> bool {
        self.allow_at(kind, Instant::now())
    }

    /// Accepts `kind` at `now` unless the last accepted one is too recent.
    /// Dropped invocations do not extend the gap.
    pub fn allow_at(&mut self, kind: ActionKind, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(&kind)
            && now.saturating_duration_since(*last) < kind.min_gap()
        {
            return false;
        }
        self.last_accepted.insert(kind, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_inside_gap_is_dropped() {
        let mut d = Debouncer::new();
        let t0 = Instant::now();
        assert!(d.allow_at(ActionKind::ReplayStep, t0));
        assert!(!d.allow_at(ActionKind::ReplayStep, t0 + Duration::from_millis(99)));
        assert!(d.allow_at(ActionKind::ReplayStep, t0 + Duration::from_millis(100)));
    }

    #[test]
    fn dropped_calls_do_not_extend_gap() {
        let mut d = Debouncer::new();
        let t0 = Instant::now();
        assert!(d.allow_at(ActionKind::Command, t0));
        assert!(!d.allow_at(ActionKind::Command, t0 + Duration::from_millis(40)));
        assert!(d.allow_at(ActionKind::Command, t0 + Duration::from_millis(55)));
    }

    #[test]
    fn kinds_are_independent() {
        let mut d = Debouncer::new();
        let t0 = Instant::now();
        assert!(d.allow_at(ActionKind::RemoveSession, t0));
        assert!(d.allow_at(ActionKind::StartSession, t0));
        assert!(!d.allow_at(ActionKind::RemoveSession, t0 + Duration::from_millis(200)));
    }

    #[test]
    fn destructive_actions_have_longer_gaps() {
        assert!(ActionKind::RemoveSession.min_gap() > ActionKind::ReplayStep.min_gap());
        assert!(ActionKind::ReplayStep.min_gap() > ActionKind::Command.min_gap());
    }
}
