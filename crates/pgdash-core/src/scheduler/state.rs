//! Session lifecycle state machine.
//!
//! ```text
//! Disconnected ──Connect──► Connecting ──Connected──► Connected ◄──Resume── Paused
//!      ▲                        │                        │                    ▲
//!      └──────ConnectFailed─────┘                        └───────Pause────────┘
//!
//! any ──Cancel──► Cancelled (terminal)
//! ```

/// Lifecycle state of a monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Connected,
    /// Scheduling suspended; the connection and all history are kept.
    Paused,
    /// Terminal, by user action or unrecoverable error.
    Cancelled,
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connect,
    Connected,
    ConnectFailed,
    Pause,
    Resume,
    Cancel,
}

impl WorkerState {
    /// Next state for `transition`. Transitions that make no sense in the
    /// current state leave it unchanged.
    pub fn apply(self, transition: Transition) -> WorkerState {
        use Transition as T;
        use WorkerState as S;
        match (self, transition) {
            (S::Cancelled, _) => S::Cancelled,
            (_, T::Cancel) => S::Cancelled,
            (S::Disconnected, T::Connect) => S::Connecting,
            (S::Connecting, T::Connected) => S::Connected,
            (S::Connecting, T::ConnectFailed) => S::Disconnected,
            (S::Connected, T::Pause) => S::Paused,
            (S::Paused, T::Resume) => S::Connected,
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerState::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Disconnected => "disconnected",
            WorkerState::Connecting => "connecting",
            WorkerState::Connected => "connected",
            WorkerState::Paused => "paused",
            WorkerState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let s = WorkerState::Disconnected
            .apply(Transition::Connect)
            .apply(Transition::Connected);
        assert_eq!(s, WorkerState::Connected);
        let paused = s.apply(Transition::Pause);
        assert_eq!(paused, WorkerState::Paused);
        assert_eq!(paused.apply(Transition::Resume), WorkerState::Connected);
    }

    #[test]
    fn failed_connect_returns_to_disconnected() {
        let s = WorkerState::Disconnected
            .apply(Transition::Connect)
            .apply(Transition::ConnectFailed);
        assert_eq!(s, WorkerState::Disconnected);
    }

    #[test]
    fn cancelled_is_terminal() {
        for start in [
            WorkerState::Disconnected,
            WorkerState::Connecting,
            WorkerState::Connected,
            WorkerState::Paused,
        ] {
            let s = start.apply(Transition::Cancel);
            assert!(s.is_terminal());
            assert_eq!(s.apply(Transition::Resume), WorkerState::Cancelled);
            assert_eq!(s.apply(Transition::Connect), WorkerState::Cancelled);
        }
    }

    #[test]
    fn invalid_transitions_are_ignored() {
        assert_eq!(WorkerState::Disconnected.apply(Transition::Pause), WorkerState::Disconnected);
        assert_eq!(WorkerState::Connected.apply(Transition::Resume), WorkerState::Connected);
        assert_eq!(WorkerState::Connecting.apply(Transition::Pause), WorkerState::Connecting);
    }
}
