//! Errors that cross the scheduler boundary.
//!
//! Recoverable conditions (transient connectivity, privilege denials, bad
//! sample data) are handled inside the scheduler and metric store and never
//! show up here. `SessionError` is the narrow set of conditions that end a
//! session; `AdHocError` is what a user-triggered command can report back.

use crate::collector::SourceError;
use crate::config::Endpoint;

/// Unrecoverable session failure, attached to the session when it stops.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The initial connection could not be established.
    ConnectFailed(String),
    /// The connection was lost and every reconnect attempt failed.
    ReconnectExhausted { attempts: u32, last_error: String },
    /// The source reported an error that retrying cannot fix.
    Fatal(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::ConnectFailed(msg) => write!(f, "connection failed: {}", msg),
            SessionError::ReconnectExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "failed to reconnect after {} attempts: {}",
                attempts, last_error
            ),
            SessionError::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Why an ad-hoc command did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub enum AdHocError {
    /// Another command is still running on the same connection.
    Busy,
    /// Repeated too quickly; dropped.
    Debounced,
    /// The session has no secondary connection for commands.
    Unavailable,
    /// The command ran and failed.
    Source(SourceError),
}

impl std::fmt::Display for AdHocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdHocError::Busy => {
                write!(f, "there's already a command running - please wait for it to finish")
            }
            AdHocError::Debounced => write!(f, "command ignored: repeated too quickly"),
            AdHocError::Unavailable => write!(f, "no command connection available"),
            AdHocError::Source(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AdHocError {}

impl From<SourceError> for AdHocError {
    fn from(e: SourceError) -> Self {
        AdHocError::Source(e)
    }
}

/// Why a session could not be added to or removed from a `SessionSet`.
#[derive(Debug)]
pub enum SessionSetError {
    /// Repeated too quickly; dropped.
    Debounced,
    /// A session for this endpoint is already running.
    AlreadyMonitored(Endpoint),
    NotMonitored(Endpoint),
    /// The session's poll thread could not be started.
    Spawn(SessionError),
}

impl std::fmt::Display for SessionSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionSetError::Debounced => write!(f, "ignored: repeated too quickly"),
            SessionSetError::AlreadyMonitored(endpoint) => {
                write!(f, "{} is already being monitored", endpoint)
            }
            SessionSetError::NotMonitored(endpoint) => write!(f, "{} is not being monitored", endpoint),
            SessionSetError::Spawn(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionSetError {}
