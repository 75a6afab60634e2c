//! Provider abstraction for dashboard state.
//!
//! The renderer works against `StateProvider` and does not care whether the
//! view comes from a live session or from a recording.

mod live;
mod replay;

pub use live::LiveProvider;
pub use replay::ReplayProvider;

use std::any::Any;
use std::sync::Arc;

use crate::view::SessionView;

/// Error types that can occur while producing a view.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// I/O error while reading a recording.
    Io(String),
    /// The live session stopped with an error.
    Session(String),
    /// Recorded data could not be used.
    Parse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Io(msg) => write!(f, "I/O error: {}", msg),
            ProviderError::Session(msg) => write!(f, "Session error: {}", msg),
            ProviderError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Source of materialized views for the renderer.
///
/// Object-safe, meant to be used as `Box<dyn StateProvider>`.
pub trait StateProvider {
    /// The view shown right now, if any.
    fn current(&self) -> Option<Arc<SessionView>>;

    /// Moves to the next view.
    ///
    /// - Live: picks up whatever the poller published last
    /// - Replay: delivers the next recorded frame
    ///
    /// Returns `None` when nothing new is available (end of recording, or
    /// the session has not completed a cycle yet).
    fn advance(&mut self) -> Option<Arc<SessionView>>;

    fn is_live(&self) -> bool;

    /// Returns the last error that occurred, if any.
    fn last_error(&self) -> Option<&ProviderError>;

    /// Returns self as Any for downcasting.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }

    /// Returns self as Any for mutable downcasting.
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
}
