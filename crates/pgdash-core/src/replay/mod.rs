//! Session recording and playback.
//!
//! A recording is one zstd stream per session holding newline-separated JSON
//! records, one `ReplayFrame` per poll cycle:
//!
//! ```text
//! <replay_dir>/<endpoint_dir>/<YYYYmmdd_HHMMSS>.zst
//!   └── zstd( frame_0 "\n" frame_1 "\n" ... )
//! ```
//!
//! Session variables are redacted before a frame is serialized, so sensitive
//! values never reach the disk. Recorder and player both log and degrade on
//! I/O or format errors instead of failing the session.

pub mod frame;
pub mod player;
pub mod recorder;

pub use frame::{BUILTIN_REDACT_PATTERNS, Redactor, ReplayFrame};
pub use player::{ReplayLog, VariableChange};
pub use recorder::{ReplayRecorder, endpoint_dir_name};

/// File extension of recordings.
pub const REPLAY_EXTENSION: &str = "zst";

/// zstd level used for recordings.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Error type for recorder and player internals.
#[derive(Debug)]
pub enum ReplayError {
    Io(std::io::Error),
    Encode(serde_json::Error),
    /// Record number `line` (1-based) could not be parsed.
    Decode {
        line: usize,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Io(e) => write!(f, "replay I/O error: {}", e),
            ReplayError::Encode(e) => write!(f, "failed to encode replay frame: {}", e),
            ReplayError::Decode { line, source } => {
                write!(f, "invalid replay record {}: {}", line, source)
            }
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Io(e) => Some(e),
            ReplayError::Encode(e) => Some(e),
            ReplayError::Decode { source, .. } => Some(source),
        }
    }
}

impl From<std::io::Error> for ReplayError {
    fn from(e: std::io::Error) -> Self {
        ReplayError::Io(e)
    }
}
