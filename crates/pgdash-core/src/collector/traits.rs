//! Abstractions over everything a session reads from: the monitored endpoint
//! (`DataSource`) and the local filesystem (`FileSystem`).

use std::io;
use std::path::{Path, PathBuf};

use crate::snapshot::{Category, PollSnapshot, RawFields};

/// Error returned by a data source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The connection is down or could not be established.
    Connection(String),
    /// The server refused a query for lack of privileges.
    Privilege {
        query: String,
        code: String,
        message: String,
    },
    /// The server rejected a query for any other reason.
    Query {
        query: String,
        code: String,
        message: String,
    },
    /// The connection already has an operation in flight.
    Busy,
}

impl SourceError {
    /// Transient errors are worth a reconnect.
    pub fn is_connection(&self) -> bool {
        matches!(self, SourceError::Connection(_))
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Connection(msg) => write!(f, "connection error: {}", msg),
            SourceError::Privilege { code, message, .. } => {
                write!(f, "permission denied ({}): {}", code, message)
            }
            SourceError::Query { code, message, .. } => {
                write!(f, "query error ({}): {}", code, message)
            }
            SourceError::Busy => write!(f, "connection busy"),
        }
    }
}

impl std::error::Error for SourceError {}

/// A one-off, user-triggered operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdHocCommand {
    /// `pg_terminate_backend(pid)`.
    TerminateBackend(i32),
    /// `pg_cancel_backend(pid)`.
    CancelBackend(i32),
    /// Arbitrary read-only diagnostic query.
    Query(String),
}

impl std::fmt::Display for AdHocCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdHocCommand::TerminateBackend(pid) => write!(f, "terminate backend {}", pid),
            AdHocCommand::CancelBackend(pid) => write!(f, "cancel backend {}", pid),
            AdHocCommand::Query(sql) => write!(f, "query `{}`", sql),
        }
    }
}

/// Result of an ad-hoc command.
#[derive(Debug, Clone, PartialEq)]
pub enum AdHocOutput {
    /// Rows returned by a query.
    Rows(Vec<RawFields>),
    /// Boolean outcome of a backend signal.
    Done(bool),
}

/// The endpoint a session polls.
///
/// Implementations own exactly one connection. The scheduler gives the poll
/// cycle one instance and ad-hoc commands another, so no implementation has
/// to handle concurrent calls.
pub trait DataSource: Send {
    /// Opens the connection. Calling it while connected is a no-op.
    fn connect(&mut self) -> Result<(), SourceError>;

    fn is_connected(&self) -> bool;

    fn close(&mut self);

    /// Fetches whatever subset of `categories` the source can supply.
    ///
    /// Categories the source does not serve are absent from the result.
    /// Privilege failures on individual queries are reported in
    /// `PollSnapshot::denied`; only a lost connection or an unexpected server
    /// error fails the whole call.
    fn fetch_snapshot(&mut self, categories: &[Category]) -> Result<PollSnapshot, SourceError>;

    fn run_ad_hoc(&mut self, command: &AdHocCommand) -> Result<AdHocOutput, SourceError>;

    /// Short human-readable identity, used in logs.
    fn describe(&self) -> String;
}

impl<T: DataSource + ?Sized> DataSource for Box<T> {
    fn connect(&mut self) -> Result<(), SourceError> {
        (**self).connect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn fetch_snapshot(&mut self, categories: &[Category]) -> Result<PollSnapshot, SourceError> {
        (**self).fetch_snapshot(categories)
    }

    fn run_ad_hoc(&mut self, command: &AdHocCommand) -> Result<AdHocOutput, SourceError> {
        (**self).run_ad_hoc(command)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Abstraction for filesystem operations.
///
/// Lets the system sampler read from the real `/proc` or from an in-memory
/// mock in tests.
pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn exists(&self, path: &Path) -> bool;

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_fs_reads_written_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stat");
        std::fs::write(&path, "cpu 1 2 3\n").unwrap();

        let fs = RealFs::new();
        assert!(fs.exists(&path));
        assert_eq!(fs.read_to_string(&path).unwrap(), "cpu 1 2 3\n");
        assert_eq!(fs.read_dir(dir.path()).unwrap(), vec![path]);
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }

    #[test]
    fn only_connection_errors_are_transient() {
        assert!(SourceError::Connection("reset".into()).is_connection());
        assert!(!SourceError::Busy.is_connection());
        assert!(
            !SourceError::Privilege {
                query: "q".into(),
                code: "42501".into(),
                message: "denied".into(),
            }
            .is_connection()
        );
    }
}
