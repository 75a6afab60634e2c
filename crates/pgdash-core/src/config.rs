//! Session configuration.
//!
//! Plain data: the binary maps its CLI flags onto `MonitorConfig`, the core
//! never parses flags or files itself.

use std::path::PathBuf;
use std::time::Duration;

/// Default PostgreSQL port. Omitted from recording directory names.
pub const DEFAULT_PG_PORT: u16 = 5432;

/// Default PgBouncer port.
pub const DEFAULT_PGBOUNCER_PORT: u16 = 6432;

/// Default eviction window for unattended sessions.
pub const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Reconnect attempts before an interactive session gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Address of the monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Port considered "default" for this kind of endpoint.
    pub default_port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, default_port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            default_port,
        }
    }

    pub fn postgres(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, DEFAULT_PG_PORT)
    }

    pub fn pgbouncer(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, DEFAULT_PGBOUNCER_PORT)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a monitoring session needs to know about how to run.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between the end of one poll cycle and the start of the next.
    pub poll_interval: Duration,
    /// Record every cycle to a replay file.
    pub record: bool,
    /// Root directory for recordings.
    pub replay_dir: PathBuf,
    /// Unattended mode: unbounded reconnects and history eviction.
    pub daemon: bool,
    /// How much history an unattended session keeps.
    pub history_window: Duration,
    /// Extra session-variable name patterns to redact from recordings.
    pub redact_patterns: Vec<String>,
    /// Reconnect attempts before giving up. Ignored in daemon mode.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubles on every failed attempt.
    pub backoff_base: Duration,
    /// Upper bound for the reconnect delay.
    pub backoff_cap: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            record: false,
            replay_dir: PathBuf::from("./replays"),
            daemon: false,
            history_window: DEFAULT_HISTORY_WINDOW,
            redact_patterns: Vec::new(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(20),
        }
    }
}

impl MonitorConfig {
    /// Reconnect attempt limit, `None` meaning unbounded.
    pub fn reconnect_limit(&self) -> Option<u32> {
        if self.daemon {
            None
        } else {
            Some(self.max_reconnect_attempts)
        }
    }
}
