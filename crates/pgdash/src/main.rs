//! pgdash - PostgreSQL / PgBouncer monitoring dashboard.
//!
//! Polls one endpoint on a fixed interval, keeps metric history in memory and
//! optionally records every cycle for later replay. `--replay FILE` steps
//! through a recording instead of connecting anywhere, one frame per interval
//! or, with `--step`, one frame per line on stdin.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgdash_core::collector::{
    CompositeSource, ConnParams, DataSource, PgBouncerSource, PostgresSource, RealFs,
    SystemSampler,
};
use pgdash_core::config::{DEFAULT_PGBOUNCER_PORT, DEFAULT_PG_PORT, Endpoint, MonitorConfig};
use pgdash_core::metrics::SessionContext;
use pgdash_core::provider::{LiveProvider, ReplayProvider, StateProvider};
use pgdash_core::scheduler::{ActionKind, Debouncer, SessionEvent, SessionHandle, SessionSetup};
use pgdash_core::view::SessionView;

/// PostgreSQL / PgBouncer monitoring dashboard.
#[derive(Parser)]
#[command(name = "pgdash", about = "PostgreSQL and PgBouncer monitoring dashboard", version)]
struct Args {
    /// Server host.
    #[arg(long, env = "PGHOST", default_value = "localhost")]
    host: String,

    /// Server port (default: 5432, or 6432 with --pgbouncer).
    #[arg(short, long, env = "PGPORT")]
    port: Option<u16>,

    /// User name. Falls back to $USER.
    #[arg(short = 'U', long, env = "PGUSER")]
    user: Option<String>,

    /// Database name. Falls back to the user name.
    #[arg(short, long, env = "PGDATABASE")]
    database: Option<String>,

    /// Monitor a PgBouncer admin console instead of PostgreSQL.
    #[arg(long)]
    pgbouncer: bool,

    /// Poll interval in seconds.
    #[arg(short, long, default_value = "1")]
    interval: u64,

    /// Record every poll cycle for later replay.
    #[arg(long)]
    record: bool,

    /// Root directory for recordings.
    #[arg(long, default_value = "./replays")]
    replay_dir: PathBuf,

    /// Replay a recording instead of connecting.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["record", "daemon"])]
    replay: Option<PathBuf>,

    /// With --replay: advance one frame per line read from stdin.
    #[arg(long, requires = "replay")]
    step: bool,

    /// Unattended mode: reconnect forever and keep a bounded history.
    #[arg(long)]
    daemon: bool,

    /// History kept in daemon mode, in minutes.
    #[arg(long, default_value = "10")]
    history_minutes: u64,

    /// Extra session-variable name fragment to keep out of recordings.
    /// May be repeated.
    #[arg(long, value_name = "PATTERN")]
    redact: Vec<String>,

    /// Reconnect attempts before giving up (ignored with --daemon).
    #[arg(long, default_value = "3")]
    max_reconnect_attempts: u32,

    /// Do not sample local CPU, memory, disk and network counters.
    #[arg(long)]
    no_system: bool,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn context(&self) -> SessionContext {
        if self.pgbouncer {
            SessionContext::PgBouncer
        } else {
            SessionContext::Postgres
        }
    }

    fn conn_params(&self) -> ConnParams {
        let env = ConnParams::from_env();
        let user = self.user.clone().unwrap_or(env.user);
        ConnParams {
            host: self.host.clone(),
            port: self.port.unwrap_or(if self.pgbouncer {
                DEFAULT_PGBOUNCER_PORT
            } else {
                DEFAULT_PG_PORT
            }),
            database: self.database.clone().unwrap_or_else(|| user.clone()),
            user,
            password: env.password,
        }
    }

    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.interval.max(1)),
            record: self.record,
            replay_dir: self.replay_dir.clone(),
            daemon: self.daemon,
            history_window: Duration::from_secs(self.history_minutes.max(1) * 60),
            redact_patterns: self.redact.clone(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            ..MonitorConfig::default()
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pgdash", "pgdash_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Formats bytes as human-readable size string.
fn format_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Headline series shown in the per-cycle log line.
const HEADLINE: [(&str, &str); 7] = [
    ("cpu", "system_cpu.CPU_Percent"),
    ("commits/s", "pg_transactions.xact_commit"),
    ("active", "pg_connections.active"),
    ("hit%", "pg_cache_hit_ratio.cache_hit_ratio"),
    ("lag", "replication_lag.lag"),
    ("clients", "pgbouncer_connections.cl_active"),
    ("queries/s", "pgbouncer_traffic.query_count"),
];

/// Describes a view for logging.
fn describe_view(view: &SessionView) -> String {
    let mut parts: Vec<String> = HEADLINE
        .iter()
        .filter_map(|(label, series)| view.latest(series).map(|v| format!("{}={}", label, v)))
        .collect();
    parts.push(format!("points={}", view.store.clock.len()));
    if let Some(bytes) = view.recording_bytes {
        parts.push(format!("recording={}", format_size(bytes)));
    }
    if let Some((delivered, total)) = view.replay_position {
        parts.push(format!("frame={}/{}", delivered, total));
    }
    if view.degraded {
        parts.push("degraded".to_string());
    }
    format!(
        "#{} [{}] {} ({:.1}ms)",
        view.cycle,
        view.timestamp.format("%H:%M:%S"),
        parts.join(", "),
        view.cycle_cost_seconds * 1000.0
    )
}

/// Wraps `source` with local system sampling when enabled.
fn with_system<S: DataSource + 'static>(args: &Args, source: S) -> Box<dyn DataSource> {
    if args.no_system {
        Box::new(source)
    } else {
        Box::new(CompositeSource::new(
            source,
            SystemSampler::new(RealFs::new(), &args.proc_path),
        ))
    }
}

fn build_setup(args: &Args) -> SessionSetup {
    let params = args.conn_params();
    let config = args.monitor_config();
    if args.pgbouncer {
        let poll = PgBouncerSource::new(params.clone());
        let endpoint = poll.endpoint();
        SessionSetup::new(config, endpoint, SessionContext::PgBouncer, with_system(args, poll))
            .with_command_source(Box::new(PgBouncerSource::new(params)))
    } else {
        let endpoint = params.endpoint();
        let poll = PostgresSource::new(params.clone());
        SessionSetup::new(config, endpoint, SessionContext::Postgres, with_system(args, poll))
            .with_command_source(Box::new(PostgresSource::new(params)))
    }
}

fn log_event(endpoint: &Endpoint, event: SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => debug!(%endpoint, %state, "state changed"),
        SessionEvent::Degraded {
            attempt,
            max_attempts,
            error,
        } => match max_attempts {
            Some(max) => warn!(%endpoint, "reconnecting ({}/{}): {}", attempt, max, error),
            None => warn!(%endpoint, "reconnecting (attempt {}): {}", attempt, error),
        },
        SessionEvent::Reconnected => info!(%endpoint, "connection restored"),
        SessionEvent::PrivilegeDenied(denial) => warn!(
            %endpoint,
            "{} disabled: {} ({})",
            denial.category,
            denial.message,
            denial.code
        ),
        SessionEvent::CycleCompleted { .. } => {}
        SessionEvent::Stopped(Some(e)) => error!(%endpoint, "session stopped: {}", e),
        SessionEvent::Stopped(None) => debug!(%endpoint, "session stopped"),
    }
}

/// Sleeps in short slices so a shutdown signal is noticed quickly.
fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let slice = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

fn run_live(args: &Args, running: &AtomicBool) -> i32 {
    let setup = build_setup(args);
    let endpoint = setup.endpoint.clone();
    info!(
        "Config: endpoint={}, interval={}s, record={}, daemon={}",
        endpoint, args.interval, args.record, args.daemon
    );

    let session = match SessionHandle::spawn(setup) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start session: {}", e);
            return 1;
        }
    };
    let mut provider = LiveProvider::new(session);

    while running.load(Ordering::SeqCst) {
        if let Some(view) = provider.advance() {
            info!("{}", describe_view(&view));
        }
        while let Some(event) = provider.session().try_event() {
            log_event(&endpoint, event);
        }
        if provider.session().is_finished() {
            break;
        }
        sleep_while_running(running, Duration::from_millis(200));
    }

    info!("Shutting down...");
    let session = provider.into_session();
    session.cancel();
    match session.join() {
        Some(e) => {
            error!("{}", e);
            1
        }
        None => {
            info!("Shutdown complete");
            0
        }
    }
}

/// Advances `provider` for a step requested at `at`, unless the previous
/// accepted step was too recent.
fn step_at(
    provider: &mut ReplayProvider,
    debouncer: &mut Debouncer,
    at: Instant,
) -> Option<Arc<SessionView>> {
    if !debouncer.allow_at(ActionKind::ReplayStep, at) {
        debug!("replay step ignored: repeated too quickly");
        return None;
    }
    provider.advance()
}

/// One frame per line on stdin until the recording ends or stdin closes.
fn step_replay(provider: &mut ReplayProvider, running: &AtomicBool) {
    let (tx, rx) = mpsc::channel();
    let reader = std::thread::Builder::new()
        .name("pgdash-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() || tx.send(Instant::now()).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = reader {
        error!("Failed to read stdin: {}", e);
        return;
    }
    info!("Press Enter to step through the recording");

    let mut debouncer = Debouncer::new();
    while running.load(Ordering::SeqCst) && !provider.is_exhausted() {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(at) => {
                if let Some(view) = step_at(provider, &mut debouncer, at) {
                    info!("{}", describe_view(&view));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_replay(args: &Args, path: &std::path::Path, running: &AtomicBool) -> i32 {
    let mut provider = ReplayProvider::open(path, args.context());
    if let Some(e) = provider.last_error() {
        error!("{}", e);
        return 1;
    }
    info!("Replaying {} ({} frames)", path.display(), provider.log().len());

    if args.step {
        step_replay(&mut provider, running);
    } else {
        let step = Duration::from_secs(args.interval.max(1));
        while running.load(Ordering::SeqCst) && !provider.is_exhausted() {
            if let Some(view) = provider.advance() {
                info!("{}", describe_view(&view));
            }
            sleep_while_running(running, step);
        }
    }

    for change in provider.variable_changes() {
        info!(
            "{} {}: {} -> {}",
            change.timestamp.format("%H:%M:%S"),
            change.variable,
            change.old_value.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            change.new_value.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    info!("Replay finished");
    0
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    info!("pgdash {} starting", env!("CARGO_PKG_VERSION"));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let code = match &args.replay {
        Some(path) => run_replay(&args, path, &running),
        None => run_live(&args, &running),
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pgdash_core::metrics::{MetricStore, StoreSnapshot};
    use pgdash_core::replay::{ReplayFrame, ReplayLog};
    use pgdash_core::scheduler::WorkerState;
    use pgdash_core::snapshot::PollSnapshot;
    use std::collections::BTreeMap;

    fn view() -> SessionView {
        let mut store = StoreSnapshot::default();
        store.clock = vec![Utc.timestamp_opt(1_700_000_000, 0).unwrap(); 2];
        store.series.insert("system_cpu.CPU_Percent".into(), vec![12.0, 17.0]);
        store.series.insert("pg_connections.active".into(), vec![4.0, 5.0]);
        SessionView {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            cycle: 3,
            state: WorkerState::Connected,
            degraded: true,
            store,
            raw_categories: BTreeMap::new(),
            session_variables: BTreeMap::new(),
            cycle_cost_seconds: 0.0042,
            recording_bytes: Some(2048),
            replay_position: None,
        }
    }

    #[test]
    fn describes_headline_series() {
        let line = describe_view(&view());
        assert_eq!(
            line,
            "#3 [22:13:20] cpu=17, active=5, points=2, recording=2.0K, degraded (4.2ms)"
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(1536), "1.5K");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0M");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0G");
    }

    #[test]
    fn pgbouncer_defaults_to_its_port() {
        let args = Args::parse_from(["pgdash", "--pgbouncer", "--host", "pool", "--user", "admin"]);
        let params = args.conn_params();
        if std::env::var("PGPORT").is_err() {
            assert_eq!(params.port, DEFAULT_PGBOUNCER_PORT);
        }
        assert_eq!(args.context(), SessionContext::PgBouncer);
    }

    #[test]
    fn config_from_flags() {
        let args = Args::parse_from([
            "pgdash",
            "--daemon",
            "--history-minutes",
            "5",
            "--redact",
            "token",
            "--redact",
            "secret",
        ]);
        let config = args.monitor_config();
        assert!(config.daemon);
        assert_eq!(config.history_window, Duration::from_secs(300));
        assert_eq!(config.redact_patterns, vec!["token", "secret"]);
        assert_eq!(config.reconnect_limit(), None);
    }

    #[test]
    fn replay_conflicts_with_record() {
        assert!(Args::try_parse_from(["pgdash", "--replay", "a.zst", "--record"]).is_err());
    }

    #[test]
    fn step_requires_replay() {
        assert!(Args::try_parse_from(["pgdash", "--step"]).is_err());
        assert!(Args::try_parse_from(["pgdash", "--replay", "a.zst", "--step"]).unwrap().step);
    }

    #[test]
    fn rapid_replay_steps_are_dropped() {
        let store = MetricStore::new(SessionContext::Postgres);
        let frames = (0..3)
            .map(|i| {
                let ts = Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap();
                ReplayFrame::capture(ts, &PollSnapshot::new(), &store, 0.001)
            })
            .collect();
        let mut provider = ReplayProvider::new(
            ReplayLog::from_frames(frames),
            MetricStore::new(SessionContext::Postgres),
        );
        let mut debouncer = Debouncer::new();
        let t0 = Instant::now();

        let cycle = |view: Option<Arc<SessionView>>| view.map(|v| v.cycle);
        assert_eq!(cycle(step_at(&mut provider, &mut debouncer, t0)), Some(1));
        assert_eq!(
            cycle(step_at(&mut provider, &mut debouncer, t0 + Duration::from_millis(30))),
            None
        );
        assert_eq!(
            cycle(step_at(&mut provider, &mut debouncer, t0 + ActionKind::ReplayStep.min_gap())),
            Some(2)
        );
        assert_eq!(provider.log().cursor(), 2);
    }
}
