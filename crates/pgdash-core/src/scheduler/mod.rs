//! Per-session poll loop.
//!
//! Each monitored endpoint gets one poller thread that owns its data source,
//! metric store and recorder. The UI side holds a [`SessionHandle`]: it reads
//! the latest published [`SessionView`], drives the lifecycle (pause, resume,
//! cancel) and submits ad-hoc commands, which run on a second connection.
//!
//! ```text
//!   SessionHandle ──pause/resume/cancel──► Shared{control, wake}
//!         ▲                                       │
//!         │ Arc<SessionView>                      ▼
//!         └──────────── publish ◄──── Poller: fetch → ingest → record
//! ```
//!
//! One cycle: fetch the requested categories, feed the metric store, evict
//! old history in daemon mode, append a replay frame, publish the view, then
//! sleep for the poll interval. Cancellation is honored at every sleep.

pub mod adhoc;
pub mod backoff;
pub mod debounce;
pub mod privilege;
pub mod sessions;
pub mod state;

pub use adhoc::{AdHocRunner, AdHocTicket};
pub use backoff::Backoff;
pub use debounce::{ActionKind, DEFAULT_DEBOUNCE, Debouncer};
pub use privilege::PrivilegeCache;
pub use sessions::SessionSet;
pub use state::{Transition, WorkerState};

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::collector::{AdHocCommand, DataSource, SourceError};
use crate::config::{Endpoint, MonitorConfig};
use crate::error::{AdHocError, SessionError};
use crate::metrics::{MetricGroup, MetricStore, SessionContext, builtin_catalog};
use crate::replay::{Redactor, ReplayFrame, ReplayRecorder};
use crate::snapshot::{Category, PollSnapshot, QueryDenial};
use crate::view::SessionView;

/// Categories polled for a session context.
pub fn categories_for(context: SessionContext) -> Vec<Category> {
    match context {
        SessionContext::Postgres => vec![
            Category::SystemUtilization,
            Category::DatabaseStats,
            Category::BgwriterStats,
            Category::ConnectionStats,
            Category::ReplicationStatus,
            Category::SessionVariables,
        ],
        SessionContext::PgBouncer => vec![
            Category::SystemUtilization,
            Category::PgbouncerPools,
            Category::PgbouncerStats,
            Category::SessionVariables,
        ],
    }
}

/// Notification from a session, in the order things happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(WorkerState),
    /// The connection was lost and reconnect attempt `attempt` is scheduled.
    Degraded {
        attempt: u32,
        max_attempts: Option<u32>,
        error: String,
    },
    Reconnected,
    /// A recurring query was refused; its category is no longer polled.
    PrivilegeDenied(QueryDenial),
    CycleCompleted { cycle: u64 },
    /// The poll thread is done, with the error that ended it, if any.
    Stopped(Option<SessionError>),
}

/// Everything needed to start a session.
pub struct SessionSetup {
    pub config: MonitorConfig,
    pub endpoint: Endpoint,
    pub context: SessionContext,
    pub catalog: Vec<MetricGroup>,
    /// Connection used by the poll loop.
    pub source: Box<dyn DataSource>,
    /// Separate connection for ad-hoc commands.
    pub command_source: Option<Box<dyn DataSource>>,
}

impl SessionSetup {
    pub fn new(
        config: MonitorConfig,
        endpoint: Endpoint,
        context: SessionContext,
        source: Box<dyn DataSource>,
    ) -> Self {
        Self {
            config,
            endpoint,
            context,
            catalog: builtin_catalog(),
            source,
            command_source: None,
        }
    }

    pub fn with_command_source(mut self, source: Box<dyn DataSource>) -> Self {
        self.command_source = Some(source);
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<MetricGroup>) -> Self {
        self.catalog = catalog;
        self
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Control {
    state: WorkerState,
    degraded: bool,
    error: Option<SessionError>,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    view: RwLock<Option<Arc<SessionView>>>,
    events: Sender<SessionEvent>,
}

impl Shared {
    fn new(events: Sender<SessionEvent>) -> Self {
        Self {
            control: Mutex::new(Control {
                state: WorkerState::Disconnected,
                degraded: false,
                error: None,
            }),
            wake: Condvar::new(),
            view: RwLock::new(None),
            events,
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // The handle may already be gone.
        let _ = self.events.send(event);
    }

    fn transition(&self, transition: Transition) -> WorkerState {
        let (next, changed) = {
            let mut control = self.control();
            let next = control.state.apply(transition);
            let changed = next != control.state;
            control.state = next;
            (next, changed)
        };
        if changed {
            self.wake.notify_all();
            self.restamp_view(|view| view.state = next);
            self.emit(SessionEvent::StateChanged(next));
        }
        next
    }

    fn set_degraded(&self, degraded: bool) {
        self.control().degraded = degraded;
        self.restamp_view(|view| view.degraded = degraded);
    }

    fn set_error(&self, error: SessionError) {
        self.control().error = Some(error);
    }

    /// Republishes the current view with a status change applied.
    fn restamp_view(&self, update: impl FnOnce(&mut SessionView)) {
        let mut slot = self.view.write().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = slot.as_ref() {
            let mut view = SessionView::clone(current);
            update(&mut view);
            *slot = Some(Arc::new(view));
        }
    }

    fn publish(&self, view: SessionView) {
        *self.view.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(view));
    }

    /// Sleeps for `timeout` unless cancelled first. Returns false on cancel.
    fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.control();
        loop {
            if control.state.is_terminal() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            control = match self.wake.wait_timeout(control, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Blocks while paused. Returns false once cancelled.
    fn wait_while_paused(&self) -> bool {
        let mut control = self.control();
        while control.state == WorkerState::Paused {
            control = self.wake.wait(control).unwrap_or_else(|e| e.into_inner());
        }
        !control.state.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

struct Poller {
    config: MonitorConfig,
    endpoint: Endpoint,
    source: Box<dyn DataSource>,
    store: MetricStore,
    recorder: Option<ReplayRecorder>,
    privileges: PrivilegeCache,
    backoff: Backoff,
    categories: Vec<Category>,
    shared: Arc<Shared>,
    cycle: u64,
    last_cycle_start: Option<Instant>,
}

impl Poller {
    fn run(mut self) {
        self.shared.transition(Transition::Connect);
        info!(endpoint = %self.endpoint, source = %self.source.describe(), "connecting");
        if let Err(e) = self.source.connect() {
            error!(endpoint = %self.endpoint, error = %e, "connection failed");
            let err = SessionError::ConnectFailed(e.to_string());
            self.shared.set_error(err.clone());
            self.shared.transition(Transition::ConnectFailed);
            self.stop(Some(err));
            return;
        }
        self.shared.transition(Transition::Connected);
        info!(endpoint = %self.endpoint, "connected");

        loop {
            if !self.shared.wait_while_paused() {
                break;
            }
            if let Err(e) = self.run_cycle() {
                error!(endpoint = %self.endpoint, error = %e, "session stopped");
                self.shared.set_error(e.clone());
                self.shared.transition(Transition::Cancel);
                self.stop(Some(e));
                return;
            }
            if !self.shared.sleep(self.config.poll_interval) {
                break;
            }
        }
        info!(endpoint = %self.endpoint, cycles = self.cycle, "session cancelled");
        self.stop(None);
    }

    fn stop(&mut self, error: Option<SessionError>) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.close();
        }
        self.source.close();
        self.shared.emit(SessionEvent::Stopped(error));
    }

    fn run_cycle(&mut self) -> Result<(), SessionError> {
        if !self.source.is_connected() {
            return self.reconnect(SourceError::Connection("not connected".into()));
        }
        let started = Instant::now();
        let categories = self.privileges.filter(&self.categories);

        let snapshot = match self.source.fetch_snapshot(&categories) {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_connection() => return self.reconnect(e),
            Err(SourceError::Busy) => {
                debug!(endpoint = %self.endpoint, "source busy, cycle skipped");
                return Ok(());
            }
            Err(e) => return Err(SessionError::Fatal(e.to_string())),
        };

        for denial in &snapshot.denied {
            if self.privileges.record(denial) {
                warn!(
                    endpoint = %self.endpoint,
                    category = %denial.category,
                    code = %denial.code,
                    error = %denial.message,
                    "query not permitted, category disabled for this session"
                );
                self.shared.emit(SessionEvent::PrivilegeDenied(denial.clone()));
            }
        }

        let elapsed = self
            .last_cycle_start
            .map(|prev| started.duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);
        self.last_cycle_start = Some(started);

        let timestamp = Utc::now();
        self.store.ingest(&snapshot, elapsed, timestamp);
        if self.config.daemon {
            let evicted = self.store.evict_older_than(self.config.history_window);
            if evicted > 0 {
                debug!(evicted, "evicted old history");
            }
        }

        let cycle_cost = started.elapsed().as_secs_f64();
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.append(ReplayFrame::capture(timestamp, &snapshot, &self.store, cycle_cost));
        }

        self.cycle += 1;
        self.publish(&snapshot, timestamp, cycle_cost);
        self.shared.emit(SessionEvent::CycleCompleted { cycle: self.cycle });
        Ok(())
    }

    fn publish(&self, snapshot: &PollSnapshot, timestamp: chrono::DateTime<Utc>, cycle_cost: f64) {
        let (state, degraded) = {
            let control = self.shared.control();
            (control.state, control.degraded)
        };
        self.shared.publish(SessionView {
            timestamp,
            cycle: self.cycle,
            state,
            degraded,
            store: self.store.snapshot_for_persistence(),
            raw_categories: snapshot.named_categories(),
            session_variables: snapshot
                .get(Category::SessionVariables)
                .cloned()
                .unwrap_or_default(),
            cycle_cost_seconds: cycle_cost,
            recording_bytes: self.recorder.as_ref().map(ReplayRecorder::file_size),
            replay_position: None,
        });
    }

    /// Reconnects with exponential backoff. The session stays `Connected`
    /// but degraded meanwhile, and keeps its history.
    fn reconnect(&mut self, cause: SourceError) -> Result<(), SessionError> {
        warn!(endpoint = %self.endpoint, error = %cause, "connection lost");
        self.source.close();
        self.shared.set_degraded(true);

        let mut last_error = cause.to_string();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if !self.backoff.allows(attempt) {
                return Err(SessionError::ReconnectExhausted {
                    attempts: attempt - 1,
                    last_error,
                });
            }
            self.shared.emit(SessionEvent::Degraded {
                attempt,
                max_attempts: self.backoff.max_attempts(),
                error: last_error.clone(),
            });
            let delay = self.backoff.delay(attempt - 1);
            info!(endpoint = %self.endpoint, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            if !self.shared.sleep(delay) {
                return Ok(());
            }
            match self.source.connect() {
                Ok(()) => {
                    info!(endpoint = %self.endpoint, attempt, "reconnected");
                    self.shared.set_degraded(false);
                    self.shared.emit(SessionEvent::Reconnected);
                    return Ok(());
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, attempt, error = %e, "reconnect failed");
                    last_error = e.to_string();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner-side view of a running session. Dropping it cancels the session.
pub struct SessionHandle {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    events: Receiver<SessionEvent>,
    commands: Option<AdHocRunner>,
    debouncer: Debouncer,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Starts the poll thread. A recording that cannot be opened is logged
    /// and the session runs without it.
    pub fn spawn(setup: SessionSetup) -> Result<Self, SessionError> {
        let SessionSetup {
            config,
            endpoint,
            context,
            catalog,
            source,
            command_source,
        } = setup;

        let recorder = if config.record {
            let redactor = Redactor::new(config.redact_patterns.iter().cloned());
            match ReplayRecorder::open(&config.replay_dir, &endpoint, redactor) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    error!(endpoint = %endpoint, error = %e, "failed to open recording, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared::new(tx));
        let poller = Poller {
            backoff: Backoff::from_config(&config),
            store: MetricStore::with_catalog(catalog, context),
            categories: categories_for(context),
            endpoint: endpoint.clone(),
            config,
            source,
            recorder,
            privileges: PrivilegeCache::new(),
            shared: Arc::clone(&shared),
            cycle: 0,
            last_cycle_start: None,
        };

        let thread = thread::Builder::new()
            .name(format!("pgdash-poll-{}", endpoint.host))
            .spawn(move || poller.run())
            .map_err(|e| SessionError::Fatal(format!("failed to start poll thread: {}", e)))?;

        Ok(Self {
            endpoint,
            shared,
            events: rx,
            commands: command_source.map(AdHocRunner::new),
            debouncer: Debouncer::new(),
            thread: Some(thread),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> WorkerState {
        self.shared.control().state
    }

    pub fn is_degraded(&self) -> bool {
        self.shared.control().degraded
    }

    /// Error that ended the session, if any.
    pub fn error(&self) -> Option<SessionError> {
        self.shared.control().error.clone()
    }

    /// Latest published view; `None` before the first cycle completes.
    pub fn latest(&self) -> Option<Arc<SessionView>> {
        self.shared
            .view
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Suspends polling after the current cycle. History is kept.
    pub fn pause(&self) {
        self.shared.transition(Transition::Pause);
    }

    pub fn resume(&self) {
        self.shared.transition(Transition::Resume);
    }

    /// Stops the session. Idempotent.
    pub fn cancel(&self) {
        self.shared.transition(Transition::Cancel);
    }

    /// The poll thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Submits a command on the command connection. Rejected if repeated
    /// too quickly, or while another command is running.
    pub fn run_ad_hoc(&mut self, command: AdHocCommand) -> Result<AdHocTicket, AdHocError> {
        let Some(runner) = self.commands.as_ref() else {
            return Err(AdHocError::Unavailable);
        };
        if self.shared.control().state.is_terminal() {
            return Err(AdHocError::Unavailable);
        }
        if !self.debouncer.allow(ActionKind::Command) {
            debug!(command = %command, "command debounced");
            return Err(AdHocError::Debounced);
        }
        runner.submit(command)
    }

    pub fn try_event(&self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    pub fn next_event(&self, timeout: Duration) -> Option<SessionEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Waits for the poll thread to exit without cancelling it.
    pub fn join(mut self) -> Option<SessionError> {
        self.join_thread();
        self.error()
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!(endpoint = %self.endpoint, "poll thread panicked");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel();
        self.join_thread();
    }
}
