//! Single-flight execution of user-triggered commands.
//!
//! Commands run on their own thread against a dedicated connection so a slow
//! `pg_terminate_backend` never stalls the poll cycle. At most one command is
//! in flight per runner; a second request is rejected immediately instead of
//! being queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::collector::{AdHocCommand, AdHocOutput, DataSource, SourceError};
use crate::error::AdHocError;

/// Clears the in-flight flag when the command thread finishes, panics
/// included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pending result of a submitted command.
pub struct AdHocTicket {
    command: AdHocCommand,
    rx: Receiver<Result<AdHocOutput, AdHocError>>,
    handle: Option<JoinHandle<()>>,
}

impl AdHocTicket {
    pub fn command(&self) -> &AdHocCommand {
        &self.command
    }

    /// Blocks until the command finishes.
    pub fn wait(mut self) -> Result<AdHocOutput, AdHocError> {
        let result = self.rx.recv().unwrap_or_else(|_| {
            Err(AdHocError::Source(SourceError::Connection(
                "command thread exited".into(),
            )))
        });
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result
    }

    /// Non-blocking poll. `None` while the command is still running.
    pub fn try_result(&mut self) -> Option<Result<AdHocOutput, AdHocError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(AdHocError::Source(
                SourceError::Connection("command thread exited".into()),
            ))),
        }
    }
}

pub struct AdHocRunner {
    source: Arc<Mutex<Box<dyn DataSource>>>,
    in_flight: Arc<AtomicBool>,
}

impl AdHocRunner {
    pub fn new(source: Box<dyn DataSource>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Starts `command` unless another one is still running.
    pub fn submit(&self, command: AdHocCommand) -> Result<AdHocTicket, AdHocError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(command = %command, "command rejected, another one is running");
            return Err(AdHocError::Busy);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let source = Arc::clone(&self.source);
        let (tx, rx) = mpsc::channel();
        let thread_command = command.clone();
        let spawned = thread::Builder::new()
            .name("pgdash-adhoc".into())
            .spawn(move || {
                let result = execute(&source, &thread_command);
                if let Err(e) = &result {
                    warn!(command = %thread_command, error = %e, "command failed");
                }
                // Free the slot before the caller can observe the result.
                drop(guard);
                let _ = tx.send(result);
            });

        match spawned {
            Ok(handle) => Ok(AdHocTicket {
                command,
                rx,
                handle: Some(handle),
            }),
            Err(e) => {
                // The closure, and the guard with it, was dropped.
                error!(error = %e, "failed to start command thread");
                Err(AdHocError::Unavailable)
            }
        }
    }
}

fn execute(
    source: &Mutex<Box<dyn DataSource>>,
    command: &AdHocCommand,
) -> Result<AdHocOutput, AdHocError> {
    let mut source = source.lock().unwrap_or_else(|e| e.into_inner());
    if !source.is_connected() {
        source.connect()?;
    }
    let result = source.run_ad_hoc(command);
    if let Err(e) = &result
        && e.is_connection()
    {
        source.close();
    }
    result.map_err(AdHocError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ScriptedSource;

    #[test]
    fn second_command_is_rejected_while_first_runs() {
        let source = ScriptedSource::new();
        source.push_ad_hoc(Ok(AdHocOutput::Done(true)));
        let release = source.gate_next_ad_hoc();
        let runner = AdHocRunner::new(Box::new(source.clone()));

        let first = runner.submit(AdHocCommand::TerminateBackend(4242)).unwrap();
        assert!(runner.is_busy());
        assert!(matches!(
            runner.submit(AdHocCommand::CancelBackend(1)),
            Err(AdHocError::Busy)
        ));

        release.send(()).unwrap();
        assert_eq!(first.wait(), Ok(AdHocOutput::Done(true)));
        assert!(!runner.is_busy());
        assert_eq!(source.ad_hoc_calls(), 1);

        let next = runner.submit(AdHocCommand::CancelBackend(1)).unwrap();
        assert_eq!(next.wait(), Ok(AdHocOutput::Done(true)));
        assert_eq!(source.ad_hoc_calls(), 2);
    }

    #[test]
    fn connects_lazily_and_reports_failures() {
        let source = ScriptedSource::new();
        source.push_connect(Err(SourceError::Connection("refused".into())));
        let runner = AdHocRunner::new(Box::new(source.clone()));

        let result = runner.submit(AdHocCommand::CancelBackend(7)).unwrap().wait();
        assert!(matches!(
            result,
            Err(AdHocError::Source(SourceError::Connection(_)))
        ));
        assert_eq!(source.ad_hoc_calls(), 0);
        assert!(!runner.is_busy());

        let result = runner.submit(AdHocCommand::CancelBackend(7)).unwrap().wait();
        assert_eq!(result, Ok(AdHocOutput::Done(true)));
        assert_eq!(source.connect_calls(), 2);
    }

    #[test]
    fn try_result_polls_without_blocking() {
        let source = ScriptedSource::new();
        let release = source.gate_next_ad_hoc();
        let runner = AdHocRunner::new(Box::new(source));

        let mut ticket = runner.submit(AdHocCommand::Query("SELECT 1".into())).unwrap();
        assert!(ticket.try_result().is_none());
        assert_eq!(ticket.command(), &AdHocCommand::Query("SELECT 1".into()));
        drop(release);
        assert_eq!(ticket.wait(), Ok(AdHocOutput::Done(true)));
    }
}
