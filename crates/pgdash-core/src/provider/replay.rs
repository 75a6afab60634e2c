//! Views of a recorded session.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::{ProviderError, StateProvider};
use crate::metrics::{MetricStore, SessionContext};
use crate::replay::{ReplayError, ReplayLog, VariableChange};
use crate::scheduler::WorkerState;
use crate::view::SessionView;

/// Steps through a recording one frame per `advance()`.
///
/// Each frame's store snapshot is loaded into a metric store, so the view
/// carries exactly the series the live session had at that cycle.
pub struct ReplayProvider {
    log: ReplayLog,
    store: MetricStore,
    current: Option<Arc<SessionView>>,
    last_error: Option<ProviderError>,
}

impl ReplayProvider {
    /// Loads `path`. An unreadable file gives an empty provider with
    /// `last_error` set.
    pub fn open(path: &Path, context: SessionContext) -> Self {
        let store = MetricStore::new(context);
        match ReplayLog::try_load(path) {
            Ok(log) => {
                info!(path = %path.display(), frames = log.len(), "loaded recording");
                Self::new(log, store)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load recording");
                let message = format!("{}: {}", path.display(), e);
                let mut provider = Self::new(ReplayLog::default(), store);
                provider.last_error = Some(match e {
                    ReplayError::Decode { .. } => ProviderError::Parse(message),
                    _ => ProviderError::Io(message),
                });
                provider
            }
        }
    }

    pub fn new(log: ReplayLog, store: MetricStore) -> Self {
        Self {
            log,
            store,
            current: None,
            last_error: None,
        }
    }

    pub fn log(&self) -> &ReplayLog {
        &self.log
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    pub fn is_exhausted(&self) -> bool {
        self.log.is_exhausted()
    }

    /// Session-variable changes over the frames replayed so far.
    pub fn variable_changes(&self) -> Vec<VariableChange> {
        self.log.variable_changes_since_start()
    }
}

impl StateProvider for ReplayProvider {
    fn current(&self) -> Option<Arc<SessionView>> {
        self.current.clone()
    }

    fn advance(&mut self) -> Option<Arc<SessionView>> {
        let total = self.log.len();
        let delivered = self.log.cursor() + 1;
        let Some(frame) = self.log.next_frame() else {
            debug!(frames = total, "end of recording");
            return None;
        };
        self.store.load_from_persistence(&frame.metric_store_snapshot);
        let view = Arc::new(SessionView {
            timestamp: frame.timestamp,
            cycle: delivered as u64,
            state: WorkerState::Connected,
            degraded: false,
            store: self.store.snapshot_for_persistence(),
            raw_categories: frame.raw_categories.clone(),
            session_variables: frame.session_variables.clone(),
            cycle_cost_seconds: frame.cycle_cost_seconds,
            recording_bytes: None,
            replay_position: Some((delivered, total)),
        });
        self.current = Some(Arc::clone(&view));
        Some(view)
    }

    fn is_live(&self) -> bool {
        false
    }

    fn last_error(&self) -> Option<&ProviderError> {
        self.last_error.as_ref()
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayFrame;
    use crate::snapshot::{Category, PollSnapshot, fields};
    use chrono::{TimeZone, Utc};

    fn recorded_frames() -> Vec<ReplayFrame> {
        let mut store = MetricStore::new(SessionContext::Postgres);
        (0..3)
            .map(|i| {
                let ts = Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap();
                let snap = PollSnapshot::new()
                    .with(Category::ConnectionStats, fields([("active", 10 + i)]))
                    .with(Category::SessionVariables, fields([("work_mem", format!("{}MB", 4 + i))]));
                store.ingest(&snap, 1.0, ts);
                ReplayFrame::capture(ts, &snap, &store, 0.002)
            })
            .collect()
    }

    #[test]
    fn replays_frames_in_order_then_stops() {
        let frames = recorded_frames();
        let mut provider = ReplayProvider::new(
            ReplayLog::from_frames(frames.clone()),
            MetricStore::new(SessionContext::Postgres),
        );
        assert!(!provider.is_live());
        assert!(provider.current().is_none());

        for (i, frame) in frames.iter().enumerate() {
            let view = provider.advance().unwrap();
            assert_eq!(view.timestamp, frame.timestamp);
            assert_eq!(view.store, frame.metric_store_snapshot);
            assert_eq!(view.replay_position, Some((i + 1, 3)));
            assert_eq!(view.cycle, i as u64 + 1);
            assert_eq!(view.raw_categories, frame.raw_categories);
        }
        assert!(provider.is_exhausted());
        assert!(provider.advance().is_none());
        assert_eq!(provider.current().unwrap().cycle, 3);
        assert_eq!(
            provider.store().get_series("pg_connections.active").unwrap().latest(),
            Some(12.0)
        );
        assert_eq!(provider.variable_changes().len(), 2);
    }

    #[test]
    fn unreadable_recording_is_empty_with_error() {
        let mut provider =
            ReplayProvider::open(Path::new("/nonexistent/rec.zst"), SessionContext::Postgres);
        assert!(provider.log().is_empty());
        assert!(matches!(provider.last_error(), Some(ProviderError::Io(_))));
        assert!(provider.advance().is_none());
    }
}
