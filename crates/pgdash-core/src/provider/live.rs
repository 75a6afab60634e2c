//! Views of a running session.

use std::any::Any;
use std::sync::Arc;

use super::{ProviderError, StateProvider};
use crate::scheduler::SessionHandle;
use crate::view::SessionView;

/// Provider backed by a live session's published views.
pub struct LiveProvider {
    session: SessionHandle,
    current: Option<Arc<SessionView>>,
    last_error: Option<ProviderError>,
}

impl LiveProvider {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            current: None,
            last_error: None,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Mutable access for lifecycle control and ad-hoc commands.
    pub fn session_mut(&mut self) -> &mut SessionHandle {
        &mut self.session
    }

    pub fn into_session(self) -> SessionHandle {
        self.session
    }
}

impl StateProvider for LiveProvider {
    fn current(&self) -> Option<Arc<SessionView>> {
        self.current.clone()
    }

    fn advance(&mut self) -> Option<Arc<SessionView>> {
        self.last_error = self
            .session
            .error()
            .map(|e| ProviderError::Session(e.to_string()));

        let latest = self.session.latest()?;
        let fresh = self
            .current
            .as_ref()
            .is_none_or(|current| !Arc::ptr_eq(current, &latest));
        self.current = Some(Arc::clone(&latest));
        fresh.then_some(latest)
    }

    fn is_live(&self) -> bool {
        true
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
    use crate::collector::{ScriptedSource, SourceError};
    use crate::config::{Endpoint, MonitorConfig};
    use crate::metrics::SessionContext;
    use crate::scheduler::SessionSetup;
    use std::time::{Duration, Instant};

    fn provider(source: &ScriptedSource) -> LiveProvider {
        let config = MonitorConfig {
            poll_interval: Duration::from_millis(5),
            ..MonitorConfig::default()
        };
        let session = SessionHandle::spawn(SessionSetup::new(
            config,
            Endpoint::postgres("localhost", 5432),
            SessionContext::Postgres,
            Box::new(source.clone()),
        ))
        .unwrap();
        LiveProvider::new(session)
    }

    #[test]
    fn advance_picks_up_published_views() {
        let source = ScriptedSource::new();
        let mut provider = provider(&source);
        assert!(provider.is_live());

        let deadline = Instant::now() + Duration::from_secs(5);
        let view = loop {
            if let Some(view) = provider.advance() {
                break view;
            }
            assert!(Instant::now() < deadline, "no view published");
            std::thread::sleep(Duration::from_millis(2));
        };
        assert!(view.cycle >= 1);
        assert!(Arc::ptr_eq(&provider.current().unwrap(), &view));

        provider.session().pause();
        std::thread::sleep(Duration::from_millis(20));
        provider.advance();
        // Nothing new while paused.
        assert!(provider.advance().is_none());
        assert!(provider.current().is_some());
    }

    #[test]
    fn session_errors_surface() {
        let source = ScriptedSource::new();
        source.push_connect(Err(SourceError::Connection("refused".into())));
        let mut provider = provider(&source);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !provider.session().is_finished() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(provider.advance().is_none());
        assert!(matches!(provider.last_error(), Some(ProviderError::Session(_))));
    }
}
