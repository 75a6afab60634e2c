//! Several monitored endpoints in one process.
//!
//! Each session keeps its own poll thread, store and connections; the set
//! only owns the handles. Starting and removing a session are user actions
//! and go through the debouncer.

use std::time::Instant;

use tracing::{debug, info};

use super::debounce::{ActionKind, Debouncer};
use super::{SessionHandle, SessionSetup};
use crate::config::Endpoint;
use crate::error::{SessionError, SessionSetError};

#[derive(Default)]
pub struct SessionSet {
    sessions: Vec<SessionHandle>,
    debouncer: Debouncer,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session for `setup.endpoint`.
    pub fn add(&mut self, setup: SessionSetup) -> Result<&SessionHandle, SessionSetError> {
        self.add_at(setup, Instant::now())
    }

    pub fn add_at(
        &mut self,
        setup: SessionSetup,
        now: Instant,
    ) -> Result<&SessionHandle, SessionSetError> {
        if !self.debouncer.allow_at(ActionKind::StartSession, now) {
            debug!(endpoint = %setup.endpoint, "session start debounced");
            return Err(SessionSetError::Debounced);
        }
        if self.get(&setup.endpoint).is_some() {
            return Err(SessionSetError::AlreadyMonitored(setup.endpoint));
        }

        let handle = SessionHandle::spawn(setup).map_err(SessionSetError::Spawn)?;
        info!(endpoint = %handle.endpoint(), sessions = self.sessions.len() + 1, "session added");
        let index = self.sessions.len();
        self.sessions.push(handle);
        Ok(&self.sessions[index])
    }

    /// Cancels and joins the session for `endpoint`. Returns the error that
    /// ended it, if any.
    pub fn remove(&mut self, endpoint: &Endpoint) -> Result<Option<SessionError>, SessionSetError> {
        self.remove_at(endpoint, Instant::now())
    }

    pub fn remove_at(
        &mut self,
        endpoint: &Endpoint,
        now: Instant,
    ) -> Result<Option<SessionError>, SessionSetError> {
        if !self.debouncer.allow_at(ActionKind::RemoveSession, now) {
            debug!(%endpoint, "session removal debounced");
            return Err(SessionSetError::Debounced);
        }
        let Some(index) = self.sessions.iter().position(|s| s.endpoint() == endpoint) else {
            return Err(SessionSetError::NotMonitored(endpoint.clone()));
        };

        let handle = self.sessions.remove(index);
        handle.cancel();
        let error = handle.join();
        info!(%endpoint, sessions = self.sessions.len(), "session removed");
        Ok(error)
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<&SessionHandle> {
        self.sessions.iter().find(|s| s.endpoint() == endpoint)
    }

    pub fn get_mut(&mut self, endpoint: &Endpoint) -> Option<&mut SessionHandle> {
        self.sessions.iter_mut().find(|s| s.endpoint() == endpoint)
    }

    /// Sessions in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cancels every session, then waits for all of them. Returns the
    /// sessions that ended with an error.
    pub fn shutdown(self) -> Vec<(Endpoint, SessionError)> {
        for session in &self.sessions {
            session.cancel();
        }
        self.sessions
            .into_iter()
            .filter_map(|session| {
                let endpoint = session.endpoint().clone();
                session.join().map(|e| (endpoint, e))
            })
            .collect()
    }
}
