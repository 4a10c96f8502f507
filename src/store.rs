//! In-memory session registry.
//!
//! The [`SessionStore`] maps opaque [`SessionId`]s to [`Session`] records. It is the
//! single source of truth: callers resolve a session by id at the start of every
//! operation and never keep one across a suspension point without re-checking it.
//!
//! Locking:
//! - the map sits behind a `std::sync::RwLock`, held only for lookups and inserts;
//! - a session's activity timestamp, cached code and poll status share one
//!   `std::sync::Mutex`, so readers never see a code paired with another update's
//!   timestamp;
//! - a session's mail connection sits behind its own `tokio::sync::Mutex`, held for the
//!   whole of any operation on the connection. `None` inside it means the session has
//!   been retired and the connection closed.

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::known_servers::Endpoint;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque, unguessable session identifier.
///
/// Generated from a random (v4) UUID; any string can be used to look one up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A code captured by the poll worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCode {
    /// The extracted code.
    pub code: String,
    /// When it was captured.
    pub captured_at: Instant,
}

impl CachedCode {
    /// Fresh iff strictly younger than `window`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) < window
    }
}

/// How the most recent poll of a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A code was captured into the cache.
    Captured,
    /// No message from the configured sender.
    NoMessage,
    /// The latest matching message had no extractable code.
    NoCode,
    /// The connection failed mid-poll.
    Aborted,
}

/// Poll bookkeeping for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// No poll has run since the last outcome was consumed.
    Idle,
    /// A poll worker is running.
    InFlight,
    /// The last poll finished with this outcome.
    Finished(PollOutcome),
}

/// What a lookup should do, decided atomically against the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Assessment {
    /// Serve this cached code.
    Fresh(String),
    /// A poll is already running.
    InFlight,
    /// No usable result; a poll was claimed and must be spawned.
    StartPoll,
    /// The last poll found nothing; a new poll was claimed and must be spawned.
    Missed(PollOutcome),
    /// The last poll lost its connection; the outcome was consumed.
    Aborted,
}

#[derive(Debug)]
struct SessionState {
    last_activity: Instant,
    cached: Option<CachedCode>,
    poll: PollStatus,
}

/// One mailbox session.
pub struct Session<C> {
    id: SessionId,
    endpoint: Endpoint,
    credentials: Credentials,
    state: Mutex<SessionState>,
    connection: tokio::sync::Mutex<Option<C>>,
}

impl<C> Session<C> {
    /// Returns the session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the endpoint the session connects to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns how long the session has been idle at `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state().last_activity)
    }

    /// Returns the cached code, fresh or not.
    #[must_use]
    pub fn cached_code(&self) -> Option<CachedCode> {
        self.state().cached.clone()
    }

    /// Returns the poll status.
    #[must_use]
    pub fn poll_status(&self) -> PollStatus {
        self.state().poll
    }

    /// Waits for exclusive use of the connection.
    pub async fn lock_connection(&self) -> ConnectionGuard<'_, C> {
        ConnectionGuard(self.connection.lock().await)
    }

    /// Takes the connection if nobody is using it.
    pub fn try_lock_connection(&self) -> Option<ConnectionGuard<'_, C>> {
        self.connection.try_lock().ok().map(ConnectionGuard)
    }

    /// Decides a lookup's response and claims a poll when one is needed.
    pub(crate) fn begin_poll(&self, now: Instant, freshness: Duration) -> Assessment {
        let mut state = self.state();

        if let Some(cached) = state
            .cached
            .as_ref()
            .filter(|cached| cached.is_fresh(now, freshness))
        {
            return Assessment::Fresh(cached.code.clone());
        }

        match state.poll {
            PollStatus::InFlight => Assessment::InFlight,
            PollStatus::Finished(PollOutcome::Aborted) => {
                state.poll = PollStatus::Idle;
                Assessment::Aborted
            }
            PollStatus::Finished(outcome @ (PollOutcome::NoMessage | PollOutcome::NoCode)) => {
                state.poll = PollStatus::InFlight;
                Assessment::Missed(outcome)
            }
            PollStatus::Idle | PollStatus::Finished(PollOutcome::Captured) => {
                state.poll = PollStatus::InFlight;
                Assessment::StartPoll
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .field("poll", &self.poll_status())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a session's connection slot.
pub struct ConnectionGuard<'a, C>(tokio::sync::MutexGuard<'a, Option<C>>);

impl<C> ConnectionGuard<'_, C> {
    /// Returns the live connection, or `None` if the session was retired.
    pub fn get_mut(&mut self) -> Option<&mut C> {
        self.0.as_mut()
    }

    /// Returns `true` if the session was retired.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.0.is_none()
    }

    /// Swaps in a new connection, returning the old one.
    pub fn replace(&mut self, connection: C) -> Option<C> {
        self.0.replace(connection)
    }

    /// Takes the connection out, retiring the session.
    pub fn retire(&mut self) -> Option<C> {
        self.0.take()
    }
}

/// Concurrent registry of sessions.
pub struct SessionStore<C> {
    sessions: RwLock<HashMap<SessionId, Arc<Session<C>>>>,
}

impl<C> Default for SessionStore<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SessionStore<C> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a session around an already authenticated connection.
    ///
    /// Draws identifiers until one is unused, so ids are never shared or reissued
    /// while their session exists.
    pub fn create(&self, endpoint: Endpoint, credentials: Credentials, connection: C) -> SessionId {
        let mut sessions = self.write();
        loop {
            let id = SessionId::generate();
            if let Entry::Vacant(slot) = sessions.entry(id.clone()) {
                slot.insert(Arc::new(Session {
                    id: id.clone(),
                    endpoint,
                    credentials,
                    state: Mutex::new(SessionState {
                        last_activity: Instant::now(),
                        cached: None,
                        poll: PollStatus::Idle,
                    }),
                    connection: tokio::sync::Mutex::new(Some(connection)),
                }));
                return id;
            }
        }
    }

    /// Resolves a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for unknown ids.
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session<C>>> {
        self.read().get(id).cloned().ok_or(Error::SessionNotFound)
    }

    /// Records activity on a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for unknown ids.
    pub fn touch(&self, id: &SessionId) -> Result<()> {
        self.get(id)?.state().last_activity = Instant::now();
        Ok(())
    }

    /// Stores a captured code and marks the running poll as finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the session was removed meanwhile.
    pub fn set_cache(&self, id: &SessionId, code: String, captured_at: Instant) -> Result<()> {
        let session = self.get(id)?;
        let mut state = session.state();
        state.cached = Some(CachedCode { code, captured_at });
        state.poll = PollStatus::Finished(PollOutcome::Captured);
        Ok(())
    }

    /// Records a poll that ended without capturing a code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the session was removed meanwhile.
    pub fn finish_poll(&self, id: &SessionId, outcome: PollOutcome) -> Result<()> {
        self.get(id)?.state().poll = PollStatus::Finished(outcome);
        Ok(())
    }

    /// Releases a poll claim that ended without recording an outcome.
    pub(crate) fn abandon_poll(&self, id: &SessionId) {
        if let Ok(session) = self.get(id) {
            let mut state = session.state();
            if state.poll == PollStatus::InFlight {
                state.poll = PollStatus::Idle;
            }
        }
    }

    /// Removes a session, returning it so the caller can close its connection.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session<C>>> {
        self.write().remove(id)
    }

    /// Returns every session currently registered.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Session<C>>> {
        self.read().values().cloned().collect()
    }

    /// Returns the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<Session<C>>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session<C>>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}
