//! The session manager: login, code lookup and session lifetime.

use crate::config::{mask_email, Credentials, RelayConfig};
use crate::error::{Error, Result};
use crate::liveness;
use crate::poller;
use crate::provider::MailConnector;
use crate::reaper;
use crate::store::{Assessment, PollOutcome, SessionId, SessionStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// State shared by the manager, its poll workers and the reaper.
pub(crate) struct Shared<C: MailConnector> {
    pub(crate) connector: C,
    pub(crate) store: SessionStore<C::Connection>,
    pub(crate) config: RelayConfig,
}

/// Answer to a code lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A code captured within the freshness window.
    Code(String),
    /// A poll was started or is still running; ask again later.
    Pending,
}

/// Holds authenticated mailbox sessions and serves the codes found in them.
///
/// Cloning is cheap; clones share the same sessions.
///
/// # Example
///
/// ```no_run
/// use inbox_relay::{ImapConnector, Lookup, RelayConfig, SessionManager};
///
/// # async fn example() -> inbox_relay::Result<()> {
/// let config = RelayConfig::builder().build()?;
/// let connector = ImapConnector::new(config.timeouts.clone(), config.proxy.clone());
/// let manager = SessionManager::new(connector, config);
/// let _reaper = manager.spawn_reaper();
///
/// let id = manager.login("user@t-online.de", "app-password").await?;
/// match manager.lookup(&id).await? {
///     Lookup::Code(code) => println!("code: {code}"),
///     Lookup::Pending => println!("try again shortly"),
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionManager<C: MailConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: MailConnector> Clone for SessionManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: MailConnector> std::fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.shared.store.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<C: MailConnector> SessionManager<C> {
    /// Creates a manager with an empty session store.
    #[must_use]
    pub fn new(connector: C, config: RelayConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                store: SessionStore::new(),
                config,
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared.store.len()
    }

    /// Authenticates against the mailbox's provider and opens a session.
    ///
    /// # Errors
    ///
    /// - Validation errors for missing parameters, malformed addresses or
    ///   unsupported domains. No network traffic happens in that case.
    /// - [`Error::Authentication`] if the server rejects the credentials.
    /// - A transport error if the server cannot be reached.
    #[instrument(
        name = "SessionManager::login",
        skip_all,
        fields(email = %mask_email(email))
    )]
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionId> {
        let credentials = Credentials::new(email, password)?;
        let endpoint = self.shared.config.registry.resolve(credentials.email())?;

        debug!(endpoint = %endpoint, "Connecting");

        let connection = self.shared.connector.connect(&endpoint, &credentials).await?;
        let id = self.shared.store.create(endpoint, credentials, connection);

        info!(session_id = %id, "Session created");
        Ok(id)
    }

    /// Returns the session's fresh code, or starts a poll for one.
    ///
    /// Never waits on mail retrieval: when a poll holds the connection, the answer
    /// comes from the cache and poll state alone.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] for unknown or reaped sessions.
    /// - [`Error::SessionUnrecoverable`] if the connection died and reconnecting
    ///   failed; the session is gone afterwards.
    /// - [`Error::NoMatchingMessage`] or [`Error::NoCode`] if the last poll came back
    ///   empty. A new poll has already been started.
    /// - [`Error::TransportAborted`] if the last poll lost its connection.
    #[instrument(name = "SessionManager::lookup", skip_all, fields(session_id = %id))]
    pub async fn lookup(&self, id: &SessionId) -> Result<Lookup> {
        let shared = &self.shared;
        let session = shared.store.get(id)?;

        match session.try_lock_connection() {
            Some(mut guard) => {
                liveness::ensure_live(&shared.connector, &shared.store, &session, &mut guard)
                    .await?;
            }
            None => debug!("Connection busy, skipping liveness probe"),
        }

        shared.store.touch(id)?;

        match session.begin_poll(Instant::now(), shared.config.session.code_freshness) {
            Assessment::Fresh(code) => Ok(Lookup::Code(code)),
            Assessment::InFlight => Ok(Lookup::Pending),
            Assessment::StartPoll => {
                self.spawn_poll(id);
                Ok(Lookup::Pending)
            }
            Assessment::Missed(outcome) => {
                self.spawn_poll(id);
                Err(match outcome {
                    PollOutcome::NoMessage => Error::NoMatchingMessage,
                    _ => Error::NoCode,
                })
            }
            Assessment::Aborted => Err(Error::TransportAborted),
        }
    }

    /// Spawns the idle-session reaper. Abort the handle to stop it.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        reaper::spawn(Arc::clone(&self.shared))
    }

    /// Runs one reaper sweep now. Returns how many sessions were reaped.
    pub async fn reap_idle(&self) -> usize {
        reaper::reap_idle(&self.shared).await
    }

    fn spawn_poll(&self, id: &SessionId) {
        debug!("Starting poll");
        tokio::spawn(poller::poll_and_cache(Arc::clone(&self.shared), id.clone()));
    }
}
