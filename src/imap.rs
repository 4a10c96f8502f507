//! IMAPS implementation of the mail connection seam.
//!
//! Wraps `async-imap` operations with timeouts and error classification. Every
//! operation is bounded by the matching [`TimeoutConfig`] budget, so a stalled server
//! can hold a session's connection for at most that long.

use crate::config::{Credentials, TimeoutConfig};
use crate::connection::{self, TlsStream};
use crate::error::{Error, Result};
use crate::known_servers::Endpoint;
use crate::provider::{MailConnection, MailConnector};
use crate::proxy::Socks5Proxy;
use async_imap::Session;
use futures::TryStreamExt;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

/// Type alias for IMAP session over TLS.
type ImapSession = Session<TlsStream>;

/// Opens IMAPS connections, optionally through a SOCKS5 proxy.
#[derive(Clone)]
pub struct ImapConnector {
    tls: TlsConnector,
    proxy: Option<Socks5Proxy>,
    timeouts: TimeoutConfig,
}

impl ImapConnector {
    /// Creates a connector using the given timeouts and optional proxy.
    #[must_use]
    pub fn new(timeouts: TimeoutConfig, proxy: Option<Socks5Proxy>) -> Self {
        Self {
            tls: connection::tls_connector(),
            proxy,
            timeouts,
        }
    }
}

impl std::fmt::Debug for ImapConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConnector")
            .field("proxy", &self.proxy.as_ref().map(ToString::to_string))
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl MailConnector for ImapConnector {
    type Connection = ImapConnection;

    #[instrument(
        name = "ImapConnector::connect",
        skip_all,
        fields(imap_host = %endpoint.host, email = %credentials.masked_email())
    )]
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<ImapConnection> {
        let tls_stream = connection::open_tls(
            &self.tls,
            endpoint,
            self.proxy.as_ref(),
            self.timeouts.connect,
        )
        .await?;

        debug!("TLS connection established");

        let session = tokio::time::timeout(self.timeouts.auth, authenticate(tls_stream, credentials))
            .await
            .map_err(|_| Error::AuthTimeout {
                email: credentials.masked_email(),
                timeout: self.timeouts.auth,
            })??;

        debug!("Authenticated");

        Ok(ImapConnection {
            session: Box::new(session),
            timeouts: self.timeouts.clone(),
        })
    }
}

/// Logs in over an established TLS stream.
async fn authenticate(tls_stream: TlsStream, credentials: &Credentials) -> Result<ImapSession> {
    let client = async_imap::Client::new(tls_stream);

    client
        .login(credentials.email(), credentials.password())
        .await
        .map_err(|(source, _client)| classify_login_error(credentials.masked_email(), source))
}

/// Separates rejected credentials from transport trouble during login.
fn classify_login_error(email: String, source: async_imap::error::Error) -> Error {
    match source {
        async_imap::error::Error::No(_) | async_imap::error::Error::Bad(_) => {
            Error::Authentication { email, source }
        }
        source => Error::ImapLogin { email, source },
    }
}

/// An authenticated IMAPS session.
pub struct ImapConnection {
    session: Box<ImapSession>,
    timeouts: TimeoutConfig,
}

impl std::fmt::Debug for ImapConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConnection").finish_non_exhaustive()
    }
}

impl MailConnection for ImapConnection {
    #[instrument(name = "ImapConnection::probe", skip_all)]
    async fn probe(&mut self) -> Result<()> {
        let timeout = self.timeouts.probe;
        tokio::time::timeout(timeout, self.session.noop())
            .await
            .map_err(|_| Error::ProbeTimeout { timeout })?
            .map_err(|source| Error::ImapNoop { source })
    }

    #[instrument(name = "ImapConnection::select", skip(self))]
    async fn select_mailbox(&mut self, name: &str, read_only: bool) -> Result<()> {
        let timeout = self.timeouts.select;
        let selected = if read_only {
            tokio::time::timeout(timeout, self.session.examine(name)).await
        } else {
            tokio::time::timeout(timeout, self.session.select(name)).await
        };

        let mailbox = selected
            .map_err(|_| Error::SelectTimeout {
                mailbox: name.to_string(),
                timeout,
            })?
            .map_err(|source| Error::SelectMailbox {
                mailbox: name.to_string(),
                source,
            })?;

        debug!(exists = mailbox.exists, "Mailbox selected");
        Ok(())
    }

    #[instrument(name = "ImapConnection::search", skip(self))]
    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        let timeout = self.timeouts.search;
        let uids = tokio::time::timeout(timeout, self.session.uid_search(criteria))
            .await
            .map_err(|_| Error::SearchTimeout { timeout })?
            .map_err(|source| Error::ImapSearch { source })?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();

        debug!(uid_count = uids.len(), "Search complete");
        Ok(uids)
    }

    #[instrument(name = "ImapConnection::fetch", skip(self))]
    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
        let timeout = self.timeouts.fetch;
        let session = &mut self.session;

        let fetched = tokio::time::timeout(timeout, async move {
            let stream = session
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .await
                .map_err(|source| Error::ImapFetch { uid, source })?;

            stream
                .try_collect::<Vec<_>>()
                .await
                .map_err(|source| Error::ImapFetch { uid, source })
        })
        .await
        .map_err(|_| Error::FetchTimeout { uid, timeout })??;

        // Expunged between search and fetch: an empty message matches nothing
        let body = fetched
            .iter()
            .find_map(|message| message.body().map(<[u8]>::to_vec))
            .unwrap_or_default();

        debug!(bytes = body.len(), "Message fetched");
        Ok(body)
    }

    #[instrument(name = "ImapConnection::close", skip_all)]
    async fn close(&mut self) -> Result<()> {
        let timeout = self.timeouts.logout;
        tokio::time::timeout(timeout, self.session.logout())
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
            .map_err(|source| Error::ImapLogout { source })
    }
}
