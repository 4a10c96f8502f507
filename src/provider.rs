//! The mail connection seam.
//!
//! The session manager never talks IMAP directly. It opens connections through a
//! [`MailConnector`] and drives them through [`MailConnection`]; the production
//! implementation is [`ImapConnector`](crate::ImapConnector), tests plug in in-memory
//! doubles.
//!
//! A connection is not safe for concurrent use. The manager guarantees that at most
//! one operation runs on a given connection at a time.

use crate::config::Credentials;
use crate::error::Result;
use crate::known_servers::Endpoint;
use std::future::Future;

/// Opens authenticated mail connections.
pub trait MailConnector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: MailConnection;

    /// Connects to `endpoint` and authenticates with `credentials`.
    ///
    /// Fails with a transport error (network, TLS, timeout) or with
    /// [`Error::Authentication`](crate::Error::Authentication) when the server rejects
    /// the credentials.
    fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// One authenticated mail connection.
pub trait MailConnection: Send + 'static {
    /// Cheap round trip that fails if the connection is dead.
    fn probe(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Selects a mailbox, read-only when `read_only` is set.
    fn select_mailbox(
        &mut self,
        name: &str,
        read_only: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Searches the selected mailbox; identifiers come back ascending, oldest first.
    fn search(&mut self, criteria: &str) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Fetches the raw RFC 822 bytes of one message.
    fn fetch(&mut self, uid: u32) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Best-effort graceful logout.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
