//! Error types for the inbox-relay crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are grouped into categories (see [`Error::category`]) that the HTTP layer maps
//! onto status codes, and classified by retryability (see [`Error::is_retryable`]).
//!
//! No variant carries a password. Variants that name a mailbox owner carry the masked
//! form produced by [`crate::config::mask_email`].

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing mailbox sessions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Caller input errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// A required request parameter was absent or empty.
    #[error("missing parameter: {name}")]
    MissingParameter {
        /// Name of the missing parameter.
        name: &'static str,
    },

    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// The address domain has no configured mail endpoint.
    #[error("unsupported email domain: {domain}")]
    UnsupportedDomain {
        /// The domain that could not be resolved.
        domain: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    /// The HTTP listener could not be bound.
    #[error("failed to bind HTTP listener on {addr}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an I/O error.
    #[error("HTTP server failed")]
    Serve {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Authentication / session errors (NOT retryable, caller must log in again)
    // ─────────────────────────────────────────────────────────────────────────
    /// The mail server rejected the credentials.
    #[error("authentication rejected for {email}")]
    Authentication {
        /// Masked email address used for login.
        email: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// No session exists for the given identifier (never issued, expired or reaped).
    #[error("invalid or expired session")]
    SessionNotFound,

    /// The session's connection died and could not be rebuilt; the session was removed.
    #[error("session connection lost and reconnection failed")]
    SessionUnrecoverable {
        /// The reconnection failure.
        #[source]
        source: Box<Error>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect via SOCKS5 proxy.
    #[error("failed to connect via SOCKS5 proxy {proxy_host} to {target}")]
    Socks5Connect {
        /// The SOCKS5 proxy hostname.
        proxy_host: String,
        /// The target address.
        target: String,
        /// The underlying SOCKS5 error.
        #[source]
        source: tokio_socks::Error,
    },

    /// The connection died while a poll was using it.
    #[error("mail connection aborted mid-operation")]
    TransportAborted,

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {email} after {timeout:?}")]
    AuthTimeout {
        /// Masked email address used for authentication.
        email: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Liveness probe timeout.
    #[error("liveness probe timeout after {timeout:?}")]
    ProbeTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Search timeout.
    #[error("search timeout after {timeout:?}")]
    SearchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for UID {uid} after {timeout:?}")]
    FetchTimeout {
        /// The UID being fetched.
        uid: u32,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors (RETRYABLE - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed for a reason other than rejected credentials.
    #[error("IMAP login failed for {email}")]
    ImapLogin {
        /// Masked email address used for login.
        email: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP NOOP failed.
    #[error("IMAP NOOP command failed")]
    ImapNoop {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// The UID that failed.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Email parsing errors (NOT retryable - malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse email message.
    #[error("failed to parse email")]
    ParseEmail {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    /// Failed to decode email body.
    #[error("failed to decode email body")]
    ExtractBody {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Search result errors (RETRYABLE - mail may not have arrived yet)
    // ─────────────────────────────────────────────────────────────────────────
    /// No message from the configured sender was found.
    #[error("no matching email found")]
    NoMatchingMessage,

    /// The latest matching message carried no extractable code.
    #[error("no verification code found in latest matching email")]
    NoCode,
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Socks5Connect { .. }
            | Error::TransportAborted
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::ProbeTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapNoop { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::NoMatchingMessage
            | Error::NoCode => true,

            Error::MissingParameter { .. }
            | Error::InvalidEmailFormat { .. }
            | Error::UnsupportedDomain { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::Bind { .. }
            | Error::Serve { .. }
            | Error::Authentication { .. }
            | Error::SessionNotFound
            | Error::SessionUnrecoverable { .. }
            | Error::LogoutTimeout { .. }
            | Error::ImapLogout { .. }
            | Error::ParseEmail { .. }
            | Error::ExtractBody { .. } => false,
        }
    }

    /// Returns the error category used for logging and for HTTP status mapping.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingParameter { .. }
            | Error::InvalidEmailFormat { .. }
            | Error::UnsupportedDomain { .. } => ErrorCategory::Validation,

            Error::InvalidConfig { .. } | Error::InvalidDnsName { .. } | Error::Bind { .. } => {
                ErrorCategory::Configuration
            }

            Error::Authentication { .. } => ErrorCategory::Authentication,

            Error::SessionNotFound | Error::SessionUnrecoverable { .. } => ErrorCategory::Session,

            Error::TransportAborted => ErrorCategory::Aborted,

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Socks5Connect { .. }
            | Error::Serve { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::ProbeTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapNoop { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } | Error::ExtractBody { .. } => ErrorCategory::Parse,

            Error::NoMatchingMessage | Error::NoCode => ErrorCategory::NotFound,
        }
    }

    /// Returns `true` if the error means the mail connection itself is unusable.
    ///
    /// Used by the poll worker to tell a dead transport apart from a bad message.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Protocol
                | ErrorCategory::Aborted
        )
    }
}

/// Error categories for logging and HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed caller input.
    Validation,
    /// Configuration errors.
    Configuration,
    /// Credentials rejected by the mail server.
    Authentication,
    /// Session absent, expired or unrecoverable.
    Session,
    /// Connection died mid-operation.
    Aborted,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Email parsing errors.
    Parse,
    /// No qualifying message or code.
    NotFound,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Aborted => write!(f, "aborted"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::NotFound => write!(f, "not_found"),
        }
    }
}
