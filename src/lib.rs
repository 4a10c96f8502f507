//! # inbox-relay
//!
//! Keeps authenticated IMAP sessions open on behalf of HTTP clients and relays the
//! verification code found in the latest message from a configured sender.
//!
//! A client logs in once with mailbox credentials and receives an opaque session id.
//! Later lookups with that id either return a recently captured code or start a
//! background poll of the mailbox and answer "pending". Sessions survive dropped
//! connections through a single reconnection attempt and are reaped after a period of
//! inactivity.
//!
//! ## Quick Start
//!
//! ```no_run
//! use inbox_relay::{server, ImapConnector, RelayConfig, SessionManager};
//!
//! # async fn example() -> inbox_relay::Result<()> {
//! let config = RelayConfig::from_env()?;
//! let connector = ImapConnector::new(config.timeouts.clone(), config.proxy.clone());
//! let manager = SessionManager::new(connector, config);
//! let _reaper = manager.spawn_reaper();
//!
//! let app = server::router(manager);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//! axum::serve(listener, app).await.unwrap();
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Code Patterns
//!
//! The default [`MarkupCodeMatcher`](matcher::MarkupCodeMatcher) recognises six
//! character codes inside highlighted markup. Any regex with one capture group can
//! replace it:
//!
//! ```
//! use inbox_relay::matcher::{Matcher, RegexMatcher};
//! use inbox_relay::RelayConfig;
//! use std::sync::Arc;
//!
//! let matcher = RegexMatcher::new(r"code:\s*(\d{6})").unwrap();
//! assert_eq!(matcher.find_match("Your code: 123456").as_deref(), Some("123456"));
//!
//! let config = RelayConfig::builder().matcher(Arc::new(matcher)).build().unwrap();
//! ```
//!
//! ## Mail Providers
//!
//! The manager talks to mailboxes only through the [`MailConnector`] and
//! [`MailConnection`] traits. [`ImapConnector`] is the production implementation;
//! anything else (for instance an in-memory double in tests) can be plugged in.
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Error`]. [`Error::category`] drives both logging
//! and the HTTP status code:
//!
//! ```
//! use inbox_relay::{Error, ErrorCategory};
//!
//! assert_eq!(Error::SessionNotFound.category(), ErrorCategory::Session);
//! assert!(Error::NoCode.is_retryable());
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing`. Major operations emit spans named `Type::method` or
//! `module::function`, e.g. `SessionManager::lookup`, `liveness::ensure_live`,
//! `poller::poll_and_cache`, `ImapConnector::connect`.
//!
//! ### Standard Fields
//!
//! - `session_id` - Session identifier
//! - `email` - Masked email address (`j***@example.com`)
//! - `imap_host` - IMAP server hostname
//! - `proxy_enabled` - Whether a proxy is used
//! - `uid` - Message UID

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod error;
pub mod known_servers;
pub mod matcher;
pub mod provider;
pub mod proxy;
pub mod server;
pub mod store;

// Internal modules
mod connection;
mod imap;
mod liveness;
mod manager;
mod parser;
mod poller;
mod reaper;

// Re-exports for ergonomic API
pub use config::{
    Credentials, PollConfig, RelayConfig, RelayConfigBuilder, SenderFilter, SessionConfig,
    TimeoutConfig,
};
pub use error::{Error, ErrorCategory, Result};
pub use imap::{ImapConnection, ImapConnector};
pub use known_servers::{Endpoint, ServerRegistry};
pub use manager::{Lookup, SessionManager};
pub use provider::{MailConnection, MailConnector};
pub use proxy::{ProxyAuth, Socks5Proxy};
pub use store::{PollOutcome, PollStatus, SessionId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let config = RelayConfig::builder().build().unwrap();
        let connector = ImapConnector::new(config.timeouts.clone(), None);
        let manager = SessionManager::new(connector, config);
        assert_eq!(manager.session_count(), 0);
        let _ = Socks5Proxy::new("localhost", 1080);
        let _ = matcher::MarkupCodeMatcher::new();
    }
}
