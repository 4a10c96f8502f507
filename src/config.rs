//! Configuration for the session manager and the service around it.
//!
//! Use [`RelayConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use inbox_relay::{RelayConfig, SenderFilter};
//! use std::time::Duration;
//!
//! let config = RelayConfig::builder()
//!     .sender_filter(SenderFilter::Search("no-reply@shop.example".into()))
//!     .code_freshness(Duration::from_secs(60))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.poll.mailbox, "INBOX");
//! ```
//!
//! Deployments usually call [`RelayConfig::from_env`] instead.

use crate::error::{Error, Result};
use crate::known_servers::ServerRegistry;
use crate::matcher::{MarkupCodeMatcher, Matcher, RegexMatcher};
use crate::proxy::Socks5Proxy;
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Prefix shared by every environment variable read by [`RelayConfig::from_env`].
pub const ENV_PREFIX: &str = "INBOX_RELAY_";

/// Mailbox credentials held for the lifetime of one session.
///
/// The password lives in a [`SecretString`] and is only exposed to the connector
/// when (re)authenticating. `Debug` never prints it, and [`Credentials::masked_email`]
/// is the only form of the address that reaches logs.
#[derive(Clone)]
pub struct Credentials {
    email: EmailAddress,
    password: SecretString,
}

impl Credentials {
    /// Validates the address and wraps both values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingParameter`] for empty values and
    /// [`Error::InvalidEmailFormat`] for a malformed address.
    pub fn new(email: &str, password: impl Into<String>) -> Result<Self> {
        let password = password.into();
        if email.trim().is_empty() {
            return Err(Error::MissingParameter { name: "email" });
        }
        if password.is_empty() {
            return Err(Error::MissingParameter { name: "password" });
        }

        Ok(Self {
            email: validate_email(email.trim())?,
            password: SecretString::from(password),
        })
    }

    /// Returns the email address.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Returns the address in its loggable, masked form.
    #[must_use]
    pub fn masked_email(&self) -> String {
        mask_email(self.email.as_str())
    }

    /// Returns the password for authentication.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.masked_email())
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Masks the local part of an address, keeping its first character and the domain.
///
/// ```
/// assert_eq!(inbox_relay::config::mask_email("jane.doe@t-online.de"), "j***@t-online.de");
/// ```
#[must_use]
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

/// Validates an email address format.
fn validate_email(email: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(email, email_address::Options::default()).map_err(|_| {
        Error::InvalidEmailFormat {
            email: mask_email(email),
        }
    })
}

/// Timeouts applied to every blocking mail operation.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for the liveness probe.
    pub probe: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for a search.
    pub search: Duration,
    /// Timeout for fetching one message.
    pub fetch: Duration,
    /// Timeout for logout.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            probe: Duration::from_secs(10),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inactivity after which a session may be reaped.
    pub idle_expiry: Duration,
    /// How long a captured code is served without polling again.
    pub code_freshness: Duration,
    /// Interval between reaper sweeps.
    pub reap_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_expiry: Duration::from_secs(30 * 60),
            code_freshness: Duration::from_secs(120),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Which messages count as candidates for code extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderFilter {
    /// Let the server filter with `FROM "<sender>"`, then confirm the header locally.
    Search(String),
    /// Search `ALL` and filter on the `From` header locally.
    AllMessages(String),
}

impl SenderFilter {
    /// Returns the sender substring every candidate must contain.
    #[must_use]
    pub fn sender(&self) -> &str {
        match self {
            SenderFilter::Search(sender) | SenderFilter::AllMessages(sender) => sender,
        }
    }

    /// Returns the IMAP search criteria for this filter.
    #[must_use]
    pub fn criteria(&self) -> String {
        match self {
            SenderFilter::Search(sender) => format!("FROM \"{}\"", sender.replace('"', "")),
            SenderFilter::AllMessages(_) => "ALL".to_string(),
        }
    }
}

/// Settings for one poll of a mailbox.
#[derive(Clone)]
pub struct PollConfig {
    /// Mailbox to examine.
    pub mailbox: String,
    /// Candidate filter.
    pub sender_filter: SenderFilter,
    /// Optional cap on candidates fetched per poll, newest first. `None` scans until
    /// the candidate list is exhausted.
    pub max_scan: Option<usize>,
    /// Extractor run on the decoded body.
    pub matcher: Arc<dyn Matcher>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            mailbox: "INBOX".to_string(),
            sender_filter: SenderFilter::Search("no-reply@lieferando.de".to_string()),
            max_scan: None,
            matcher: Arc::new(MarkupCodeMatcher::new()),
        }
    }
}

impl std::fmt::Debug for PollConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollConfig")
            .field("mailbox", &self.mailbox)
            .field("sender_filter", &self.sender_filter)
            .field("max_scan", &self.max_scan)
            .field("matcher", &self.matcher.description())
            .finish()
    }
}

/// Complete service configuration.
///
/// Create using [`RelayConfig::builder()`] or [`RelayConfig::from_env()`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP listener binds to.
    pub bind: SocketAddr,
    /// Domain → endpoint table.
    pub registry: ServerRegistry,
    /// Optional SOCKS5 proxy for mail connections.
    pub proxy: Option<Socks5Proxy>,
    /// Timeouts for mail operations.
    pub timeouts: TimeoutConfig,
    /// Session lifetime settings.
    pub session: SessionConfig,
    /// Poll settings.
    pub poll: PollConfig,
}

impl RelayConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Builds a configuration from `INBOX_RELAY_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Builds a configuration from an arbitrary key lookup (keys without prefix).
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(bind) = lookup("BIND") {
            builder = builder.bind(parse_value("BIND", &bind)?);
        }

        let builtin = match lookup("BUILTIN_DOMAINS") {
            Some(value) => parse_bool("BUILTIN_DOMAINS", &value)?,
            None => true,
        };
        let mut registry = if builtin {
            ServerRegistry::with_defaults()
        } else {
            ServerRegistry::new()
        };
        if let Some(port) = lookup("IMAP_PORT") {
            registry = registry.default_port(parse_value("IMAP_PORT", &port)?);
        }
        if let Some(domains) = lookup("DOMAINS") {
            registry.parse_mappings(&domains)?;
        }
        builder = builder.server_registry(registry);

        if let Some(proxy) = lookup("PROXY") {
            builder = builder.proxy(proxy.parse()?);
        }
        if let Some(secs) = lookup("IDLE_EXPIRY_SECS") {
            builder = builder.idle_expiry(parse_secs("IDLE_EXPIRY_SECS", &secs)?);
        }
        if let Some(secs) = lookup("CODE_FRESHNESS_SECS") {
            builder = builder.code_freshness(parse_secs("CODE_FRESHNESS_SECS", &secs)?);
        }
        if let Some(secs) = lookup("REAP_INTERVAL_SECS") {
            builder = builder.reap_interval(parse_secs("REAP_INTERVAL_SECS", &secs)?);
        }
        if let Some(mailbox) = lookup("MAILBOX") {
            builder = builder.mailbox(mailbox);
        }

        let sender = lookup("SENDER");
        match lookup("SENDER_MODE").as_deref() {
            None | Some("search") => {
                if let Some(sender) = sender {
                    builder = builder.sender_filter(SenderFilter::Search(sender));
                }
            }
            Some("all") => {
                let sender = sender.unwrap_or_else(|| {
                    PollConfig::default().sender_filter.sender().to_string()
                });
                builder = builder.sender_filter(SenderFilter::AllMessages(sender));
            }
            Some(other) => {
                return Err(Error::InvalidConfig {
                    message: format!("SENDER_MODE must be 'search' or 'all', got '{other}'"),
                })
            }
        }

        if let Some(max_scan) = lookup("MAX_SCAN") {
            builder = builder.max_scan(parse_value("MAX_SCAN", &max_scan)?);
        }
        if let Some(pattern) = lookup("CODE_PATTERN") {
            let matcher = RegexMatcher::with_description(&pattern, "configured code pattern")
                .map_err(|e| Error::InvalidConfig {
                    message: format!("CODE_PATTERN: {e}"),
                })?;
            builder = builder.matcher(Arc::new(matcher));
        }

        builder.build()
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidConfig {
        message: format!("{ENV_PREFIX}{key} has invalid value '{value}'"),
    })
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    parse_value(key, value).map(Duration::from_secs)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig {
            message: format!("{ENV_PREFIX}{key} has invalid value '{value}'"),
        }),
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    bind: Option<SocketAddr>,
    registry: Option<ServerRegistry>,
    proxy: Option<Socks5Proxy>,
    timeouts: Option<TimeoutConfig>,
    session: Option<SessionConfig>,
    poll: Option<PollConfig>,
}

impl RelayConfigBuilder {
    /// Sets the HTTP bind address (default `0.0.0.0:8080`).
    #[must_use]
    pub fn bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Sets the domain → endpoint table.
    #[must_use]
    pub fn server_registry(mut self, registry: ServerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Routes mail connections through a SOCKS5 proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: Socks5Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the idle expiry.
    #[must_use]
    pub fn idle_expiry(mut self, idle_expiry: Duration) -> Self {
        self.session
            .get_or_insert_with(SessionConfig::default)
            .idle_expiry = idle_expiry;
        self
    }

    /// Sets the code freshness window.
    #[must_use]
    pub fn code_freshness(mut self, code_freshness: Duration) -> Self {
        self.session
            .get_or_insert_with(SessionConfig::default)
            .code_freshness = code_freshness;
        self
    }

    /// Sets the reaper interval.
    #[must_use]
    pub fn reap_interval(mut self, reap_interval: Duration) -> Self {
        self.session
            .get_or_insert_with(SessionConfig::default)
            .reap_interval = reap_interval;
        self
    }

    /// Sets the mailbox to examine.
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.poll.get_or_insert_with(PollConfig::default).mailbox = mailbox.into();
        self
    }

    /// Sets the candidate filter.
    #[must_use]
    pub fn sender_filter(mut self, filter: SenderFilter) -> Self {
        self.poll.get_or_insert_with(PollConfig::default).sender_filter = filter;
        self
    }

    /// Caps how many candidates a poll inspects. Unbounded unless set.
    #[must_use]
    pub fn max_scan(mut self, max_scan: usize) -> Self {
        self.poll.get_or_insert_with(PollConfig::default).max_scan = Some(max_scan);
        self
    }

    /// Replaces the code extractor.
    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.poll.get_or_insert_with(PollConfig::default).matcher = matcher;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero durations, an empty mailbox or sender,
    /// or a zero `max_scan`.
    pub fn build(self) -> Result<RelayConfig> {
        let session = self.session.unwrap_or_default();
        let poll = self.poll.unwrap_or_default();

        let invalid = |message: &str| {
            Err(Error::InvalidConfig {
                message: message.to_string(),
            })
        };

        if session.reap_interval.is_zero() {
            return invalid("reap interval must be non-zero");
        }
        if session.idle_expiry.is_zero() {
            return invalid("idle expiry must be non-zero");
        }
        if poll.mailbox.trim().is_empty() {
            return invalid("mailbox must not be empty");
        }
        if poll.sender_filter.sender().trim().is_empty() {
            return invalid("sender filter must not be empty");
        }
        if poll.max_scan == Some(0) {
            return invalid("max_scan must be at least 1");
        }

        Ok(RelayConfig {
            bind: self
                .bind
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080))),
            registry: self.registry.unwrap_or_default(),
            proxy: self.proxy,
            timeouts: self.timeouts.unwrap_or_default(),
            session,
            poll,
        })
    }
}
