//! Mail endpoint resolution from email domains.
//!
//! The domain → endpoint table is static deployment configuration: a built-in table of
//! common providers, optionally extended or overridden at startup. Unlike generic mail
//! clients there is no `imap.{domain}` guess; a domain that is not in the table is
//! rejected so the service never dials hosts nobody configured.
//!
//! # Example
//!
//! ```
//! use inbox_relay::known_servers::{Endpoint, ServerRegistry};
//!
//! let mut registry = ServerRegistry::with_defaults();
//! registry.register("mycompany.com", Endpoint::new("mail.mycompany.com", 993));
//!
//! let endpoint = registry.resolve("user@t-online.de").unwrap();
//! assert_eq!(endpoint.host, "secureimap.t-online.de");
//! assert!(registry.resolve("user@unknown.example").is_err());
//! ```

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Port used for implicit-TLS IMAP.
pub const IMAPS_PORT: u16 = 993;

/// Built-in map of email domains to their IMAPS hostnames.
static KNOWN_SERVERS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        // Deutsche Telekom
        ("t-online.de", "secureimap.t-online.de"),
        ("magenta.de", "secureimap.t-online.de"),
        // United Internet
        ("web.de", "imap.web.de"),
        ("gmx.de", "imap.gmx.net"),
        ("gmx.net", "imap.gmx.net"),
        ("gmx.at", "imap.gmx.net"),
        ("gmx.ch", "imap.gmx.net"),
        // Google
        ("gmail.com", "imap.gmail.com"),
        ("googlemail.com", "imap.gmail.com"),
        // Microsoft
        ("outlook.com", "outlook.office365.com"),
        ("hotmail.com", "outlook.office365.com"),
        ("live.com", "outlook.office365.com"),
        // Yahoo / AOL
        ("yahoo.com", "imap.mail.yahoo.com"),
        ("aol.com", "imap.aol.com"),
        // Apple
        ("icloud.com", "imap.mail.me.com"),
        ("me.com", "imap.mail.me.com"),
    ])
});

/// A mail server address: host plus port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Server hostname, also used for TLS SNI.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the endpoint as "host:port".
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Domain → endpoint table used at login.
///
/// Resolution order:
/// 1. Custom mappings (added via [`Self::register`] or [`Self::parse_mappings`])
/// 2. Built-in defaults (if [`Self::with_defaults`] was used), on [`Self::default_port`]
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    custom: HashMap<String, Endpoint>,
    use_defaults: bool,
    default_port: u16,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ServerRegistry {
    /// Creates an empty registry without built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            custom: HashMap::new(),
            use_defaults: false,
            default_port: IMAPS_PORT,
        }
    }

    /// Creates a registry that includes the built-in provider table.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            use_defaults: true,
            ..Self::new()
        }
    }

    /// Sets the port used for built-in entries.
    #[must_use]
    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Registers a domain mapping, overriding any existing one.
    pub fn register(&mut self, domain: impl Into<String>, endpoint: Endpoint) {
        self.custom.insert(domain.into().to_lowercase(), endpoint);
    }

    /// Registers mappings written as `domain=host[:port]`, comma separated.
    ///
    /// Entries without a port use [`IMAPS_PORT`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on a malformed entry.
    ///
    /// ```
    /// use inbox_relay::known_servers::ServerRegistry;
    ///
    /// let mut registry = ServerRegistry::new();
    /// registry.parse_mappings("corp.com=mail.corp.com, lab.org=imap.lab.org:1993").unwrap();
    /// assert_eq!(registry.resolve("a@lab.org").unwrap().port, 1993);
    /// ```
    pub fn parse_mappings(&mut self, mappings: &str) -> Result<()> {
        for entry in mappings.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || Error::InvalidConfig {
                message: format!("domain mapping '{entry}' must look like domain=host[:port]"),
            };

            let (domain, target) = entry.split_once('=').ok_or_else(invalid)?;
            let (domain, target) = (domain.trim(), target.trim());
            if domain.is_empty() || target.is_empty() {
                return Err(invalid());
            }

            let endpoint = match target.rsplit_once(':') {
                Some((host, port)) => {
                    Endpoint::new(host, port.parse().map_err(|_| invalid())?)
                }
                None => Endpoint::new(target, IMAPS_PORT),
            };
            self.register(domain, endpoint);
        }
        Ok(())
    }

    /// Resolves the endpoint serving an email address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDomain`] if the domain has no mapping.
    pub fn resolve(&self, email: &str) -> Result<Endpoint> {
        let domain = email
            .rsplit_once('@')
            .map_or(email, |(_, domain)| domain)
            .to_lowercase();

        if let Some(endpoint) = self.custom.get(&domain) {
            return Ok(endpoint.clone());
        }

        if self.use_defaults {
            if let Some(&host) = KNOWN_SERVERS.get(domain.as_str()) {
                return Ok(Endpoint::new(host, self.default_port));
            }
        }

        Err(Error::UnsupportedDomain { domain })
    }

    /// Returns `true` if the domain has a mapping.
    #[must_use]
    pub fn is_known(&self, domain: &str) -> bool {
        let domain_lower = domain.to_lowercase();
        self.custom.contains_key(&domain_lower)
            || (self.use_defaults && KNOWN_SERVERS.contains_key(domain_lower.as_str()))
    }

    /// Returns the number of resolvable domains.
    #[must_use]
    pub fn len(&self) -> usize {
        let default_count = if self.use_defaults {
            KNOWN_SERVERS
                .keys()
                .filter(|k| !self.custom.contains_key(**k))
                .count()
        } else {
            0
        };
        self.custom.len() + default_count
    }

    /// Returns `true` if no domain resolves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
