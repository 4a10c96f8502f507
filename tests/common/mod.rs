//! In-memory mail provider shared by the integration tests.

#![allow(dead_code)]

use inbox_relay::{
    Credentials, Endpoint, Error, MailConnection, MailConnector, RelayConfig, Result,
    SenderFilter, ServerRegistry, SessionManager,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const SENDER: &str = "no-reply@shop.example";

/// Everything the mock mailbox knows and counts.
#[derive(Debug, Default)]
pub struct Mailbox {
    /// `(uid, raw message)`, ascending by uid.
    pub messages: Vec<(u32, Vec<u8>)>,
    pub reject_login: bool,
    pub connect_fails: bool,
    pub fetch_fails: bool,
    pub close_fails: bool,
    pub fetch_delay: Option<Duration>,
    /// Connections created before this generation fail their probe.
    pub dead_before: u64,
    pub connects: usize,
    pub fetches: usize,
    pub closes: usize,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    mailbox: Arc<Mutex<Mailbox>>,
}

impl MockConnector {
    pub fn mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap()
    }

    pub fn deliver(&self, raw: Vec<u8>) {
        let mut mailbox = self.mailbox();
        let uid = mailbox.messages.last().map_or(1, |(uid, _)| uid + 1);
        mailbox.messages.push((uid, raw));
    }

    /// Makes every existing connection fail its next probe.
    pub fn kill_connections(&self) {
        let mut mailbox = self.mailbox();
        mailbox.dead_before = mailbox.connects as u64;
    }
}

impl MailConnector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, _: &Endpoint, credentials: &Credentials) -> Result<MockConnection> {
        let mut mailbox = self.mailbox();
        if mailbox.connect_fails {
            return Err(Error::ConnectTimeout {
                target: "imap.example.com:993".into(),
                timeout: Duration::from_secs(30),
            });
        }
        if mailbox.reject_login {
            return Err(Error::Authentication {
                email: credentials.masked_email(),
                source: async_imap::error::Error::No("[AUTHENTICATIONFAILED] denied".into()),
            });
        }

        let generation = mailbox.connects as u64;
        mailbox.connects += 1;
        Ok(MockConnection {
            mailbox: Arc::clone(&self.mailbox),
            generation,
        })
    }
}

pub struct MockConnection {
    mailbox: Arc<Mutex<Mailbox>>,
    generation: u64,
}

impl MockConnection {
    fn mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap()
    }
}

impl MailConnection for MockConnection {
    async fn probe(&mut self) -> Result<()> {
        if self.generation < self.mailbox().dead_before {
            return Err(Error::ProbeTimeout {
                timeout: Duration::from_secs(10),
            });
        }
        Ok(())
    }

    async fn select_mailbox(&mut self, _: &str, _: bool) -> Result<()> {
        Ok(())
    }

    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        let needle = criteria
            .strip_prefix("FROM ")
            .map(|sender| sender.trim_matches('"').to_lowercase());

        Ok(self
            .mailbox()
            .messages
            .iter()
            .filter(|(_, raw)| match &needle {
                Some(sender) => String::from_utf8_lossy(raw).to_lowercase().contains(sender),
                None => true,
            })
            .map(|(uid, _)| *uid)
            .collect())
    }

    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
        let delay = self.mailbox().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut mailbox = self.mailbox();
        mailbox.fetches += 1;
        if mailbox.fetch_fails {
            return Err(Error::FetchTimeout {
                uid,
                timeout: Duration::from_secs(30),
            });
        }
        Ok(mailbox
            .messages
            .iter()
            .find(|(candidate, _)| *candidate == uid)
            .map(|(_, raw)| raw.clone())
            .unwrap_or_default())
    }

    async fn close(&mut self) -> Result<()> {
        let mut mailbox = self.mailbox();
        mailbox.closes += 1;
        if mailbox.close_fails {
            return Err(Error::LogoutTimeout {
                timeout: Duration::from_secs(5),
            });
        }
        Ok(())
    }
}

/// An HTML message from `sender` carrying `code` in the highlighted cell.
pub fn code_email(sender: &str, code: &str) -> Vec<u8> {
    html_email(
        sender,
        &format!(r#"<p>Your code:</p><td class="code-text" align="center">{code}</td>"#),
    )
}

pub fn html_email(sender: &str, html: &str) -> Vec<u8> {
    format!(
        "From: Shop <{sender}>\r\nSubject: Your code\r\nMIME-Version: 1.0\r\n\
         Content-Type: text/html; charset=utf-8\r\n\r\n{html}\r\n"
    )
    .into_bytes()
}

pub fn test_config() -> inbox_relay::config::RelayConfigBuilder {
    let mut registry = ServerRegistry::new();
    registry.register("example.com", Endpoint::new("imap.example.com", 993));

    RelayConfig::builder()
        .server_registry(registry)
        .sender_filter(SenderFilter::Search(SENDER.into()))
        .code_freshness(Duration::from_secs(120))
        .idle_expiry(Duration::from_secs(60))
        .reap_interval(Duration::from_secs(10))
}

pub fn manager() -> (MockConnector, SessionManager<MockConnector>) {
    manager_with(test_config().build().unwrap())
}

pub fn manager_with(config: RelayConfig) -> (MockConnector, SessionManager<MockConnector>) {
    let connector = MockConnector::default();
    let manager = SessionManager::new(connector.clone(), config);
    (connector, manager)
}

/// Lets spawned poll workers run to completion.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
