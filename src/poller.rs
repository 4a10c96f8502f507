//! Background poll-and-cache worker.
//!
//! A worker is spawned per poll and detached. Its only effect is a store write: either
//! the captured code, or the [`PollOutcome`] a later lookup reports.

use crate::error::{Error, Result};
use crate::liveness;
use crate::manager::Shared;
use crate::parser::decode_message;
use crate::provider::{MailConnection, MailConnector};
use crate::store::{PollOutcome, SessionId, SessionStore};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Releases the session's poll claim if the worker ends without recording an outcome.
///
/// Once an outcome is recorded the claim is disarmed: a later lookup may already have
/// started the next poll, and that claim is not ours to release.
struct PollClaim<'a, T> {
    store: &'a SessionStore<T>,
    id: &'a SessionId,
    armed: bool,
}

impl<'a, T> PollClaim<'a, T> {
    fn new(store: &'a SessionStore<T>, id: &'a SessionId) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T> Drop for PollClaim<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.store.abandon_poll(self.id);
        }
    }
}

/// Polls the session's mailbox once and caches the extracted code.
#[instrument(name = "poller::poll_and_cache", skip_all, fields(session_id = %id))]
pub(crate) async fn poll_and_cache<C: MailConnector>(shared: Arc<Shared<C>>, id: SessionId) {
    let mut claim = PollClaim::new(&shared.store, &id);

    let outcome = match poll_once(&shared, &id).await {
        Ok(PollOutcome::Captured) => {
            claim.disarm();
            return;
        }
        Ok(outcome) => outcome,
        Err(Error::SessionNotFound | Error::SessionUnrecoverable { .. }) => {
            debug!("Session gone, poll dropped");
            return;
        }
        Err(e) if e.is_transport() => {
            warn!(error = %e, "Poll aborted");
            PollOutcome::Aborted
        }
        Err(e) => {
            warn!(error = %e, "Poll failed");
            return;
        }
    };

    debug!(?outcome, "Poll finished without a code");
    match shared.store.finish_poll(&id, outcome) {
        Ok(()) => claim.disarm(),
        Err(_) => debug!("Session removed before the outcome was recorded"),
    }
}

async fn poll_once<C: MailConnector>(shared: &Shared<C>, id: &SessionId) -> Result<PollOutcome> {
    let session = shared.store.get(id)?;
    let mut guard = session.lock_connection().await;

    liveness::ensure_live(&shared.connector, &shared.store, &session, &mut guard).await?;

    let connection = guard.get_mut().ok_or(Error::SessionNotFound)?;
    let poll = &shared.config.poll;
    let sender = poll.sender_filter.sender();

    connection.select_mailbox(&poll.mailbox, true).await?;
    let uids = connection.search(&poll.sender_filter.criteria()).await?;

    debug!(candidates = uids.len(), "Scanning candidates");

    let mut html = None;
    let mut matched = false;
    let limit = poll.max_scan.unwrap_or(usize::MAX);
    for &uid in uids.iter().rev().take(limit) {
        let raw = connection.fetch(uid).await?;
        let message = match decode_message(&raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(uid, error = %e, "Skipping undecodable message");
                continue;
            }
        };

        if message.is_from(sender) {
            debug!(uid, "Found latest message from sender");
            matched = true;
            html = message.html;
            break;
        }
    }

    if !matched {
        return Ok(PollOutcome::NoMessage);
    }

    let Some(code) = html
        .as_deref()
        .and_then(|html| poll.matcher.find_match(html))
        .map(|code| code.into_owned())
    else {
        return Ok(PollOutcome::NoCode);
    };

    shared.store.set_cache(id, code, Instant::now())?;
    info!("Code captured");
    Ok(PollOutcome::Captured)
}
