//! Idle session expiry.

use crate::manager::Shared;
use crate::provider::{MailConnection, MailConnector};
use crate::store::Session;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument};

/// Spawns the sweep loop. It runs until the returned handle is aborted.
pub(crate) fn spawn<C: MailConnector>(shared: Arc<Shared<C>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.session.reap_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can be idle yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            reap_idle(&shared).await;
        }
    })
}

/// Removes every session idle longer than the configured expiry, then closes each
/// removed connection in its own task. Returns how many sessions were reaped.
///
/// The sweep never waits on a connection: a session whose poll is still fetching is
/// removed from the map at once and closed when the poll lets go of it.
#[instrument(name = "reaper::reap_idle", skip_all)]
pub(crate) async fn reap_idle<C: MailConnector>(shared: &Shared<C>) -> usize {
    let expiry = shared.config.session.idle_expiry;
    let now = Instant::now();

    let reaped: Vec<_> = shared
        .store
        .snapshot()
        .into_iter()
        .filter(|session| session.idle_for(now) > expiry)
        .filter_map(|session| shared.store.remove(session.id()))
        .collect();

    for session in &reaped {
        info!(session_id = %session.id(), "Reaped idle session");
        tokio::spawn(close_retired(Arc::clone(session)));
    }

    if !reaped.is_empty() {
        debug!(
            reaped = reaped.len(),
            remaining = shared.store.len(),
            "Sweep complete"
        );
    }
    reaped.len()
}

async fn close_retired<T: MailConnection>(session: Arc<Session<T>>) {
    let mut guard = session.lock_connection().await;
    if let Some(mut connection) = guard.retire() {
        if let Err(e) = connection.close().await {
            debug!(session_id = %session.id(), error = %e, "Logout failed, ignoring");
        }
    }
}
