//! Connection liveness checks with a single reconnection attempt.

use crate::error::{Error, Result};
use crate::provider::{MailConnection, MailConnector};
use crate::store::{ConnectionGuard, Session, SessionStore};
use tracing::{info, instrument, warn};

/// Result of a successful liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    /// The existing connection answered the probe.
    Alive,
    /// The probe failed and a fresh connection replaced the old one.
    Reconnected,
}

/// Makes sure the connection held by `guard` is usable.
///
/// Probes the connection; on failure, reconnects exactly once with the session's stored
/// credentials and swaps the new connection in place. If that reconnection fails too,
/// the session is removed from `store` and the slot is retired, so any later caller
/// sees it as gone.
///
/// # Errors
///
/// - [`Error::SessionNotFound`] if the session was already retired.
/// - [`Error::SessionUnrecoverable`] if the reconnection failed.
#[instrument(
    name = "liveness::ensure_live",
    skip_all,
    fields(session_id = %session.id(), email = %session.credentials().masked_email())
)]
pub(crate) async fn ensure_live<C: MailConnector>(
    connector: &C,
    store: &SessionStore<C::Connection>,
    session: &Session<C::Connection>,
    guard: &mut ConnectionGuard<'_, C::Connection>,
) -> Result<Liveness> {
    let Some(connection) = guard.get_mut() else {
        return Err(Error::SessionNotFound);
    };

    let probe_error = match connection.probe().await {
        Ok(()) => return Ok(Liveness::Alive),
        Err(e) => e,
    };

    warn!(error = %probe_error, "Liveness probe failed, reconnecting");

    match connector
        .connect(session.endpoint(), session.credentials())
        .await
    {
        Ok(fresh) => {
            // The old connection is already dead; dropping it is enough
            drop(guard.replace(fresh));
            info!("Session reconnected");
            Ok(Liveness::Reconnected)
        }
        Err(e) => {
            warn!(error = %e, "Reconnection failed, dropping session");
            store.remove(session.id());
            drop(guard.retire());
            Err(Error::SessionUnrecoverable {
                source: Box::new(e),
            })
        }
    }
}
