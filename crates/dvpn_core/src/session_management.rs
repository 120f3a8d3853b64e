use base64::prelude::{BASE64_STANDARD, Engine};
use dvpn_common::db::{DbPool, models::Session};
use dvpn_vpn::{VpnError, VpnService};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session_registry::SessionRegistry;

#[derive(Debug, Error)]
pub enum SessionManagementError {
    #[error("Invalid session key {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Vpn(#[from] VpnError),
    #[error(transparent)]
    DbError(#[from] SqlxError),
}

/// Removes the VPN peer behind `key` and deletes its session from the registry and database.
pub async fn remove_peer_and_session<V>(
    pool: &DbPool,
    sessions: &SessionRegistry,
    vpn: &V,
    key: &str,
) -> Result<(), SessionManagementError>
where
    V: VpnService + Sync,
{
    debug!("Removing peer and session {key}");
    let identity = BASE64_STANDARD
        .decode(key)
        .map_err(|_| SessionManagementError::InvalidKey(key.into()))?;
    vpn.remove_peer(&identity).await?;

    let removed = sessions.delete(key);
    let deleted = Session::delete_by_key(pool, key).await?;
    match removed {
        Some(session) => info!("Removed peer and session {session}"),
        None if deleted => info!("Removed peer and stored session {key}"),
        None => debug!("Removed peer {key} without session"),
    }
    Ok(())
}

/// Hands identities of stored sessions to the VPN service so it can rebuild its peer state
/// after a restart. Sessions with undecodable keys are skipped.
pub async fn restore_peers<V>(sessions: &SessionRegistry, vpn: &V) -> Result<usize, VpnError>
where
    V: VpnService + Sync,
{
    let mut identities = Vec::with_capacity(sessions.len());
    sessions.iterate(|session| match BASE64_STANDARD.decode(&session.key) {
        Ok(identity) => identities.push(identity),
        Err(err) => warn!("Not restoring peer of session {session}: {err}"),
    });

    let restored = vpn.restore_peers(&identities).await?;
    info!(
        "Restored {restored} VPN peers for {} stored sessions",
        identities.len()
    );
    Ok(restored)
}
