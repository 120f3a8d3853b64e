use dvpn_common::db::DbPool;
use dvpn_core::session_registry::SessionRegistry;
use dvpn_vpn::VpnService;
use tracing::{debug, trace, warn};

use crate::error::SessionManagerError;

/// Single quota enforcement pass over peers currently connected to the VPN service.
///
/// Traffic counters of known peers are copied into their sessions. Peers without a session
/// and peers which used up their quota are disconnected. Sessions themselves are left in place,
/// finalizing them is up to the session sync job.
pub async fn enforce_quotas<V>(
    pool: &DbPool,
    sessions: &SessionRegistry,
    vpn: &V,
) -> Result<(), SessionManagerError>
where
    V: VpnService + Sync,
{
    let peers = vpn.peers().await?;
    debug!("Checking quota of {} connected peers", peers.len());

    for peer in peers {
        let key = peer.key();
        let Some(session) = sessions.update_usage(&key, peer.upload, peer.download) else {
            warn!("Peer {key} is connected without a session, removing it");
            vpn.remove_peer(&peer.identity).await?;
            continue;
        };
        session.update_usage(pool).await?;
        trace!(
            "Session {session} consumed {} of {} available bytes",
            session.consumed(),
            session.available
        );

        if session.quota_exceeded() {
            warn!(
                "Session {session} exceeded its quota of {} bytes, removing peer {key}",
                session.available
            );
            vpn.remove_peer(&peer.identity).await?;
        }
    }

    Ok(())
}
