use std::{sync::Arc, time::Duration};

use dvpn_common::db::DbPool;
use dvpn_core::session_registry::SessionRegistry;
use dvpn_ledger::Ledger;
use dvpn_vpn::VpnService;
use humantime::format_duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

use crate::{error::SessionManagerError, quota::enforce_quotas, sync::sync_sessions};

pub mod error;
pub mod quota;
pub mod sync;

/// Periodically disconnects peers which exceeded their quota or have no session.
///
/// Any VPN service or database failure ends the loop.
#[instrument(skip_all)]
pub async fn run_quota_enforcement<V>(
    pool: DbPool,
    sessions: Arc<SessionRegistry>,
    vpn: Arc<V>,
    interval: Duration,
) -> Result<(), SessionManagerError>
where
    V: VpnService + Send + Sync + 'static,
{
    info!(
        "Starting quota enforcement every {}",
        format_duration(interval)
    );
    loop {
        debug!("Enforcing session quotas");
        enforce_quotas(&pool, &sessions, &*vpn)
            .await
            .inspect_err(|err| error!("Quota enforcement failed: {err}"))?;

        sleep(interval).await;
    }
}

/// Periodically removes sessions ended on the ledger and reports usage of the remaining ones.
///
/// Any ledger, VPN service or database failure ends the loop.
#[instrument(skip_all)]
pub async fn run_session_sync<L, V>(
    pool: DbPool,
    sessions: Arc<SessionRegistry>,
    ledger: Arc<L>,
    vpn: Arc<V>,
    interval: Duration,
) -> Result<(), SessionManagerError>
where
    L: Ledger + Send + Sync + 'static,
    V: VpnService + Send + Sync + 'static,
{
    info!(
        "Starting session synchronization every {}",
        format_duration(interval)
    );
    loop {
        debug!("Synchronizing sessions with the ledger");
        sync_sessions(&pool, &sessions, &*ledger, &*vpn)
            .await
            .inspect_err(|err| error!("Session synchronization failed: {err}"))?;

        sleep(interval).await;
    }
}
