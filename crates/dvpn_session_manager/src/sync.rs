use chrono::Utc;
use dvpn_common::db::{DbPool, models::Session};
use dvpn_core::{session_management::remove_peer_and_session, session_registry::SessionRegistry};
use dvpn_ledger::{
    Ledger,
    types::{LedgerSession, SessionUsage, Status},
};
use dvpn_vpn::VpnService;
use tracing::{debug, info, trace, warn};

use crate::error::SessionManagerError;

/// Outcome of comparing a local session with its ledger counterpart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    Keep,
    Remove { report: bool },
}

/// Decides what to do with a local session given ledger state, first matching rule wins.
///
/// A missing ledger session is handled like an `Inactive` one.
#[must_use]
pub fn sync_action(
    session: &Session,
    subscription_status: Status,
    ledger_session: Option<&LedgerSession>,
) -> SyncAction {
    if !subscription_status.is_active() {
        return SyncAction::Remove {
            report: subscription_status != Status::Inactive,
        };
    }

    let Some(ledger_session) = ledger_session else {
        return SyncAction::Remove { report: false };
    };
    if !ledger_session.status.is_active() {
        return SyncAction::Remove {
            report: ledger_session.status != Status::Inactive,
        };
    }

    // ledger saw no progress since before this session was connected
    if session.download_bytes == ledger_session.bandwidth.upload
        && session.connected_at < ledger_session.status_at
    {
        return SyncAction::Remove { report: true };
    }

    SyncAction::Keep
}

fn session_usage(session: &Session) -> SessionUsage {
    let duration = Utc::now().signed_duration_since(session.connected_at);
    SessionUsage {
        id: session.ledger_id(),
        duration_secs: u64::try_from(duration.num_seconds()).unwrap_or_default(),
        upload: session.upload_bytes,
        download: session.download_bytes,
    }
}

/// Single synchronization pass of local sessions against the ledger.
///
/// Sessions whose subscription or ledger session is no longer active are removed together with
/// their peers. Usage of all other sessions is reported to the ledger in one transaction.
pub async fn sync_sessions<L, V>(
    pool: &DbPool,
    sessions: &SessionRegistry,
    ledger: &L,
    vpn: &V,
) -> Result<(), SessionManagerError>
where
    L: Ledger + Sync,
    V: VpnService + Sync,
{
    let snapshot = sessions.snapshot();
    debug!("Synchronizing {} sessions with the ledger", snapshot.len());

    let mut usages = Vec::with_capacity(snapshot.len());
    for session in snapshot.iter().rev() {
        let subscription_status = ledger
            .query_subscription(session.subscription_id as u64)
            .await?
            .map_or(Status::Inactive, |subscription| subscription.status);
        let ledger_session = ledger.query_session(session.ledger_id()).await?;

        let action = sync_action(session, subscription_status, ledger_session.as_ref());
        trace!("Session {session}: {action:?}");
        match action {
            SyncAction::Keep => usages.push(session_usage(session)),
            SyncAction::Remove { report } => {
                warn!("Session {session} is no longer active on the ledger, removing it");
                remove_peer_and_session(pool, sessions, vpn, &session.key).await?;
                if report {
                    usages.push(session_usage(session));
                }
            }
        }
    }

    if usages.is_empty() {
        debug!("No session usage to report");
        return Ok(());
    }

    // report in connection order
    usages.reverse();
    let count = usages.len();
    let response = ledger.update_sessions(usages).await?;
    info!(
        "Reported usage of {count} sessions in transaction {}",
        response.txhash
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta};
    use dvpn_ledger::types::Bandwidth;

    use super::*;

    fn status_at() -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse().unwrap()
    }

    fn ledger_session(status: Status, upload: i64) -> LedgerSession {
        LedgerSession {
            id: 1,
            subscription_id: 1,
            node_address: "dvpn1node".into(),
            address: "dvpn1alice".into(),
            bandwidth: Bandwidth {
                upload,
                download: 0,
            },
            duration_secs: 0,
            status,
            status_at: status_at(),
        }
    }

    fn local_session(download: i64, connected_at: DateTime<Utc>) -> Session {
        let mut session = Session::new(1, 1, "a2V5MQ==", "dvpn1alice", 1_000_000);
        session.set_usage(100, download);
        session.connected_at = connected_at;
        session
    }

    #[test]
    fn test_inactive_subscription_is_not_reported() {
        let session = local_session(10, status_at());
        let remote = ledger_session(Status::Active, 0);
        assert_eq!(
            sync_action(&session, Status::Inactive, Some(&remote)),
            SyncAction::Remove { report: false }
        );
        assert_eq!(
            sync_action(&session, Status::InactivePending, Some(&remote)),
            SyncAction::Remove { report: true }
        );
    }

    #[test]
    fn test_inactive_session() {
        let session = local_session(10, status_at());
        assert_eq!(
            sync_action(
                &session,
                Status::Active,
                Some(&ledger_session(Status::Inactive, 0))
            ),
            SyncAction::Remove { report: false }
        );
        assert_eq!(
            sync_action(
                &session,
                Status::Active,
                Some(&ledger_session(Status::InactivePending, 0))
            ),
            SyncAction::Remove { report: true }
        );
        assert_eq!(
            sync_action(&session, Status::Active, None),
            SyncAction::Remove { report: false }
        );
    }

    #[test]
    fn test_stale_session_compares_local_download_with_ledger_upload() {
        let remote = ledger_session(Status::Active, 500_000);
        let before = status_at() - TimeDelta::minutes(5);
        let after = status_at() + TimeDelta::minutes(5);

        assert_eq!(
            sync_action(&local_session(500_000, before), Status::Active, Some(&remote)),
            SyncAction::Remove { report: true }
        );
        // connected after the last ledger update
        assert_eq!(
            sync_action(&local_session(500_000, after), Status::Active, Some(&remote)),
            SyncAction::Keep
        );
        // traffic moved since the last report
        assert_eq!(
            sync_action(&local_session(600_000, before), Status::Active, Some(&remote)),
            SyncAction::Keep
        );
    }

    #[test]
    fn test_usage_duration() {
        let session = local_session(10, Utc::now() - TimeDelta::seconds(90));
        let usage = session_usage(&session);
        assert!((90..=91).contains(&usage.duration_secs));
        assert_eq!(usage.upload, 100);
        assert_eq!(usage.download, 10);

        let session = local_session(10, Utc::now() + TimeDelta::seconds(90));
        assert_eq!(session_usage(&session).duration_secs, 0);
    }
}
