mod common;

use std::{sync::Arc, time::Duration};

use base64::prelude::{BASE64_STANDARD, Engine};
use chrono::{TimeDelta, Utc};
use claims::{assert_err, assert_none, assert_ok, assert_some};
use dvpn_common::db::models::Session;
use dvpn_ledger::{LedgerError, types::Status};
use dvpn_session_manager::{
    error::SessionManagerError, quota::enforce_quotas, run_quota_enforcement, run_session_sync,
    sync::sync_sessions,
};

use self::common::{TestContext, identity, status_at};

#[tokio::test]
async fn test_quota_enforcement() {
    let context = TestContext::new().await;
    let now = Utc::now();
    context.add_session(1, 1, 1, 1_000, now).await;
    context.add_session(2, 1, 2, 1_000, now).await;

    context.vpn.connect(&identity(1), 200, 300);
    context.vpn.connect(&identity(2), 400, 600);
    // leaked peer without a session
    context.vpn.connect(&identity(3), 1, 1);

    assert_ok!(enforce_quotas(&context.pool, &context.sessions, &*context.vpn).await);

    assert_eq!(
        *context.vpn.removed.lock().unwrap(),
        vec![identity(2).to_vec(), identity(3).to_vec()]
    );

    // counters copied to registry and database
    let key = BASE64_STANDARD.encode(identity(1));
    let session = assert_some!(context.sessions.get(&key));
    assert_eq!((session.upload_bytes, session.download_bytes), (200, 300));
    let stored = assert_some!(Session::find_by_id(&context.pool, 1).await.unwrap());
    assert_eq!((stored.upload_bytes, stored.download_bytes), (200, 300));

    // exhausted session stays until the ledger ends it
    let key = BASE64_STANDARD.encode(identity(2));
    let session = assert_some!(context.sessions.get(&key));
    assert!(session.quota_exceeded());
    assert_some!(Session::find_by_key(&context.pool, &key).await.unwrap());
}

#[tokio::test]
async fn test_quota_enforcement_stops_on_vpn_failure() {
    let mut context = TestContext::new().await;
    Arc::get_mut(&mut context.vpn).unwrap().broken = true;

    let result = run_quota_enforcement(
        context.pool.clone(),
        Arc::clone(&context.sessions),
        Arc::clone(&context.vpn),
        Duration::from_millis(10),
    )
    .await;
    assert!(matches!(result, Err(SessionManagerError::VpnError(_))));
}

#[tokio::test]
async fn test_session_sync() {
    let context = TestContext::new().await;
    let before = status_at() - TimeDelta::hours(1);
    let after = Utc::now() - TimeDelta::minutes(10);

    // stale: no progress on the ledger since before it connected
    let stale = context.add_session(1, 10, 1, 1_000_000, before).await;
    // active and progressing
    let active = context.add_session(2, 10, 2, 1_000_000, after).await;
    // subscription already ended
    let ended = context.add_session(3, 20, 3, 1_000_000, after).await;

    context.sessions.update_usage(&stale.key, 100, 500_000);
    context.sessions.update_usage(&active.key, 100, 200);
    context.ledger.add_subscription(10, Status::Active);
    context.ledger.add_subscription(20, Status::Inactive);
    context.ledger.add_session(1, 10, Status::Active, 500_000);
    context.ledger.add_session(2, 10, Status::Active, 100);
    context.ledger.add_session(3, 20, Status::Active, 0);

    assert_ok!(
        sync_sessions(
            &context.pool,
            &context.sessions,
            &*context.ledger,
            &*context.vpn
        )
        .await
    );

    // stale and ended sessions removed with their peers
    assert_none!(context.sessions.get(&stale.key));
    assert_none!(context.sessions.get(&ended.key));
    assert_some!(context.sessions.get(&active.key));
    assert_none!(Session::find_by_id(&context.pool, 1).await.unwrap());
    assert_none!(Session::find_by_id(&context.pool, 3).await.unwrap());
    assert_some!(Session::find_by_id(&context.pool, 2).await.unwrap());
    let removed = context.vpn.removed.lock().unwrap().clone();
    assert_eq!(removed.len(), 2);
    assert!(removed.contains(&identity(1).to_vec()));
    assert!(removed.contains(&identity(3).to_vec()));

    // one transaction, ended subscription not reported
    let reports = context.ledger.usage_reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    let ids: Vec<u64> = reports[0].iter().map(|usage| usage.id).collect();
    assert_eq!(ids, [1, 2]);
    assert_eq!(reports[0][0].download, 500_000);
    assert_eq!(reports[0][1].upload, 100);
    assert!(reports[0][1].duration_secs >= 600);
}

#[tokio::test]
async fn test_session_sync_missing_on_ledger() {
    let context = TestContext::new().await;
    let session = context.add_session(1, 10, 1, 1_000, Utc::now()).await;
    context.ledger.add_subscription(10, Status::Active);

    assert_ok!(
        sync_sessions(
            &context.pool,
            &context.sessions,
            &*context.ledger,
            &*context.vpn
        )
        .await
    );

    assert_none!(context.sessions.get(&session.key));
    assert!(context.ledger.usage_reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_session_sync_without_sessions() {
    let context = TestContext::new().await;

    assert_ok!(
        sync_sessions(
            &context.pool,
            &context.sessions,
            &*context.ledger,
            &*context.vpn
        )
        .await
    );
    assert!(context.ledger.usage_reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_session_sync_invalid_key() {
    let context = TestContext::new().await;
    let mut session = Session::new(1, 10, "not base64!", "dvpn1alice", 1_000);
    session.save(&context.pool).await.unwrap();
    session.connected_at = Utc::now();
    context.sessions.set(session);

    assert_err!(
        sync_sessions(
            &context.pool,
            &context.sessions,
            &*context.ledger,
            &*context.vpn
        )
        .await
    );
}

#[tokio::test]
async fn test_quota_enforcement_fails_on_peer_removal() {
    let mut context = TestContext::new().await;
    Arc::get_mut(&mut context.vpn).unwrap().failing_removal = true;
    context.add_session(1, 1, 1, 1_000, Utc::now()).await;
    context.vpn.connect(&identity(1), 600, 600);

    let result = enforce_quotas(&context.pool, &context.sessions, &*context.vpn).await;
    assert!(matches!(result, Err(SessionManagerError::VpnError(_))));
    // peer and session are kept for the next pass
    assert_eq!(context.vpn.peers.lock().unwrap().len(), 1);
    assert_some!(context.sessions.get(&BASE64_STANDARD.encode(identity(1))));
}

#[tokio::test]
async fn test_quota_enforcement_fails_on_unknown_peer_removal() {
    let mut context = TestContext::new().await;
    Arc::get_mut(&mut context.vpn).unwrap().failing_removal = true;
    context.vpn.connect(&identity(3), 1, 1);

    let result = enforce_quotas(&context.pool, &context.sessions, &*context.vpn).await;
    assert!(matches!(result, Err(SessionManagerError::VpnError(_))));
    assert!(context.vpn.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_session_sync_fails_on_ledger_query() {
    let mut context = TestContext::new().await;
    Arc::get_mut(&mut context.ledger).unwrap().failing_queries = true;
    let session = context.add_session(1, 10, 1, 1_000, Utc::now()).await;

    let result = sync_sessions(
        &context.pool,
        &context.sessions,
        &*context.ledger,
        &*context.vpn,
    )
    .await;
    assert!(matches!(
        result,
        Err(SessionManagerError::LedgerError(LedgerError::NoEndpoints))
    ));
    // nothing removed or reported on a failed pass
    assert_some!(context.sessions.get(&session.key));
    assert!(context.vpn.removed.lock().unwrap().is_empty());
    assert!(context.ledger.usage_reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_session_sync_fails_on_usage_report() {
    let mut context = TestContext::new().await;
    Arc::get_mut(&mut context.ledger).unwrap().failing_updates = true;
    let session = context.add_session(1, 10, 1, 1_000, Utc::now()).await;
    context.ledger.add_subscription(10, Status::Active);
    context.ledger.add_session(1, 10, Status::Active, 0);

    let result = run_session_sync(
        context.pool.clone(),
        Arc::clone(&context.sessions),
        Arc::clone(&context.ledger),
        Arc::clone(&context.vpn),
        Duration::from_millis(10),
    )
    .await;
    assert!(matches!(result, Err(SessionManagerError::LedgerError(_))));
    assert_some!(context.sessions.get(&session.key));
    assert!(context.ledger.usage_reports.lock().unwrap().is_empty());
}
