#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use base64::prelude::{BASE64_STANDARD, Engine};
use chrono::{DateTime, Utc};
use dvpn_common::{
    config::VpnBackendKind,
    db::{DbPool, models::Session, setup_pool},
};
use dvpn_core::session_registry::SessionRegistry;
use dvpn_ledger::{
    Ledger, LedgerError,
    types::{
        Account, Bandwidth, LedgerSession, Node, Quota, SessionUsage, Status, Subscription,
        TxResponse,
    },
};
use dvpn_vpn::{PeerStats, VpnError, VpnService};

pub const NODE_ADDRESS: &str = "dvpn1node";

#[derive(Default)]
pub struct FakeLedger {
    pub sessions: Mutex<HashMap<u64, LedgerSession>>,
    pub subscriptions: Mutex<HashMap<u64, Subscription>>,
    pub usage_reports: Mutex<Vec<Vec<SessionUsage>>>,
    pub failing_queries: bool,
    pub failing_updates: bool,
}

impl FakeLedger {
    pub fn add_subscription(&self, id: u64, status: Status) {
        self.subscriptions.lock().unwrap().insert(
            id,
            Subscription {
                id,
                address: "dvpn1alice".into(),
                node_address: Some(NODE_ADDRESS.into()),
                plan_id: None,
                status,
                status_at: status_at(),
            },
        );
    }

    pub fn add_session(&self, id: u64, subscription_id: u64, status: Status, upload: i64) {
        self.sessions.lock().unwrap().insert(
            id,
            LedgerSession {
                id,
                subscription_id,
                node_address: NODE_ADDRESS.into(),
                address: "dvpn1alice".into(),
                bandwidth: Bandwidth {
                    upload,
                    download: 0,
                },
                duration_secs: 0,
                status,
                status_at: status_at(),
            },
        );
    }
}

impl Ledger for FakeLedger {
    fn address(&self) -> &str {
        NODE_ADDRESS
    }

    async fn query_account(&self, _address: &str) -> Result<Option<Account>, LedgerError> {
        Ok(None)
    }

    async fn query_node(&self, _address: &str) -> Result<Option<Node>, LedgerError> {
        Ok(None)
    }

    async fn query_session(&self, id: u64) -> Result<Option<LedgerSession>, LedgerError> {
        if self.failing_queries {
            return Err(LedgerError::NoEndpoints);
        }
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn query_subscription(&self, id: u64) -> Result<Option<Subscription>, LedgerError> {
        if self.failing_queries {
            return Err(LedgerError::NoEndpoints);
        }
        Ok(self.subscriptions.lock().unwrap().get(&id).cloned())
    }

    async fn query_quota(
        &self,
        _subscription_id: u64,
        _address: &str,
    ) -> Result<Option<Quota>, LedgerError> {
        Ok(None)
    }

    async fn query_plan_has_node(
        &self,
        _plan_id: u64,
        _node_address: &str,
    ) -> Result<bool, LedgerError> {
        Ok(false)
    }

    async fn update_sessions(
        &self,
        sessions: Vec<SessionUsage>,
    ) -> Result<TxResponse, LedgerError> {
        if self.failing_updates {
            return Err(LedgerError::NoEndpoints);
        }
        self.usage_reports.lock().unwrap().push(sessions);
        Ok(TxResponse::default())
    }

    async fn update_node_status(&self, _status: Status) -> Result<TxResponse, LedgerError> {
        Ok(TxResponse::default())
    }
}

/// VPN service reporting a fixed set of connected peers.
#[derive(Default)]
pub struct FakeVpn {
    pub peers: Mutex<Vec<PeerStats>>,
    pub removed: Mutex<Vec<Vec<u8>>>,
    pub broken: bool,
    pub failing_removal: bool,
}

impl FakeVpn {
    pub fn connect(&self, identity: &[u8], upload: i64, download: i64) {
        self.peers.lock().unwrap().push(PeerStats {
            identity: identity.to_vec(),
            upload,
            download,
        });
    }
}

impl VpnService for FakeVpn {
    fn kind(&self) -> VpnBackendKind {
        VpnBackendKind::Wireguard
    }

    fn info(&self) -> Vec<u8> {
        Vec::new()
    }

    async fn add_peer(&self, _identity: &[u8]) -> Result<Vec<u8>, VpnError> {
        Ok(Vec::new())
    }

    async fn remove_peer(&self, identity: &[u8]) -> Result<(), VpnError> {
        if self.failing_removal {
            return Err(VpnError::Command {
                command: "wg set wg0 peer remove".into(),
                stderr: "Operation not permitted".into(),
            });
        }
        self.peers
            .lock()
            .unwrap()
            .retain(|peer| peer.identity != identity);
        self.removed.lock().unwrap().push(identity.to_vec());
        Ok(())
    }

    async fn peers(&self) -> Result<Vec<PeerStats>, VpnError> {
        if self.broken {
            return Err(VpnError::Parse("unexpected output".into()));
        }
        Ok(self.peers.lock().unwrap().clone())
    }

    fn peers_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    async fn restore_peers(&self, _known: &[Vec<u8>]) -> Result<usize, VpnError> {
        Ok(0)
    }
}

pub fn status_at() -> DateTime<Utc> {
    "2024-05-01T10:00:00Z".parse().unwrap()
}

pub fn identity(n: u8) -> [u8; 32] {
    [n; 32]
}

pub struct TestContext {
    pub pool: DbPool,
    pub sessions: Arc<SessionRegistry>,
    pub ledger: Arc<FakeLedger>,
    pub vpn: Arc<FakeVpn>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self {
            pool: setup_pool().await,
            sessions: Arc::new(SessionRegistry::new()),
            ledger: Arc::new(FakeLedger::default()),
            vpn: Arc::new(FakeVpn::default()),
        }
    }

    /// Stores a session of peer `identity(n)` both in the database and in the registry.
    pub async fn add_session(
        &self,
        id: i64,
        subscription_id: i64,
        n: u8,
        available: i64,
        connected_at: DateTime<Utc>,
    ) -> Session {
        let mut session = Session::new(
            id,
            subscription_id,
            BASE64_STANDARD.encode(identity(n)),
            "dvpn1alice".into(),
            available,
        );
        session.connected_at = connected_at;
        session.save(&self.pool).await.unwrap();
        self.sessions.set(session.clone());
        session
    }
}
