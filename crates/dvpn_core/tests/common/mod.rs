#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::serve;
use base64::prelude::{BASE64_STANDARD, Engine};
use chrono::{DateTime, Utc};
use dvpn_common::{
    config::VpnBackendKind,
    db::{DbPool, setup_pool},
};
use dvpn_core::{
    appstate::{AppState, NodeSettings},
    build_webapp,
    session_registry::SessionRegistry,
};
use dvpn_ledger::{
    Ledger, LedgerError,
    types::{
        Account, Bandwidth, LedgerSession, Node, Quota, SessionUsage, Status, Subscription,
        TxResponse,
    },
};
use dvpn_vpn::{PeerStats, VpnError, VpnService};
use ed25519_dalek::{Signer, SigningKey};
use reqwest::Client;
use tokio::net::TcpListener;

pub const NODE_ADDRESS: &str = "dvpn1node";
pub const ACCOUNT_ADDRESS: &str = "dvpn1alice";
pub const SESSION_ID: u64 = 7;
pub const SUBSCRIPTION_ID: u64 = 3;
pub const PLAN_ID: u64 = 9;

#[derive(Default)]
pub struct FakeLedger {
    pub accounts: Mutex<HashMap<String, Account>>,
    pub sessions: Mutex<HashMap<u64, LedgerSession>>,
    pub subscriptions: Mutex<HashMap<u64, Subscription>>,
    pub quotas: Mutex<HashMap<(u64, String), Quota>>,
    pub plan_nodes: Mutex<HashSet<(u64, String)>>,
    pub usage_reports: Mutex<Vec<Vec<SessionUsage>>>,
    pub status_updates: Mutex<Vec<Status>>,
    /// Node status updates start failing once this many went through.
    pub failing_status_after: Option<usize>,
}

impl Ledger for FakeLedger {
    fn address(&self) -> &str {
        NODE_ADDRESS
    }

    async fn query_account(&self, address: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self.accounts.lock().unwrap().get(address).cloned())
    }

    async fn query_node(&self, _address: &str) -> Result<Option<Node>, LedgerError> {
        Ok(None)
    }

    async fn query_session(&self, id: u64) -> Result<Option<LedgerSession>, LedgerError> {
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn query_subscription(&self, id: u64) -> Result<Option<Subscription>, LedgerError> {
        Ok(self.subscriptions.lock().unwrap().get(&id).cloned())
    }

    async fn query_quota(
        &self,
        subscription_id: u64,
        address: &str,
    ) -> Result<Option<Quota>, LedgerError> {
        Ok(self
            .quotas
            .lock()
            .unwrap()
            .get(&(subscription_id, address.to_string()))
            .cloned())
    }

    async fn query_plan_has_node(
        &self,
        plan_id: u64,
        node_address: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .plan_nodes
            .lock()
            .unwrap()
            .contains(&(plan_id, node_address.to_string())))
    }

    async fn update_sessions(
        &self,
        sessions: Vec<SessionUsage>,
    ) -> Result<TxResponse, LedgerError> {
        self.usage_reports.lock().unwrap().push(sessions);
        Ok(TxResponse::default())
    }

    async fn update_node_status(&self, status: Status) -> Result<TxResponse, LedgerError> {
        let mut updates = self.status_updates.lock().unwrap();
        if self
            .failing_status_after
            .is_some_and(|limit| updates.len() >= limit)
        {
            return Err(LedgerError::NoEndpoints);
        }
        updates.push(status);
        Ok(TxResponse::default())
    }
}

#[derive(Default)]
pub struct FakeVpn {
    pub added: Mutex<Vec<Vec<u8>>>,
    pub removed: Mutex<Vec<Vec<u8>>>,
    pub restored: Mutex<Vec<Vec<u8>>>,
}

impl VpnService for FakeVpn {
    fn kind(&self) -> VpnBackendKind {
        VpnBackendKind::Wireguard
    }

    fn info(&self) -> Vec<u8> {
        vec![0xAB, 0xCD]
    }

    async fn add_peer(&self, identity: &[u8]) -> Result<Vec<u8>, VpnError> {
        self.added.lock().unwrap().push(identity.to_vec());
        Ok(vec![10, 8, 0, 2])
    }

    async fn remove_peer(&self, identity: &[u8]) -> Result<(), VpnError> {
        self.removed.lock().unwrap().push(identity.to_vec());
        Ok(())
    }

    async fn peers(&self) -> Result<Vec<PeerStats>, VpnError> {
        Ok(Vec::new())
    }

    fn peers_count(&self) -> usize {
        self.added
            .lock()
            .unwrap()
            .len()
            .saturating_sub(self.removed.lock().unwrap().len())
    }

    async fn restore_peers(&self, known: &[Vec<u8>]) -> Result<usize, VpnError> {
        self.restored.lock().unwrap().extend_from_slice(known);
        Ok(known.len())
    }
}

pub fn status_at() -> DateTime<Utc> {
    "2024-05-01T10:00:00Z".parse().unwrap()
}

pub fn account_key() -> SigningKey {
    SigningKey::from_bytes(&[5; 32])
}

/// Ledger holding an active session of [`ACCOUNT_ADDRESS`] on a plan including this node.
pub fn ledger_with_session(allocated: i64, consumed: i64) -> FakeLedger {
    let ledger = FakeLedger::default();
    ledger.accounts.lock().unwrap().insert(
        ACCOUNT_ADDRESS.into(),
        Account {
            address: ACCOUNT_ADDRESS.into(),
            pub_key: Some(BASE64_STANDARD.encode(account_key().verifying_key().as_bytes())),
            account_number: 1,
            sequence: 0,
        },
    );
    ledger.sessions.lock().unwrap().insert(
        SESSION_ID,
        LedgerSession {
            id: SESSION_ID,
            subscription_id: SUBSCRIPTION_ID,
            node_address: NODE_ADDRESS.into(),
            address: ACCOUNT_ADDRESS.into(),
            bandwidth: Bandwidth::default(),
            duration_secs: 0,
            status: Status::Active,
            status_at: status_at(),
        },
    );
    ledger.subscriptions.lock().unwrap().insert(
        SUBSCRIPTION_ID,
        Subscription {
            id: SUBSCRIPTION_ID,
            address: ACCOUNT_ADDRESS.into(),
            node_address: None,
            plan_id: Some(PLAN_ID),
            status: Status::Active,
            status_at: status_at(),
        },
    );
    ledger.quotas.lock().unwrap().insert(
        (SUBSCRIPTION_ID, ACCOUNT_ADDRESS.into()),
        Quota {
            address: ACCOUNT_ADDRESS.into(),
            allocated,
            consumed,
        },
    );
    ledger
        .plan_nodes
        .lock()
        .unwrap()
        .insert((PLAN_ID, NODE_ADDRESS.into()));
    ledger
}

pub fn settings(max_peers: usize) -> NodeSettings {
    NodeSettings {
        moniker: "test-node".into(),
        price: "1000udvpn".into(),
        max_peers,
        quota_check_interval: Duration::from_secs(30),
        session_sync_interval: Duration::from_secs(120),
        node_status_interval: Duration::from_secs(3300),
    }
}

pub struct TestContext {
    pub pool: DbPool,
    pub sessions: Arc<SessionRegistry>,
    pub ledger: Arc<FakeLedger>,
    pub vpn: Arc<FakeVpn>,
    pub base_url: String,
    pub client: Client,
}

impl TestContext {
    pub async fn new(ledger: FakeLedger, max_peers: usize) -> Self {
        let pool = setup_pool().await;
        let sessions = Arc::new(SessionRegistry::new());
        let ledger = Arc::new(ledger);
        let vpn = Arc::new(FakeVpn::default());
        let appstate = AppState::new(
            pool.clone(),
            Arc::clone(&sessions),
            Arc::clone(&ledger),
            Arc::clone(&vpn),
            settings(max_peers),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = build_webapp(appstate);
        tokio::spawn(async move {
            serve(listener, app.into_make_service())
                .await
                .expect("server error");
        });

        Self {
            pool,
            sessions,
            ledger,
            vpn,
            base_url: format!("http://127.0.0.1:{port}"),
            client: Client::new(),
        }
    }

    /// Body of a correctly signed session request for `peer_key`.
    pub fn session_request(&self, id: u64, peer_key: &[u8]) -> serde_json::Value {
        let signature = account_key().sign(&id.to_be_bytes());
        serde_json::json!({
            "key": BASE64_STANDARD.encode(peer_key),
            "signature": BASE64_STANDARD.encode(signature.to_bytes()),
        })
    }

    pub async fn post_session(
        &self,
        address: &str,
        id: u64,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}/accounts/{address}/sessions/{id}", self.base_url))
            .json(body)
            .send()
            .await
            .unwrap()
    }
}
