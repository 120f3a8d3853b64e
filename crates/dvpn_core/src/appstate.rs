use std::{sync::Arc, time::Duration};

use dvpn_common::{config::NodeConfig, db::DbPool};

use crate::session_registry::SessionRegistry;

/// Node settings exposed to request handlers.
#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub moniker: String,
    pub price: String,
    pub max_peers: usize,
    pub quota_check_interval: Duration,
    pub session_sync_interval: Duration,
    pub node_status_interval: Duration,
}

impl From<&NodeConfig> for NodeSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            moniker: config.moniker.clone(),
            price: config.price.clone(),
            max_peers: config.max_peers,
            quota_check_interval: config.quota_check_interval.into(),
            session_sync_interval: config.session_sync_interval.into(),
            node_status_interval: config.node_status_interval.into(),
        }
    }
}

pub struct AppState<L, V> {
    pub pool: DbPool,
    pub sessions: Arc<SessionRegistry>,
    pub ledger: Arc<L>,
    pub vpn: Arc<V>,
    pub settings: Arc<NodeSettings>,
}

// derive would require `L: Clone` and `V: Clone`
impl<L, V> Clone for AppState<L, V> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            sessions: Arc::clone(&self.sessions),
            ledger: Arc::clone(&self.ledger),
            vpn: Arc::clone(&self.vpn),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<L, V> AppState<L, V> {
    #[must_use]
    pub fn new(
        pool: DbPool,
        sessions: Arc<SessionRegistry>,
        ledger: Arc<L>,
        vpn: Arc<V>,
        settings: NodeSettings,
    ) -> Self {
        Self {
            pool,
            sessions,
            ledger,
            vpn,
            settings: Arc::new(settings),
        }
    }
}
