//! Access to the ledger recording nodes, subscriptions, sessions and quotas.

pub mod client;
pub mod error;
pub mod tx;
pub mod types;

pub use client::{LedgerClient, LedgerConfig};
pub use error::LedgerError;

use crate::types::{
    Account, LedgerSession, Node, Quota, SessionUsage, Status, Subscription, TxResponse,
};

/// Ledger operations the node depends on.
///
/// Queries return `Ok(None)` when the ledger has no such record and `Err` when the
/// ledger could not be reached.
#[trait_variant::make(Send)]
pub trait Ledger {
    /// Address of the node account used to sign transactions.
    fn address(&self) -> &str;

    async fn query_account(&self, address: &str) -> Result<Option<Account>, LedgerError>;

    async fn query_node(&self, address: &str) -> Result<Option<Node>, LedgerError>;

    async fn query_session(&self, id: u64) -> Result<Option<LedgerSession>, LedgerError>;

    async fn query_subscription(&self, id: u64) -> Result<Option<Subscription>, LedgerError>;

    async fn query_quota(
        &self,
        subscription_id: u64,
        address: &str,
    ) -> Result<Option<Quota>, LedgerError>;

    /// Checks if a node is part of a plan.
    async fn query_plan_has_node(
        &self,
        plan_id: u64,
        node_address: &str,
    ) -> Result<bool, LedgerError>;

    /// Report usage of multiple sessions in a single transaction.
    async fn update_sessions(&self, sessions: Vec<SessionUsage>)
    -> Result<TxResponse, LedgerError>;

    async fn update_node_status(&self, status: Status) -> Result<TxResponse, LedgerError>;
}
