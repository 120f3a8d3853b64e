use std::time::Duration;

use base64::prelude::{BASE64_STANDARD, Engine};
use dvpn_common::config::NodeConfig;
use ed25519_dalek::SigningKey;
use reqwest::{Client, StatusCode, Url};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    Ledger,
    error::LedgerError,
    tx::{Fee, SignDoc, address_from_public_key, signing_key_from_base64},
    types::{
        Account, LedgerSession, Message, Node, Quota, SessionUsage, Status, Subscription,
        TxResponse,
    },
};

/// Connection, fee and retry settings of the ledger client.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub endpoints: Vec<Url>,
    pub chain_id: String,
    pub query_timeout: Duration,
    pub address_prefix: String,
    pub simulate_gas: bool,
    pub gas: u64,
    pub gas_adjustment: f64,
    pub gas_price: f64,
    pub fee_denom: String,
    pub tx_retry_attempts: u32,
    pub tx_retry_delay: Duration,
}

impl From<&NodeConfig> for LedgerConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            endpoints: config.ledger_rpc_endpoints.clone(),
            chain_id: config.ledger_chain_id.clone(),
            query_timeout: config.ledger_query_timeout.into(),
            address_prefix: config.ledger_address_prefix.clone(),
            simulate_gas: config.ledger_simulate_gas,
            gas: config.ledger_gas,
            gas_adjustment: config.ledger_gas_adjustment,
            gas_price: config.ledger_gas_price,
            fee_denom: config.ledger_fee_denom.clone(),
            tx_retry_attempts: config.ledger_tx_retry_attempts,
            tx_retry_delay: config.ledger_tx_retry_delay.into(),
        }
    }
}

#[derive(Serialize)]
struct TxRequest {
    tx: String,
}

#[derive(Deserialize)]
struct SimulateResponse {
    gas_used: u64,
}

/// Client of the ledger RPC gateway.
///
/// Queries and broadcasts fail over between configured endpoints in order.
/// The whole build-sign-broadcast sequence is serialized, so concurrent callers
/// never sign two transactions with the same account sequence.
pub struct LedgerClient {
    http: Client,
    config: LedgerConfig,
    signing_key: SigningKey,
    address: String,
    tx_lock: Mutex<()>,
}

impl LedgerClient {
    pub fn new(config: LedgerConfig, signing_key: SigningKey) -> Result<Self, LedgerError> {
        if config.endpoints.is_empty() {
            return Err(LedgerError::NoEndpoints);
        }
        let http = Client::builder().timeout(config.query_timeout).build()?;
        let address =
            address_from_public_key(&config.address_prefix, &signing_key.verifying_key());
        info!(
            "Initialized ledger client for {address} using {} RPC endpoint(s)",
            config.endpoints.len()
        );
        Ok(Self {
            http,
            config,
            signing_key,
            address,
            tx_lock: Mutex::new(()),
        })
    }

    /// Builds a client from node configuration.
    pub fn from_config(config: &NodeConfig) -> Result<Self, LedgerError> {
        let signing_key = signing_key_from_base64(config.ledger_signing_key.expose_secret())?;
        Self::new(LedgerConfig::from(config), signing_key)
    }

    fn url(endpoint: &Url, path: &str) -> String {
        format!(
            "{}/{}",
            endpoint.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Query a resource, `Ok(None)` means the ledger does not know it.
    async fn query<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, LedgerError> {
        let mut last_error = String::new();
        for endpoint in &self.config.endpoints {
            let url = Self::url(endpoint, path);
            debug!("Querying ledger {url}");
            let response = match self.http.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!("Ledger query {url} failed: {err}");
                    last_error = err.to_string();
                    continue;
                }
            };
            match response.status() {
                StatusCode::NOT_FOUND => return Ok(None),
                status if status.is_success() => match response.json::<T>().await {
                    Ok(value) => return Ok(Some(value)),
                    Err(err) => {
                        warn!("Invalid response to ledger query {url}: {err}");
                        last_error = err.to_string();
                    }
                },
                status => {
                    warn!("Ledger query {url} returned {status}");
                    last_error = format!("{url} returned {status}");
                }
            }
        }

        Err(LedgerError::EndpointsExhausted(last_error))
    }

    /// Estimate gas needed by `tx_bytes` using the first endpoint that answers.
    async fn simulate(&self, tx_bytes: &[u8]) -> Result<u64, LedgerError> {
        let request = TxRequest {
            tx: BASE64_STANDARD.encode(tx_bytes),
        };
        let mut last_error = String::new();
        for endpoint in &self.config.endpoints {
            let url = Self::url(endpoint, "simulate");
            let result = match self.http.post(&url).json(&request).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => response.json::<SimulateResponse>().await,
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };
            match result {
                Ok(simulated) => {
                    debug!("Simulated transaction using {} gas", simulated.gas_used);
                    return Ok(simulated.gas_used);
                }
                Err(err) => {
                    warn!("Gas simulation using {url} failed: {err}");
                    last_error = err.to_string();
                }
            }
        }

        Err(LedgerError::EndpointsExhausted(last_error))
    }

    /// Submit signed transaction bytes, trying endpoints in order until one accepts them.
    pub async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<TxResponse, LedgerError> {
        let request = TxRequest {
            tx: BASE64_STANDARD.encode(tx_bytes),
        };
        let mut last_error = LedgerError::NoEndpoints;
        for endpoint in &self.config.endpoints {
            let url = Self::url(endpoint, "broadcast_tx_sync");
            let result = match self.http.post(&url).json(&request).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => response.json::<TxResponse>().await,
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };
            match result {
                Ok(response) if response.is_success() => {
                    info!("Broadcast transaction {} using {url}", response.txhash);
                    return Ok(response);
                }
                Ok(response) => {
                    warn!(
                        "Transaction broadcast using {url} rejected with code {}: {}",
                        response.code, response.log
                    );
                    last_error = LedgerError::TxRejected {
                        code: response.code,
                        log: response.log,
                    };
                }
                Err(err) => {
                    warn!("Transaction broadcast using {url} failed: {err}");
                    last_error = LedgerError::Http(err);
                }
            }
        }

        Err(last_error)
    }

    /// Build, sign and broadcast a single transaction carrying `messages`.
    ///
    /// Each attempt fetches a fresh account sequence, so a broadcast rejected
    /// because of a stale sequence succeeds on a later attempt.
    pub async fn tx(&self, messages: Vec<Message>) -> Result<TxResponse, LedgerError> {
        let _guard = self.tx_lock.lock().await;
        let attempts = self.config.tx_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.try_tx(&messages).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt >= attempts => {
                    error!("Transaction failed after {attempt} attempts: {err}");
                    return Err(LedgerError::RetriesExhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!("Transaction attempt {attempt}/{attempts} failed: {err}");
                    attempt += 1;
                    sleep(self.config.tx_retry_delay).await;
                }
            }
        }
    }

    async fn try_tx(&self, messages: &[Message]) -> Result<TxResponse, LedgerError> {
        let account = self
            .query::<Account>(&format!("accounts/{}", self.address))
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(self.address.clone()))?;

        let mut gas_limit = self.config.gas;
        if self.config.simulate_gas {
            let tx_bytes = self
                .sign_doc(&account, gas_limit, messages)
                .sign(&self.signing_key)?
                .encode()?;
            let gas_used = self.simulate(&tx_bytes).await?;
            gas_limit = (gas_used as f64 * self.config.gas_adjustment).ceil() as u64;
        }

        let tx = self
            .sign_doc(&account, gas_limit, messages)
            .sign(&self.signing_key)?;
        debug!(
            "Signed transaction with {} message(s) at sequence {}",
            messages.len(),
            account.sequence
        );
        self.broadcast_tx(&tx.encode()?).await
    }

    fn sign_doc(&self, account: &Account, gas_limit: u64, messages: &[Message]) -> SignDoc {
        SignDoc {
            chain_id: self.config.chain_id.clone(),
            account_number: account.account_number,
            sequence: account.sequence,
            fee: Fee::from_gas(gas_limit, self.config.gas_price, &self.config.fee_denom),
            memo: String::new(),
            messages: messages.to_vec(),
        }
    }
}

impl Ledger for LedgerClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn query_account(&self, address: &str) -> Result<Option<Account>, LedgerError> {
        self.query(&format!("accounts/{address}")).await
    }

    async fn query_node(&self, address: &str) -> Result<Option<Node>, LedgerError> {
        self.query(&format!("nodes/{address}")).await
    }

    async fn query_session(&self, id: u64) -> Result<Option<LedgerSession>, LedgerError> {
        self.query(&format!("sessions/{id}")).await
    }

    async fn query_subscription(&self, id: u64) -> Result<Option<Subscription>, LedgerError> {
        self.query(&format!("subscriptions/{id}")).await
    }

    async fn query_quota(
        &self,
        subscription_id: u64,
        address: &str,
    ) -> Result<Option<Quota>, LedgerError> {
        self.query(&format!("subscriptions/{subscription_id}/quotas/{address}"))
            .await
    }

    async fn query_plan_has_node(
        &self,
        plan_id: u64,
        node_address: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .query::<Node>(&format!("plans/{plan_id}/nodes/{node_address}"))
            .await?
            .is_some())
    }

    async fn update_sessions(
        &self,
        sessions: Vec<SessionUsage>,
    ) -> Result<TxResponse, LedgerError> {
        let messages = sessions
            .iter()
            .map(|usage| Message::update_session(&self.address, usage))
            .collect();
        self.tx(messages).await
    }

    async fn update_node_status(&self, status: Status) -> Result<TxResponse, LedgerError> {
        self.tx(vec![Message::UpdateNodeStatus {
            from: self.address.clone(),
            status,
        }])
        .await
    }
}
