use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
};
use base64::prelude::{BASE64_STANDARD, Engine};
use dvpn_common::db::models::Session;
use dvpn_ledger::{Ledger, tx::verify_signature, types::Subscription};
use dvpn_vpn::VpnService;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use super::{ApiResponse, ApiResult, WebError};
use crate::appstate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Base64 encoded peer identity.
    pub key: String,
    /// Base64 encoded signature of the big-endian session id.
    pub signature: String,
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, WebError> {
    BASE64_STANDARD
        .decode(value)
        .map_err(|err| WebError::MalformedRequest(format!("invalid {field}: {err}")))
}

/// Checks if a subscription lets its holders connect to the node with `node_address`.
async fn subscription_includes_node<L>(
    ledger: &L,
    subscription: &Subscription,
    node_address: &str,
) -> Result<bool, WebError>
where
    L: Ledger + Sync,
{
    if let Some(address) = &subscription.node_address {
        return Ok(address == node_address);
    }
    match subscription.plan_id {
        Some(plan_id) => Ok(ledger.query_plan_has_node(plan_id, node_address).await?),
        None => Ok(false),
    }
}

/// Admits a new session: validates it against ledger state and local quota
/// usage, creates the VPN peer and records the session.
pub(crate) async fn create_session<L, V>(
    State(appstate): State<AppState<L, V>>,
    path: Result<Path<(String, u64)>, PathRejection>,
    data: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult
where
    L: Ledger + Send + Sync + 'static,
    V: VpnService + Send + Sync + 'static,
{
    let Path((address, id)) = path.map_err(|err| WebError::MalformedRequest(err.body_text()))?;
    let Json(data) = data.map_err(|err| WebError::MalformedRequest(err.body_text()))?;
    debug!("Account {address} requested session {id}");

    if appstate.vpn.peers_count() >= appstate.settings.max_peers {
        return Err(WebError::PeerLimitReached);
    }
    let identity = decode("key", &data.key)?;
    let signature = decode("signature", &data.signature)?;
    let key = BASE64_STANDARD.encode(&identity);

    let ledger = appstate.ledger.as_ref();
    let account = ledger
        .query_account(&address)
        .await?
        .ok_or_else(|| WebError::AccountNotFound(address.clone()))?;
    let public_key = account
        .pub_key
        .ok_or_else(|| WebError::InvalidSignature("account has no public key".into()))?;
    verify_signature(&public_key, &id.to_be_bytes(), &signature)
        .map_err(|err| WebError::InvalidSignature(err.to_string()))?;

    let ledger_session = ledger
        .query_session(id)
        .await?
        .ok_or(WebError::SessionNotFound(id))?;
    if !ledger_session.status.is_active() {
        return Err(WebError::SessionInactive(id));
    }
    if ledger_session.address != address || ledger_session.node_address != ledger.address() {
        return Err(WebError::SessionAddressMismatch(id));
    }

    let subscription_id = ledger_session.subscription_id;
    let subscription = ledger
        .query_subscription(subscription_id)
        .await?
        .ok_or(WebError::SubscriptionNotFound(subscription_id))?;
    if !subscription.status.is_active() {
        return Err(WebError::SubscriptionInactive(subscription_id));
    }
    if !subscription_includes_node(ledger, &subscription, ledger.address()).await? {
        return Err(WebError::SubscriptionNotEligible(subscription_id));
    }

    let quota = ledger
        .query_quota(subscription_id, &address)
        .await?
        .ok_or_else(|| WebError::QuotaNotFound(subscription_id, address.clone()))?;

    // ledger ids are stored as signed integers
    let session_id = id as i64;
    let subscription_id = subscription_id as i64;
    if Session::find_by_id(&appstate.pool, session_id)
        .await?
        .is_some()
    {
        return Err(WebError::SessionExists(id));
    }
    if Session::find_by_key(&appstate.pool, &key).await?.is_some() {
        return Err(WebError::PeerKeyExists(key));
    }

    // usage of other local sessions is not reported to the ledger yet
    let other_sessions =
        Session::find_by_subscription_and_address(&appstate.pool, subscription_id, &address)
            .await?;
    let consumed = other_sessions
        .iter()
        .fold(quota.consumed, |consumed, session| {
            consumed.saturating_add(session.consumed())
        });
    if consumed >= quota.allocated {
        return Err(WebError::QuotaExceeded(address));
    }
    let available = quota.allocated - consumed;

    let result = appstate.vpn.add_peer(&identity).await?;
    let session = Session::new(session_id, subscription_id, key.clone(), address, available);
    if let Err(err) = session.save(&appstate.pool).await {
        error!("Failed to store session {session}, removing peer {key}: {err}");
        if let Err(remove_err) = appstate.vpn.remove_peer(&identity).await {
            error!("Failed to remove peer {key}: {remove_err}");
        }
        return Err(err.into());
    }
    info!("Admitted session {session} with {available} bytes available");
    appstate.sessions.set(session);

    Ok(ApiResponse::success(json!({
        "data": BASE64_STANDARD.encode(result),
        "info": BASE64_STANDARD.encode(appstate.vpn.info()),
    })))
}
