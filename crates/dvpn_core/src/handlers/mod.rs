use axum::{
    Json,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use dvpn_common::VERSION;
use dvpn_ledger::LedgerError;
use dvpn_vpn::VpnError;
use serde_json::{Value, json};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tracing::{error, warn};

pub(crate) mod session;
pub(crate) mod status;

/// Errors returned by the node API, each with a stable numeric code.
#[derive(Debug, Error)]
pub enum WebError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error("Maximum number of peers reached")]
    PeerLimitReached,
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Account {0} does not exist")]
    AccountNotFound(String),
    #[error("Session {0} does not exist")]
    SessionNotFound(u64),
    #[error("Session {0} is not active")]
    SessionInactive(u64),
    #[error("Session {0} does not belong to this account and node")]
    SessionAddressMismatch(u64),
    #[error("Subscription {0} does not exist")]
    SubscriptionNotFound(u64),
    #[error("Subscription {0} is not active")]
    SubscriptionInactive(u64),
    #[error("Subscription {0} does not include this node")]
    SubscriptionNotEligible(u64),
    #[error("Account {1} has no quota in subscription {0}")]
    QuotaNotFound(u64, String),
    #[error("Session {0} already exists")]
    SessionExists(u64),
    #[error("Peer {0} already exists")]
    PeerKeyExists(String),
    #[error("Quota of account {0} exceeded")]
    QuotaExceeded(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Vpn(#[from] VpnError),
    #[error(transparent)]
    DbError(#[from] SqlxError),
}

impl WebError {
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::MalformedRequest(_) => 1,
            Self::PeerLimitReached => 2,
            Self::InvalidSignature(_) => 3,
            Self::AccountNotFound(_) => 4,
            Self::SessionNotFound(_) => 5,
            Self::SessionInactive(_) => 6,
            Self::SessionAddressMismatch(_) => 7,
            Self::SubscriptionNotFound(_) => 8,
            Self::SubscriptionInactive(_) => 9,
            Self::SubscriptionNotEligible(_) => 10,
            Self::QuotaNotFound(..) => 11,
            Self::SessionExists(_) => 12,
            Self::PeerKeyExists(_) => 13,
            Self::QuotaExceeded(_) => 14,
            Self::Ledger(_) => 15,
            Self::Vpn(_) => 16,
            Self::DbError(_) => 17,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_)
            | Self::SessionInactive(_)
            | Self::SessionAddressMismatch(_)
            | Self::SubscriptionInactive(_)
            | Self::SubscriptionNotEligible(_)
            | Self::QuotaExceeded(_) => StatusCode::BAD_REQUEST,
            Self::PeerLimitReached => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::AccountNotFound(_)
            | Self::SessionNotFound(_)
            | Self::SubscriptionNotFound(_)
            | Self::QuotaNotFound(..) => StatusCode::NOT_FOUND,
            Self::SessionExists(_) | Self::PeerKeyExists(_) => StatusCode::CONFLICT,
            Self::Ledger(_) => StatusCode::BAD_GATEWAY,
            Self::Vpn(_) | Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct ApiResponse {
    pub json: Value,
    pub status: StatusCode,
}

impl ApiResponse {
    #[must_use]
    pub fn new(json: Value, status: StatusCode) -> Self {
        Self { json, status }
    }

    /// Successful response wrapping `result`.
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self::new(json!({ "success": true, "result": result }), StatusCode::OK)
    }
}

impl From<WebError> for ApiResponse {
    fn from(web_error: WebError) -> ApiResponse {
        let status = web_error.status();
        if status.is_server_error() {
            error!("{web_error}");
        } else {
            warn!("{web_error}");
        }
        ApiResponse::new(
            json!({
                "success": false,
                "error": {
                    "code": web_error.code(),
                    "message": web_error.to_string(),
                }
            }),
            status,
        )
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let api_response = ApiResponse::from(self);
        api_response.into_response()
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.json).into_response();
        response.headers_mut().insert(
            HeaderName::from_static("x-dvpn-version"),
            HeaderValue::from_static(VERSION),
        );
        *response.status_mut() = self.status;
        response
    }
}

pub type ApiResult = Result<ApiResponse, WebError>;
