use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::anyhow;
use axum::{
    Router,
    http::{Request, StatusCode},
    routing::{get, post},
    serve,
};
use dvpn_ledger::Ledger;
use dvpn_vpn::VpnService;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, instrument};

use crate::{
    appstate::AppState,
    handlers::{session::create_session, status::node_status},
};

pub mod appstate;
pub mod handlers;
pub mod node_status;
pub mod session_management;
pub mod session_registry;

async fn health_check() -> &'static str {
    "alive"
}

async fn handle_404() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

pub fn build_webapp<L, V>(appstate: AppState<L, V>) -> Router
where
    L: Ledger + Send + Sync + 'static,
    V: VpnService + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(node_status::<L, V>))
        .route(
            "/accounts/{address}/sessions/{id}",
            post(create_session::<L, V>),
        )
        .fallback(handle_404)
        .with_state(appstate)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        "http_request",
                        method = ?request.method(),
                        path = ?request.uri(),
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Runs the node API server.
#[instrument(skip_all)]
pub async fn run_web_server<L, V>(
    appstate: AppState<L, V>,
    bind_address: Option<IpAddr>,
    port: u16,
) -> Result<(), anyhow::Error>
where
    L: Ledger + Send + Sync + 'static,
    V: VpnService + Send + Sync + 'static,
{
    let webapp = build_webapp(appstate);
    let addr = SocketAddr::new(
        bind_address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        port,
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Started web services on {addr}");
    serve(listener, webapp.into_make_service())
        .await
        .map_err(|err| anyhow!("Web server can't be started {err}"))
}
