use std::sync::Arc;

use dvpn_common::{
    VERSION,
    config::NodeConfig,
    db::{init_db, models::Session},
};
use dvpn_core::{
    appstate::{AppState, NodeSettings},
    node_status::run_periodic_node_status_update,
    run_web_server,
    session_management::restore_peers,
    session_registry::SessionRegistry,
};
use dvpn_ledger::{Ledger, LedgerClient};
use dvpn_session_manager::{run_quota_enforcement, run_session_sync};
use dvpn_vpn::VpnBackend;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[macro_use]
extern crate tracing;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    if dotenvy::from_filename(".env.local").is_err() {
        dotenvy::dotenv().ok();
    }
    let config = NodeConfig::new();
    // initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},hyper=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting dVPN node version v{VERSION}");
    debug!("Using config: {config:?}");

    let pool = init_db(&config.database_path).await?;

    let ledger = Arc::new(LedgerClient::from_config(&config)?);
    info!("Using ledger account {}", ledger.address());

    let vpn = Arc::new(VpnBackend::build(&config)?);

    // restore sessions admitted before restart
    let sessions = Session::all(&pool).await?;
    info!("Loaded {} stored sessions", sessions.len());
    let sessions = Arc::new(SessionRegistry::from_sessions(sessions));
    // the VPN backend may have kept running with peers of these sessions
    restore_peers(&sessions, &*vpn).await?;

    let settings = NodeSettings::from(&config);
    let appstate = AppState::new(
        pool.clone(),
        Arc::clone(&sessions),
        Arc::clone(&ledger),
        Arc::clone(&vpn),
        settings.clone(),
    );

    // run services
    tokio::select! {
        res = run_web_server(appstate, config.http_bind_address, config.http_port) => error!("Web server returned early: {res:?}"),
        res = run_quota_enforcement(pool.clone(), Arc::clone(&sessions), Arc::clone(&vpn), settings.quota_check_interval) => error!("Quota enforcement task returned early: {res:?}"),
        res = run_session_sync(pool.clone(), Arc::clone(&sessions), Arc::clone(&ledger), Arc::clone(&vpn), settings.session_sync_interval) => error!("Session sync task returned early: {res:?}"),
        res = run_periodic_node_status_update(Arc::clone(&ledger), settings.node_status_interval) => error!("Node status update task returned early: {res:?}"),
    }

    Ok(())
}
