use axum::extract::State;
use dvpn_common::VERSION;
use dvpn_ledger::Ledger;
use dvpn_vpn::VpnService;
use humantime::format_duration;
use serde_json::json;

use super::{ApiResponse, ApiResult};
use crate::appstate::AppState;

/// Read-only summary of node configuration and current usage.
pub(crate) async fn node_status<L, V>(State(appstate): State<AppState<L, V>>) -> ApiResult
where
    L: Ledger + Send + Sync + 'static,
    V: VpnService + Send + Sync + 'static,
{
    let (mut upload, mut download) = (0i64, 0i64);
    appstate.sessions.iterate(|session| {
        upload = upload.saturating_add(session.upload_bytes);
        download = download.saturating_add(session.download_bytes);
    });
    let settings = &appstate.settings;

    Ok(ApiResponse::success(json!({
        "address": appstate.ledger.address(),
        "moniker": settings.moniker,
        "backend": appstate.vpn.kind().to_string(),
        "peers": appstate.vpn.peers_count(),
        "max_peers": settings.max_peers,
        "sessions": appstate.sessions.len(),
        "bandwidth": {
            "upload": upload,
            "download": download,
        },
        "intervals": {
            "quota": format_duration(settings.quota_check_interval).to_string(),
            "sessions": format_duration(settings.session_sync_interval).to_string(),
            "status": format_duration(settings.node_status_interval).to_string(),
        },
        "price": settings.price,
        "version": VERSION,
    })))
}
