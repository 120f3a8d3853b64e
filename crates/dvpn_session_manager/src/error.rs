use dvpn_core::session_management::SessionManagementError;
use dvpn_ledger::LedgerError;
use dvpn_vpn::VpnError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionManagerError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),
    #[error("VPN service error: {0}")]
    VpnError(#[from] VpnError),
    #[error("Failed to remove session: {0}")]
    SessionRemovalError(#[from] SessionManagementError),
}
