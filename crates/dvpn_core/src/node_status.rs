//! Periodic heartbeat keeping the node registered as active on the ledger.

use std::{sync::Arc, time::Duration};

use dvpn_ledger::{Ledger, LedgerError, types::Status};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Error)]
pub enum NodeStatusError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Broadcasts an `Active` node status every `interval`.
///
/// Returns on the first failed transaction.
#[instrument(skip_all)]
pub async fn run_periodic_node_status_update<L>(
    ledger: Arc<L>,
    interval: Duration,
) -> Result<(), NodeStatusError>
where
    L: Ledger + Send + Sync + 'static,
{
    info!(
        "Starting node status updates for {} every {}",
        ledger.address(),
        humantime::format_duration(interval)
    );
    loop {
        debug!("Updating node status");
        let response = ledger
            .update_node_status(Status::Active)
            .await
            .inspect_err(|err| error!("Failed to update node status: {err}"))?;
        info!("Node status updated in transaction {}", response.txhash);

        sleep(interval).await;
    }
}
