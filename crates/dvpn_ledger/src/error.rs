use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to (de)serialize ledger data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("No ledger RPC endpoints configured")]
    NoEndpoints,
    #[error("Account {0} does not exist on the ledger")]
    AccountNotFound(String),
    #[error("Transaction rejected with code {code}: {log}")]
    TxRejected { code: u32, log: String },
    #[error("All ledger endpoints failed, last error: {0}")]
    EndpointsExhausted(String),
    #[error("Transaction failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LedgerError> },
}
