//! Settlement Error Types
//!
//! Error definitions for recording ledger-settled loyalty transactions.

use thiserror::Error;

/// Settlement Error
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Malformed or out-of-range input, rejected before any side effect
    #[error("validation failed: {0}")]
    Validation(String),

    /// The ledger did not settle the signature within the timeout
    #[error("signature {signature} not confirmed after {waited_secs}s")]
    NotConfirmed { signature: String, waited_secs: u64 },

    /// The ledger reported an execution failure for the signature
    #[error("ledger rejected {signature}: {reason}")]
    LedgerRejected { signature: String, reason: String },

    /// Another request holding the same idempotency key is still in flight
    #[error("request for idempotency key {key} is already in flight")]
    RequestPending { key: String },

    /// A domain record with the derived identity already exists
    #[error("duplicate record: {0}")]
    DuplicateRecord(String),

    /// Merchant lookup failed
    #[error("merchant not found: {0}")]
    MerchantNotFound(String),

    /// Merchant has been deactivated
    #[error("merchant is not active: {0}")]
    MerchantNotActive(String),

    /// Only the merchant's own wallet may mutate its settings
    #[error("only the merchant owner can perform this action")]
    OwnerMismatch,

    /// Arithmetic overflow during value computation
    #[error("arithmetic overflow during value computation")]
    ArithmeticOverflow,

    /// The ledger has no transaction for the signature
    #[error("signature not found on ledger: {0}")]
    SignatureNotFound(String),

    /// Ledger RPC connection error
    #[error("ledger RPC connection failed: {0}")]
    RpcConnection(String),

    /// Ledger RPC request error
    #[error("ledger RPC request failed: {0}")]
    RpcRequest(String),

    /// Ledger RPC response error
    #[error("ledger RPC response error: {message}")]
    RpcResponse { code: i64, message: String },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Settlement Result type
pub type SettlementResult<T> = Result<T, SettlementError>;

impl SettlementError {
    /// Whether the caller may retry the operation without changing its input.
    ///
    /// `NotConfirmed` keeps the idempotency key reusable; transport and
    /// storage failures are guarded by the reservation already in place.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::NotConfirmed { .. }
                | SettlementError::RequestPending { .. }
                | SettlementError::Storage(_)
                | SettlementError::RpcConnection(_)
                | SettlementError::RpcRequest(_)
        )
    }
}

impl From<reqwest::Error> for SettlementError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            SettlementError::RpcConnection(e.to_string())
        } else {
            SettlementError::RpcRequest(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SettlementError {
    fn from(e: serde_json::Error) -> Self {
        SettlementError::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for SettlementError {
    fn from(e: hex::FromHexError) -> Self {
        SettlementError::Serialization(format!("Hex decode error: {}", e))
    }
}
