//! Ledger RPC Client
//!
//! Read-only interface to the ledger node used to verify settlement of
//! previously-submitted events. Transaction construction, signing and
//! submission live with the wallet layer, not here.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LedgerRpcConfig;
use crate::error::{SettlementError, SettlementResult};

/// Settlement status of a signature as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    /// The ledger has not seen the signature
    Unknown,
    /// Seen but not yet confirmed
    Pending,
    /// Confirmed by the cluster
    Confirmed,
    /// Finalized, not subject to rollback
    Finalized,
    /// Execution failed; terminal for this signature
    Errored { reason: String },
}

/// Settlement metadata of a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetail {
    /// Block ordinal
    pub slot: u64,
    /// Block time, seconds since epoch
    pub block_time: Option<i64>,
}

/// Read-only ledger queries consumed by the confirmation monitor
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Current settlement status of a signature
    async fn get_signature_status(&self, signature: &str) -> SettlementResult<SignatureStatus>;

    /// Settlement metadata, available once the signature is confirmed
    async fn get_transaction(&self, signature: &str) -> SettlementResult<TransactionDetail>;
}

/// JSON-RPC client for the ledger node
pub struct LedgerRpcClient {
    /// HTTP client
    client: Client,
    /// RPC configuration
    config: LedgerRpcConfig,
    /// Request ID counter
    request_id: std::sync::atomic::AtomicU64,
}

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
    #[allow(dead_code)]
    id: u64,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `getSignatureStatuses` response body
#[derive(Debug, Deserialize)]
struct RpcContextResponse<T> {
    value: T,
}

/// One entry of the `getSignatureStatuses` value array
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSignatureStatus {
    #[allow(dead_code)]
    slot: u64,
    err: Option<serde_json::Value>,
    confirmation_status: Option<String>,
}

/// `getTransaction` response body (settlement metadata only)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    slot: u64,
    block_time: Option<i64>,
}

fn classify_status(raw: Option<RawSignatureStatus>) -> SignatureStatus {
    match raw {
        None => SignatureStatus::Unknown,
        Some(status) => {
            if let Some(err) = status.err {
                return SignatureStatus::Errored {
                    reason: err.to_string(),
                };
            }
            match status.confirmation_status.as_deref() {
                Some("finalized") => SignatureStatus::Finalized,
                Some("confirmed") => SignatureStatus::Confirmed,
                _ => SignatureStatus::Pending,
            }
        }
    }
}

impl LedgerRpcClient {
    /// Create a new ledger RPC client
    pub fn new(config: LedgerRpcConfig) -> SettlementResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SettlementError::RpcConnection(e.to_string()))?;

        Ok(Self {
            client,
            config,
            request_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Make an RPC call
    async fn call(&self, method: &str, params: serde_json::Value) -> SettlementResult<serde_json::Value> {
        let id = self
            .request_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!("Ledger RPC call: {} (id {})", method, id);

        let response = self
            .client
            .post(&self.config.url)
            .json(&request)
            .send()
            .await?;

        let rpc_response: RpcResponse = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(SettlementError::RpcResponse {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl LedgerRpc for LedgerRpcClient {
    async fn get_signature_status(&self, signature: &str) -> SettlementResult<SignatureStatus> {
        let result = self
            .call(
                "getSignatureStatuses",
                serde_json::json!([[signature], {"searchTransactionHistory": true}]),
            )
            .await?;

        let parsed: RpcContextResponse<Vec<Option<RawSignatureStatus>>> =
            serde_json::from_value(result)?;
        let raw = parsed.value.into_iter().next().flatten();

        Ok(classify_status(raw))
    }

    async fn get_transaction(&self, signature: &str) -> SettlementResult<TransactionDetail> {
        let result = self
            .call(
                "getTransaction",
                serde_json::json!([
                    signature,
                    {"encoding": "json", "maxSupportedTransactionVersion": 0}
                ]),
            )
            .await?;

        if result.is_null() {
            return Err(SettlementError::SignatureNotFound(signature.to_string()));
        }

        let raw: RawTransaction = serde_json::from_value(result)?;
        Ok(TransactionDetail {
            slot: raw.slot,
            block_time: raw.block_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unknown_signature() {
        assert_eq!(classify_status(None), SignatureStatus::Unknown);
    }

    #[test]
    fn test_classify_confirmation_levels() {
        let raw: RawSignatureStatus = serde_json::from_value(serde_json::json!({
            "slot": 100, "err": null, "confirmationStatus": "confirmed"
        }))
        .unwrap();
        assert_eq!(classify_status(Some(raw)), SignatureStatus::Confirmed);

        let raw: RawSignatureStatus = serde_json::from_value(serde_json::json!({
            "slot": 100, "err": null, "confirmationStatus": "finalized"
        }))
        .unwrap();
        assert_eq!(classify_status(Some(raw)), SignatureStatus::Finalized);

        let raw: RawSignatureStatus = serde_json::from_value(serde_json::json!({
            "slot": 100, "err": null, "confirmationStatus": "processed"
        }))
        .unwrap();
        assert_eq!(classify_status(Some(raw)), SignatureStatus::Pending);
    }

    #[test]
    fn test_classify_execution_error() {
        let raw: RawSignatureStatus = serde_json::from_value(serde_json::json!({
            "slot": 100,
            "err": {"InstructionError": [0, {"Custom": 6008}]},
            "confirmationStatus": "confirmed"
        }))
        .unwrap();
        match classify_status(Some(raw)) {
            SignatureStatus::Errored { reason } => assert!(reason.contains("6008")),
            other => panic!("expected errored status, got {:?}", other),
        }
    }

    #[test]
    fn test_transaction_detail_parsing() {
        let raw: RawTransaction = serde_json::from_value(serde_json::json!({
            "slot": 341_553_107u64,
            "blockTime": 1_754_000_000i64,
            "meta": {"fee": 5000}
        }))
        .unwrap();
        assert_eq!(raw.slot, 341_553_107);
        assert_eq!(raw.block_time, Some(1_754_000_000));
    }
}
