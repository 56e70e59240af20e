//! Settlement Configuration
//!
//! Configuration for the ledger RPC connection and recording behavior.
//! Supports loading from environment variables with SETTLEMENT_ prefix.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{SettlementError, SettlementResult};

/// Commitment the ledger must report before an event counts as settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    /// Confirmed by the cluster
    #[default]
    Confirmed,
    /// Finalized, not subject to rollback
    Finalized,
}

impl CommitmentLevel {
    /// Parse from string (for environment variables)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "confirmed" => Some(Self::Confirmed),
            "finalized" | "final" => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// Ledger RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRpcConfig {
    /// RPC endpoint URL
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Ledger program id, lowercase hex (32 bytes)
    pub program_id: String,
    /// Required settlement commitment
    #[serde(default)]
    pub commitment: CommitmentLevel,
}

fn default_timeout() -> u64 {
    30
}

const DEV_PROGRAM_ID: &str = "0000000000000000000000000000000000000000000000000000000000000000";

impl Default for LedgerRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8899".to_string(),
            timeout_secs: 30,
            program_id: DEV_PROGRAM_ID.to_string(),
            commitment: CommitmentLevel::Confirmed,
        }
    }
}

impl LedgerRpcConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - SETTLEMENT_LEDGER_URL: RPC endpoint URL
    /// - SETTLEMENT_LEDGER_TIMEOUT: request timeout in seconds
    /// - SETTLEMENT_PROGRAM_ID: ledger program id (hex)
    /// - SETTLEMENT_COMMITMENT: confirmed | finalized
    pub fn from_env() -> Self {
        Self {
            url: env::var("SETTLEMENT_LEDGER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8899".to_string()),
            timeout_secs: env::var("SETTLEMENT_LEDGER_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            program_id: env::var("SETTLEMENT_PROGRAM_ID")
                .unwrap_or_else(|_| DEV_PROGRAM_ID.to_string()),
            commitment: env::var("SETTLEMENT_COMMITMENT")
                .ok()
                .and_then(|s| CommitmentLevel::parse(&s))
                .unwrap_or_default(),
        }
    }

    /// Decode the configured program id
    pub fn program_id_bytes(&self) -> SettlementResult<[u8; 32]> {
        crate::types::digest_from_hex(&self.program_id).map_err(|e| {
            SettlementError::Configuration(format!("invalid program id {}: {}", self.program_id, e))
        })
    }
}

/// Settlement layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Ledger RPC configuration
    pub ledger: LedgerRpcConfig,
    /// Confirmation poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Default confirmation wait timeout in seconds
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_confirmation_timeout() -> u64 {
    60
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerRpcConfig::default(),
            poll_interval_ms: 1_000,
            confirmation_timeout_secs: 60,
        }
    }
}

impl SettlementConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (in addition to the ledger ones):
    /// - SETTLEMENT_POLL_INTERVAL_MS: confirmation poll interval
    /// - SETTLEMENT_CONFIRMATION_TIMEOUT: wait timeout in seconds
    pub fn from_env() -> Self {
        Self {
            ledger: LedgerRpcConfig::from_env(),
            poll_interval_ms: env::var("SETTLEMENT_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_000),
            confirmation_timeout_secs: env::var("SETTLEMENT_CONFIRMATION_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        }
    }

    /// Create a development configuration (local test validator)
    pub fn development() -> Self {
        Self {
            ledger: LedgerRpcConfig {
                url: "http://127.0.0.1:8899".to_string(),
                timeout_secs: 10,
                program_id: DEV_PROGRAM_ID.to_string(),
                commitment: CommitmentLevel::Confirmed,
            },
            poll_interval_ms: 200,
            confirmation_timeout_secs: 10,
        }
    }
}
