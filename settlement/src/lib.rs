//! Carsa Settlement Core
//!
//! Off-chain settlement layer for the Carsa loyalty program. Customers earn
//! and redeem Lokal credits at participating merchants; every
//! balance-affecting event settles on an external append-only ledger, and
//! this crate reconciles confirmed events into the relational store exactly
//! once.
//!
//! # Architecture
//!
//! - **Reward Calculator**: pure arithmetic for purchase value and reward
//!   amounts
//! - **Address Deriver**: deterministic record identities mirroring the
//!   ledger program's derived-account scheme
//! - **Ledger RPC Client**: read-only settlement queries against the ledger
//!   node
//! - **Confirmation Monitor**: bounded polling wait for settlement
//! - **Idempotency Ledger**: at-most-once guard for recording operations
//! - **Transaction Recorder**: orchestrates verify, recompute and the
//!   atomic store commit
//!
//! Transaction construction, signing, sessions and UI concerns live
//! elsewhere; this crate only records what the ledger has already settled.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carsa_settlement::{
//!     LedgerRpcClient, MemoryStore, PurchaseParams, SettlementConfig, TransactionRecorder,
//! };
//!
//! async fn example() {
//!     let config = SettlementConfig::from_env();
//!     let ledger = Arc::new(LedgerRpcClient::new(config.ledger.clone()).unwrap());
//!     let store = Arc::new(MemoryStore::new());
//!     let recorder = TransactionRecorder::new(store, ledger, &config).unwrap();
//!
//!     let params = PurchaseParams {
//!         customer: [0x22; 32],
//!         merchant_wallet: [0x11; 32],
//!         nonce: [0x01; 32],
//!         fiat_amount: 100_000,
//!         redeemed_token_amount: None,
//!         signature: "5Gq3...".to_string(),
//!     };
//!     let record = recorder.record_purchase(&params, [0x42; 32]).await.unwrap();
//!     println!("reward: {} units", record.reward_amount);
//! }
//! ```

pub mod address;
pub mod calculator;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod monitor;
pub mod recorder;
pub mod storage;
pub mod types;

pub use address::AddressDeriver;
pub use calculator::PurchaseValue;
pub use config::{CommitmentLevel, LedgerRpcConfig, SettlementConfig};
pub use error::{SettlementError, SettlementResult};
pub use idempotency::{IdempotencyLedger, ReserveOutcome};
pub use ledger::{LedgerRpc, LedgerRpcClient, SignatureStatus, TransactionDetail};
pub use monitor::ConfirmationMonitor;
pub use recorder::{
    PurchaseParams, RedemptionParams, RegisterMerchantParams, TransactionRecorder, TransferParams,
};
pub use storage::{
    MemoryStore, ReserveState, SettlementStore, SledStore, StorageConfig, StoreStats,
};
pub use types::{
    digest_from_hex, digest_to_hex, AccountId, CustomerMerchantStats, FieldPatch, IdempotencyKey,
    IdempotencyRecord, IdempotencyStatus, MerchantPatch, MerchantRecord, Nonce,
    OnChainConfirmation, PurchaseRecord, RecordId, RecordKind, RedemptionRecord, Signature,
    Timestamp, TransferRecord,
};

use std::sync::Arc;

/// Create a recorder wired for local development: in-memory store and a
/// ledger client pointing at the local test validator.
pub fn create_development_recorder(
) -> SettlementResult<TransactionRecorder<MemoryStore, LedgerRpcClient>> {
    let config = SettlementConfig::development();
    let ledger = Arc::new(LedgerRpcClient::new(config.ledger.clone())?);
    let store = Arc::new(MemoryStore::new());
    TransactionRecorder::new(store, ledger, &config)
}
