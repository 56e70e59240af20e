//! Settlement storage layer
//!
//! Persistence interface and implementations for settled records, merchant
//! aggregates and idempotency reservations.
//!
//! Two guarantees live here rather than in application code:
//!
//! - idempotency reservation is an atomic insert-if-absent at the storage
//!   layer, so concurrent processes cannot both win a key;
//! - the `commit_*` operations apply the domain insert, the aggregate
//!   increments and the idempotency completion as one unit, so a crash
//!   never leaves a completed key pointing at a missing row or an orphaned
//!   row without its completion.

pub mod memory;
pub mod sled;

use async_trait::async_trait;

use crate::error::{SettlementError, SettlementResult};
use crate::types::{
    AccountId, CustomerMerchantStats, IdempotencyKey, IdempotencyRecord, IdempotencyStatus,
    MerchantPatch, MerchantRecord, PurchaseRecord, RecordId, RecordKind, RedemptionRecord,
    Timestamp, TransferRecord,
};

/// Outcome of an idempotency reservation attempt at the storage layer
#[derive(Debug, Clone)]
pub enum ReserveState {
    /// Key was absent; a pending reservation was created
    Inserted,
    /// Key existed with a failed attempt; reservation re-armed to pending.
    /// Carries the prior failed record.
    Rearmed(IdempotencyRecord),
    /// Key exists and is pending or completed; nothing was modified
    Existing(IdempotencyRecord),
}

/// Settlement storage interface
#[async_trait]
pub trait SettlementStore: Send + Sync {
    // ==================== Merchant operations ====================

    /// Insert a merchant; fails on an existing identity
    async fn insert_merchant(&self, merchant: &MerchantRecord) -> SettlementResult<()>;

    /// Get a merchant by derived identity
    async fn get_merchant(&self, merchant_id: &RecordId) -> SettlementResult<Option<MerchantRecord>>;

    /// Apply an owner-scoped settings patch; returns the updated record
    async fn update_merchant(
        &self,
        merchant_id: &RecordId,
        wallet: &AccountId,
        patch: &MerchantPatch,
    ) -> SettlementResult<MerchantRecord>;

    // ==================== Record operations ====================

    /// Get a purchase record
    async fn get_purchase(&self, record_id: &RecordId) -> SettlementResult<Option<PurchaseRecord>>;

    /// Get a transfer record
    async fn get_transfer(&self, record_id: &RecordId) -> SettlementResult<Option<TransferRecord>>;

    /// Get a redemption record
    async fn get_redemption(
        &self,
        record_id: &RecordId,
    ) -> SettlementResult<Option<RedemptionRecord>>;

    /// Get the customer-merchant relation row
    async fn get_customer_merchant(
        &self,
        customer: &AccountId,
        merchant_id: &RecordId,
    ) -> SettlementResult<Option<CustomerMerchantStats>>;

    // ==================== Idempotency operations ====================

    /// Atomically insert a pending reservation if the key is unseen.
    ///
    /// An existing pending or completed reservation is returned without
    /// modification; a failed one is re-armed to pending for the new
    /// signature. The uniqueness guarantee must come from the storage
    /// engine, not an in-process lock.
    async fn reserve_idempotency(
        &self,
        key: &IdempotencyKey,
        signature: &str,
    ) -> SettlementResult<ReserveState>;

    /// Get the reservation for a key
    async fn get_idempotency(
        &self,
        key: &IdempotencyKey,
    ) -> SettlementResult<Option<IdempotencyRecord>>;

    /// Transition a pending reservation to completed
    async fn complete_idempotency(
        &self,
        key: &IdempotencyKey,
        signature: &str,
        record_id: &RecordId,
        kind: RecordKind,
    ) -> SettlementResult<()>;

    /// Transition a pending reservation to failed
    async fn fail_idempotency(&self, key: &IdempotencyKey, reason: &str) -> SettlementResult<()>;

    // ==================== Atomic settlement commits ====================

    /// Persist a purchase, apply merchant and relation increments, and
    /// complete the idempotency reservation, all-or-nothing.
    async fn commit_purchase(
        &self,
        record: &PurchaseRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()>;

    /// Persist a transfer and complete the idempotency reservation
    async fn commit_transfer(
        &self,
        record: &TransferRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()>;

    /// Persist a redemption, apply merchant and relation updates, and
    /// complete the idempotency reservation, all-or-nothing.
    async fn commit_redemption(
        &self,
        record: &RedemptionRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()>;

    // ==================== Bulk operations ====================

    /// Get storage statistics
    async fn stats(&self) -> SettlementResult<StoreStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Registered merchants
    pub merchants: u64,
    /// Settled purchases
    pub purchases: u64,
    /// Settled transfers
    pub transfers: u64,
    /// Settled redemptions
    pub redemptions: u64,
    /// Pending reservations
    pub pending_keys: u64,
    /// Completed reservations
    pub completed_keys: u64,
    /// Failed reservations
    pub failed_keys: u64,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory
    pub data_dir: String,
    /// Cache size in bytes
    pub cache_size: u64,
    /// Whether to enable on-disk compression
    pub enable_compression: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./settlement_data".to_string(),
            cache_size: 64 * 1024 * 1024,
            enable_compression: true,
        }
    }
}

impl StorageConfig {
    /// Create a development configuration
    pub fn development() -> Self {
        Self {
            data_dir: "./settlement_dev_data".to_string(),
            cache_size: 16 * 1024 * 1024,
            enable_compression: false,
        }
    }
}

pub use self::sled::SledStore;
pub use memory::MemoryStore;

/// Apply the aggregate increments of a settled purchase.
///
/// Callers must run this inside their atomic commit scope; the checked
/// arithmetic mirrors the ledger program's overflow protection.
pub(crate) fn apply_purchase_aggregates(
    merchant: &mut MerchantRecord,
    relation: &mut CustomerMerchantStats,
    record: &PurchaseRecord,
    now: Timestamp,
) -> SettlementResult<()> {
    merchant.total_transactions = merchant
        .total_transactions
        .checked_add(1)
        .ok_or(SettlementError::ArithmeticOverflow)?;
    merchant.total_volume = merchant
        .total_volume
        .checked_add(record.total_value)
        .ok_or(SettlementError::ArithmeticOverflow)?;
    merchant.total_rewards_distributed = merchant
        .total_rewards_distributed
        .checked_add(record.reward_amount)
        .ok_or(SettlementError::ArithmeticOverflow)?;

    relation.visit_count = relation
        .visit_count
        .checked_add(1)
        .ok_or(SettlementError::ArithmeticOverflow)?;
    relation.total_spent = relation
        .total_spent
        .checked_add(record.total_value)
        .ok_or(SettlementError::ArithmeticOverflow)?;
    relation.total_earned = relation
        .total_earned
        .checked_add(record.reward_amount)
        .ok_or(SettlementError::ArithmeticOverflow)?;
    relation.last_visit_at = now;
    Ok(())
}

/// Apply the aggregate updates of a settled redemption.
///
/// The relation's earned balance saturates at zero: redeemed credits may
/// have been earned at another merchant, and the ledger, not this row,
/// owns balances.
pub(crate) fn apply_redemption_aggregates(
    merchant: &mut MerchantRecord,
    relation: &mut CustomerMerchantStats,
    record: &RedemptionRecord,
    now: Timestamp,
) -> SettlementResult<()> {
    merchant.total_transactions = merchant
        .total_transactions
        .checked_add(1)
        .ok_or(SettlementError::ArithmeticOverflow)?;
    merchant.total_volume = merchant
        .total_volume
        .checked_add(record.fiat_value)
        .ok_or(SettlementError::ArithmeticOverflow)?;

    relation.total_earned = relation.total_earned.saturating_sub(record.token_amount);
    relation.last_visit_at = now;
    Ok(())
}

/// Transition a reservation to completed, linking the settled record.
pub(crate) fn complete_reservation(
    reservation: &mut IdempotencyRecord,
    signature: &str,
    record_id: RecordId,
    kind: RecordKind,
    now: Timestamp,
) {
    reservation.status = IdempotencyStatus::Completed;
    reservation.signature = signature.to_string();
    reservation.record_id = Some(record_id);
    reservation.record_kind = Some(kind);
    reservation.completed_at = Some(now);
}
