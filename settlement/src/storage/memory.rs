//! In-memory storage implementation
//!
//! Thread-safe in-memory store, used for tests and development.
//!
//! All tables live behind one `RwLock` so a `commit_*` holds a single write
//! guard across the domain insert, the aggregate increments and the
//! idempotency completion.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    apply_purchase_aggregates, apply_redemption_aggregates, complete_reservation, ReserveState,
    SettlementStore, StoreStats,
};
use crate::error::{SettlementError, SettlementResult};
use crate::types::{
    digest_to_hex, AccountId, CustomerMerchantStats, IdempotencyKey, IdempotencyRecord,
    IdempotencyStatus, MerchantPatch, MerchantRecord, PurchaseRecord, RecordId, RecordKind,
    RedemptionRecord, Timestamp, TransferRecord,
};

#[derive(Debug, Default)]
struct MemoryInner {
    merchants: HashMap<RecordId, MerchantRecord>,
    purchases: HashMap<RecordId, PurchaseRecord>,
    transfers: HashMap<RecordId, TransferRecord>,
    redemptions: HashMap<RecordId, RedemptionRecord>,
    relations: HashMap<(AccountId, RecordId), CustomerMerchantStats>,
    idempotency: HashMap<IdempotencyKey, IdempotencyRecord>,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        *inner = MemoryInner::default();
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    // ==================== Merchant operations ====================

    async fn insert_merchant(&self, merchant: &MerchantRecord) -> SettlementResult<()> {
        let mut inner = self.inner.write().await;
        if inner.merchants.contains_key(&merchant.merchant_id) {
            return Err(SettlementError::DuplicateRecord(format!(
                "merchant {}",
                digest_to_hex(&merchant.merchant_id)
            )));
        }
        inner
            .merchants
            .insert(merchant.merchant_id, merchant.clone());
        Ok(())
    }

    async fn get_merchant(
        &self,
        merchant_id: &RecordId,
    ) -> SettlementResult<Option<MerchantRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.merchants.get(merchant_id).cloned())
    }

    async fn update_merchant(
        &self,
        merchant_id: &RecordId,
        wallet: &AccountId,
        patch: &MerchantPatch,
    ) -> SettlementResult<MerchantRecord> {
        let mut inner = self.inner.write().await;
        let merchant = inner.merchants.get_mut(merchant_id).ok_or_else(|| {
            SettlementError::MerchantNotFound(digest_to_hex(merchant_id))
        })?;
        if &merchant.wallet != wallet {
            return Err(SettlementError::OwnerMismatch);
        }

        let mut changed = patch.cashback_rate_bps.apply(&mut merchant.cashback_rate_bps);
        changed |= patch.is_active.apply(&mut merchant.is_active);
        if changed {
            merchant.updated_at = Timestamp::now();
        }
        Ok(merchant.clone())
    }

    // ==================== Record operations ====================

    async fn get_purchase(&self, record_id: &RecordId) -> SettlementResult<Option<PurchaseRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.purchases.get(record_id).cloned())
    }

    async fn get_transfer(&self, record_id: &RecordId) -> SettlementResult<Option<TransferRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.transfers.get(record_id).cloned())
    }

    async fn get_redemption(
        &self,
        record_id: &RecordId,
    ) -> SettlementResult<Option<RedemptionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.redemptions.get(record_id).cloned())
    }

    async fn get_customer_merchant(
        &self,
        customer: &AccountId,
        merchant_id: &RecordId,
    ) -> SettlementResult<Option<CustomerMerchantStats>> {
        let inner = self.inner.read().await;
        Ok(inner.relations.get(&(*customer, *merchant_id)).cloned())
    }

    // ==================== Idempotency operations ====================

    async fn reserve_idempotency(
        &self,
        key: &IdempotencyKey,
        signature: &str,
    ) -> SettlementResult<ReserveState> {
        let mut inner = self.inner.write().await;
        match inner.idempotency.get(key) {
            None => {
                inner
                    .idempotency
                    .insert(*key, IdempotencyRecord::pending(*key, signature));
                Ok(ReserveState::Inserted)
            }
            Some(existing) if existing.status == IdempotencyStatus::Failed => {
                let prior = existing.clone();
                inner
                    .idempotency
                    .insert(*key, IdempotencyRecord::pending(*key, signature));
                Ok(ReserveState::Rearmed(prior))
            }
            Some(existing) => Ok(ReserveState::Existing(existing.clone())),
        }
    }

    async fn get_idempotency(
        &self,
        key: &IdempotencyKey,
    ) -> SettlementResult<Option<IdempotencyRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.idempotency.get(key).cloned())
    }

    async fn complete_idempotency(
        &self,
        key: &IdempotencyKey,
        signature: &str,
        record_id: &RecordId,
        kind: RecordKind,
    ) -> SettlementResult<()> {
        let mut inner = self.inner.write().await;
        let reservation = inner.idempotency.get_mut(key).ok_or_else(|| {
            SettlementError::Storage(format!("no reservation for key {}", digest_to_hex(key)))
        })?;
        complete_reservation(reservation, signature, *record_id, kind, Timestamp::now());
        Ok(())
    }

    async fn fail_idempotency(&self, key: &IdempotencyKey, reason: &str) -> SettlementResult<()> {
        let mut inner = self.inner.write().await;
        let reservation = inner.idempotency.get_mut(key).ok_or_else(|| {
            SettlementError::Storage(format!("no reservation for key {}", digest_to_hex(key)))
        })?;
        reservation.status = IdempotencyStatus::Failed;
        reservation.failure_reason = Some(reason.to_string());
        Ok(())
    }

    // ==================== Atomic settlement commits ====================

    async fn commit_purchase(
        &self,
        record: &PurchaseRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()> {
        let now = Timestamp::now();
        let mut inner = self.inner.write().await;

        // Validate and compute everything before the first mutation so a
        // failure leaves the dataset untouched.
        if inner.purchases.contains_key(&record.record_id) {
            return Err(SettlementError::DuplicateRecord(format!(
                "purchase {}",
                digest_to_hex(&record.record_id)
            )));
        }
        let mut merchant = inner
            .merchants
            .get(&record.merchant_id)
            .cloned()
            .ok_or_else(|| SettlementError::MerchantNotFound(digest_to_hex(&record.merchant_id)))?;
        let mut relation = inner
            .relations
            .get(&(record.customer, record.merchant_id))
            .cloned()
            .unwrap_or_else(|| {
                CustomerMerchantStats::new(record.customer, record.merchant_id, now)
            });
        let mut reservation = inner.idempotency.get(key).cloned().ok_or_else(|| {
            SettlementError::Storage(format!("no reservation for key {}", digest_to_hex(key)))
        })?;

        apply_purchase_aggregates(&mut merchant, &mut relation, record, now)?;
        complete_reservation(
            &mut reservation,
            &record.signature,
            record.record_id,
            RecordKind::Purchase,
            now,
        );

        inner.purchases.insert(record.record_id, record.clone());
        inner.merchants.insert(record.merchant_id, merchant);
        inner
            .relations
            .insert((record.customer, record.merchant_id), relation);
        inner.idempotency.insert(*key, reservation);
        Ok(())
    }

    async fn commit_transfer(
        &self,
        record: &TransferRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()> {
        let mut inner = self.inner.write().await;

        if inner.transfers.contains_key(&record.record_id) {
            return Err(SettlementError::DuplicateRecord(format!(
                "transfer {}",
                digest_to_hex(&record.record_id)
            )));
        }
        let mut reservation = inner.idempotency.get(key).cloned().ok_or_else(|| {
            SettlementError::Storage(format!("no reservation for key {}", digest_to_hex(key)))
        })?;
        complete_reservation(
            &mut reservation,
            &record.signature,
            record.record_id,
            RecordKind::Transfer,
            Timestamp::now(),
        );

        inner.transfers.insert(record.record_id, record.clone());
        inner.idempotency.insert(*key, reservation);
        Ok(())
    }

    async fn commit_redemption(
        &self,
        record: &RedemptionRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()> {
        let now = Timestamp::now();
        let mut inner = self.inner.write().await;

        if inner.redemptions.contains_key(&record.record_id) {
            return Err(SettlementError::DuplicateRecord(format!(
                "redemption {}",
                digest_to_hex(&record.record_id)
            )));
        }
        let mut merchant = inner
            .merchants
            .get(&record.merchant_id)
            .cloned()
            .ok_or_else(|| SettlementError::MerchantNotFound(digest_to_hex(&record.merchant_id)))?;
        let mut relation = inner
            .relations
            .get(&(record.customer, record.merchant_id))
            .cloned()
            .unwrap_or_else(|| {
                CustomerMerchantStats::new(record.customer, record.merchant_id, now)
            });
        let mut reservation = inner.idempotency.get(key).cloned().ok_or_else(|| {
            SettlementError::Storage(format!("no reservation for key {}", digest_to_hex(key)))
        })?;

        apply_redemption_aggregates(&mut merchant, &mut relation, record, now)?;
        complete_reservation(
            &mut reservation,
            &record.signature,
            record.record_id,
            RecordKind::Redemption,
            now,
        );

        inner.redemptions.insert(record.record_id, record.clone());
        inner.merchants.insert(record.merchant_id, merchant);
        inner
            .relations
            .insert((record.customer, record.merchant_id), relation);
        inner.idempotency.insert(*key, reservation);
        Ok(())
    }

    // ==================== Bulk operations ====================

    async fn stats(&self) -> SettlementResult<StoreStats> {
        let inner = self.inner.read().await;

        let mut stats = StoreStats {
            merchants: inner.merchants.len() as u64,
            purchases: inner.purchases.len() as u64,
            transfers: inner.transfers.len() as u64,
            redemptions: inner.redemptions.len() as u64,
            ..Default::default()
        };
        for reservation in inner.idempotency.values() {
            match reservation.status {
                IdempotencyStatus::Pending => stats.pending_keys += 1,
                IdempotencyStatus::Completed => stats.completed_keys += 1,
                IdempotencyStatus::Failed => stats.failed_keys += 1,
            }
        }
        Ok(stats)
    }
}
