//! Sled persistent storage implementation
//!
//! Durable store backed by the sled embedded database.
//!
//! Concurrency guards live in the engine, not in process memory:
//! idempotency reservation uses `compare_and_swap`, and the `commit_*`
//! operations run as serializable multi-tree transactions so the domain
//! insert, the aggregate increments and the reservation completion land
//! together or not at all.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;

use super::{
    apply_purchase_aggregates, apply_redemption_aggregates, complete_reservation, ReserveState,
    SettlementStore, StorageConfig, StoreStats,
};
use crate::error::{SettlementError, SettlementResult};
use crate::types::{
    digest_to_hex, AccountId, CustomerMerchantStats, IdempotencyKey, IdempotencyRecord,
    IdempotencyStatus, MerchantPatch, MerchantRecord, PurchaseRecord, RecordId, RecordKind,
    RedemptionRecord, Timestamp, TransferRecord,
};

/// Tree name constants
const MERCHANTS_TREE: &str = "merchants";
const PURCHASES_TREE: &str = "purchases";
const TRANSFERS_TREE: &str = "transfers";
const REDEMPTIONS_TREE: &str = "redemptions";
const RELATIONS_TREE: &str = "customer_merchant";
const IDEMPOTENCY_TREE: &str = "idempotency";

/// Sled-backed settlement store
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    merchants: sled::Tree,
    purchases: sled::Tree,
    transfers: sled::Tree,
    redemptions: sled::Tree,
    relations: sled::Tree,
    idempotency: sled::Tree,
}

impl SledStore {
    /// Create a store from configuration
    pub fn new(config: &StorageConfig) -> SettlementResult<Self> {
        let db = sled::Config::new()
            .path(&config.data_dir)
            .cache_capacity(config.cache_size)
            .use_compression(config.enable_compression)
            .open()
            .map_err(|e| SettlementError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db)
    }

    /// Open or create a database at a path
    pub fn open<P: AsRef<Path>>(path: P) -> SettlementResult<Self> {
        let db = sled::open(path)
            .map_err(|e| SettlementError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db)
    }

    /// Open an ephemeral database (tests and local development)
    pub fn temporary() -> SettlementResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| SettlementError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> SettlementResult<Self> {
        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| SettlementError::Storage(format!("Failed to open {} tree: {}", name, e)))
        };
        let merchants = open_tree(MERCHANTS_TREE)?;
        let purchases = open_tree(PURCHASES_TREE)?;
        let transfers = open_tree(TRANSFERS_TREE)?;
        let redemptions = open_tree(REDEMPTIONS_TREE)?;
        let relations = open_tree(RELATIONS_TREE)?;
        let idempotency = open_tree(IDEMPOTENCY_TREE)?;

        Ok(Self {
            db,
            merchants,
            purchases,
            transfers,
            redemptions,
            relations,
            idempotency,
        })
    }

    /// Flush dirty buffers to disk
    pub fn flush(&self) -> SettlementResult<()> {
        self.db
            .flush()
            .map_err(|e| SettlementError::Storage(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    // ==================== Helpers ====================

    fn encode<T: Serialize>(value: &T) -> SettlementResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| SettlementError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SettlementResult<T> {
        serde_json::from_slice(bytes).map_err(|e| SettlementError::Serialization(e.to_string()))
    }

    fn relation_key(customer: &AccountId, merchant_id: &RecordId) -> Vec<u8> {
        let mut key = Vec::with_capacity(64);
        key.extend_from_slice(customer);
        key.extend_from_slice(merchant_id);
        key
    }

    fn storage_err(e: sled::Error) -> SettlementError {
        SettlementError::Storage(e.to_string())
    }

    fn map_txn<T>(result: Result<T, TransactionError<SettlementError>>) -> SettlementResult<T> {
        result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => SettlementError::Storage(err.to_string()),
        })
    }

    fn get_decoded<T: DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> SettlementResult<Option<T>> {
        match tree.get(key).map_err(Self::storage_err)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

type Abortable<T> = Result<T, ConflictableTransactionError<SettlementError>>;

fn abort<T>(err: SettlementError) -> Abortable<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn decode_in_txn<T: DeserializeOwned>(bytes: &[u8]) -> Abortable<T> {
    SledStore::decode(bytes).map_err(ConflictableTransactionError::Abort)
}

fn encode_in_txn<T: Serialize>(value: &T) -> Abortable<Vec<u8>> {
    SledStore::encode(value).map_err(ConflictableTransactionError::Abort)
}

#[async_trait]
impl SettlementStore for SledStore {
    // ==================== Merchant operations ====================

    async fn insert_merchant(&self, merchant: &MerchantRecord) -> SettlementResult<()> {
        let bytes = Self::encode(merchant)?;
        let previous = self
            .merchants
            .compare_and_swap(
                merchant.merchant_id.as_slice(),
                None::<&[u8]>,
                Some(bytes),
            )
            .map_err(Self::storage_err)?;
        if previous.is_err() {
            return Err(SettlementError::DuplicateRecord(format!(
                "merchant {}",
                digest_to_hex(&merchant.merchant_id)
            )));
        }
        Ok(())
    }

    async fn get_merchant(
        &self,
        merchant_id: &RecordId,
    ) -> SettlementResult<Option<MerchantRecord>> {
        Self::get_decoded(&self.merchants, merchant_id.as_slice())
    }

    async fn update_merchant(
        &self,
        merchant_id: &RecordId,
        wallet: &AccountId,
        patch: &MerchantPatch,
    ) -> SettlementResult<MerchantRecord> {
        let result = self.merchants.transaction(|tx| {
            let bytes = match tx.get(merchant_id.as_slice())? {
                Some(bytes) => bytes,
                None => {
                    return abort(SettlementError::MerchantNotFound(digest_to_hex(merchant_id)))
                }
            };
            let mut merchant: MerchantRecord = decode_in_txn(&bytes)?;
            if &merchant.wallet != wallet {
                return abort(SettlementError::OwnerMismatch);
            }

            let mut changed = patch.cashback_rate_bps.apply(&mut merchant.cashback_rate_bps);
            changed |= patch.is_active.apply(&mut merchant.is_active);
            if changed {
                merchant.updated_at = Timestamp::now();
            }
            tx.insert(merchant_id.as_slice(), encode_in_txn(&merchant)?)?;
            Ok(merchant)
        });
        Self::map_txn(result)
    }

    // ==================== Record operations ====================

    async fn get_purchase(&self, record_id: &RecordId) -> SettlementResult<Option<PurchaseRecord>> {
        Self::get_decoded(&self.purchases, record_id.as_slice())
    }

    async fn get_transfer(&self, record_id: &RecordId) -> SettlementResult<Option<TransferRecord>> {
        Self::get_decoded(&self.transfers, record_id.as_slice())
    }

    async fn get_redemption(
        &self,
        record_id: &RecordId,
    ) -> SettlementResult<Option<RedemptionRecord>> {
        Self::get_decoded(&self.redemptions, record_id.as_slice())
    }

    async fn get_customer_merchant(
        &self,
        customer: &AccountId,
        merchant_id: &RecordId,
    ) -> SettlementResult<Option<CustomerMerchantStats>> {
        Self::get_decoded(&self.relations, &Self::relation_key(customer, merchant_id))
    }

    // ==================== Idempotency operations ====================

    async fn reserve_idempotency(
        &self,
        key: &IdempotencyKey,
        signature: &str,
    ) -> SettlementResult<ReserveState> {
        loop {
            match self.idempotency.get(key.as_slice()).map_err(Self::storage_err)? {
                None => {
                    let pending = IdempotencyRecord::pending(*key, signature);
                    let swapped = self
                        .idempotency
                        .compare_and_swap(
                            key.as_slice(),
                            None::<&[u8]>,
                            Some(Self::encode(&pending)?),
                        )
                        .map_err(Self::storage_err)?;
                    if swapped.is_ok() {
                        return Ok(ReserveState::Inserted);
                    }
                    // Lost the race; re-read and classify.
                }
                Some(bytes) => {
                    let existing: IdempotencyRecord = Self::decode(&bytes)?;
                    if existing.status != IdempotencyStatus::Failed {
                        return Ok(ReserveState::Existing(existing));
                    }
                    let pending = IdempotencyRecord::pending(*key, signature);
                    let swapped = self
                        .idempotency
                        .compare_and_swap(
                            key.as_slice(),
                            Some(bytes.as_ref()),
                            Some(Self::encode(&pending)?),
                        )
                        .map_err(Self::storage_err)?;
                    if swapped.is_ok() {
                        return Ok(ReserveState::Rearmed(existing));
                    }
                    // Another process re-armed or completed it first.
                }
            }
        }
    }

    async fn get_idempotency(
        &self,
        key: &IdempotencyKey,
    ) -> SettlementResult<Option<IdempotencyRecord>> {
        Self::get_decoded(&self.idempotency, key.as_slice())
    }

    async fn complete_idempotency(
        &self,
        key: &IdempotencyKey,
        signature: &str,
        record_id: &RecordId,
        kind: RecordKind,
    ) -> SettlementResult<()> {
        let result = self.idempotency.transaction(|tx| {
            let bytes = match tx.get(key.as_slice())? {
                Some(bytes) => bytes,
                None => {
                    return abort(SettlementError::Storage(format!(
                        "no reservation for key {}",
                        digest_to_hex(key)
                    )))
                }
            };
            let mut reservation: IdempotencyRecord = decode_in_txn(&bytes)?;
            complete_reservation(&mut reservation, signature, *record_id, kind, Timestamp::now());
            tx.insert(key.as_slice(), encode_in_txn(&reservation)?)?;
            Ok(())
        });
        Self::map_txn(result)
    }

    async fn fail_idempotency(&self, key: &IdempotencyKey, reason: &str) -> SettlementResult<()> {
        let result = self.idempotency.transaction(|tx| {
            let bytes = match tx.get(key.as_slice())? {
                Some(bytes) => bytes,
                None => {
                    return abort(SettlementError::Storage(format!(
                        "no reservation for key {}",
                        digest_to_hex(key)
                    )))
                }
            };
            let mut reservation: IdempotencyRecord = decode_in_txn(&bytes)?;
            reservation.status = IdempotencyStatus::Failed;
            reservation.failure_reason = Some(reason.to_string());
            tx.insert(key.as_slice(), encode_in_txn(&reservation)?)?;
            Ok(())
        });
        Self::map_txn(result)
    }

    // ==================== Atomic settlement commits ====================

    async fn commit_purchase(
        &self,
        record: &PurchaseRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()> {
        let now = Timestamp::now();
        let result = (
            &self.purchases,
            &self.merchants,
            &self.relations,
            &self.idempotency,
        )
            .transaction(|(purchases, merchants, relations, idempotency)| {
                if purchases.get(record.record_id.as_slice())?.is_some() {
                    return abort(SettlementError::DuplicateRecord(format!(
                        "purchase {}",
                        digest_to_hex(&record.record_id)
                    )));
                }

                let merchant_bytes = match merchants.get(record.merchant_id.as_slice())? {
                    Some(bytes) => bytes,
                    None => {
                        return abort(SettlementError::MerchantNotFound(digest_to_hex(
                            &record.merchant_id,
                        )))
                    }
                };
                let mut merchant: MerchantRecord = decode_in_txn(&merchant_bytes)?;

                let relation_key = Self::relation_key(&record.customer, &record.merchant_id);
                let mut relation: CustomerMerchantStats = match relations.get(&relation_key)? {
                    Some(bytes) => decode_in_txn(&bytes)?,
                    None => CustomerMerchantStats::new(record.customer, record.merchant_id, now),
                };

                let reservation_bytes = match idempotency.get(key.as_slice())? {
                    Some(bytes) => bytes,
                    None => {
                        return abort(SettlementError::Storage(format!(
                            "no reservation for key {}",
                            digest_to_hex(key)
                        )))
                    }
                };
                let mut reservation: IdempotencyRecord = decode_in_txn(&reservation_bytes)?;

                apply_purchase_aggregates(&mut merchant, &mut relation, record, now)
                    .map_err(ConflictableTransactionError::Abort)?;
                complete_reservation(
                    &mut reservation,
                    &record.signature,
                    record.record_id,
                    RecordKind::Purchase,
                    now,
                );

                purchases.insert(record.record_id.as_slice(), encode_in_txn(record)?)?;
                merchants.insert(record.merchant_id.as_slice(), encode_in_txn(&merchant)?)?;
                relations.insert(relation_key.as_slice(), encode_in_txn(&relation)?)?;
                idempotency.insert(key.as_slice(), encode_in_txn(&reservation)?)?;
                Ok(())
            });
        Self::map_txn(result)
    }

    async fn commit_transfer(
        &self,
        record: &TransferRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()> {
        let now = Timestamp::now();
        let result = (&self.transfers, &self.idempotency).transaction(|(transfers, idempotency)| {
            if transfers.get(record.record_id.as_slice())?.is_some() {
                return abort(SettlementError::DuplicateRecord(format!(
                    "transfer {}",
                    digest_to_hex(&record.record_id)
                )));
            }
            let reservation_bytes = match idempotency.get(key.as_slice())? {
                Some(bytes) => bytes,
                None => {
                    return abort(SettlementError::Storage(format!(
                        "no reservation for key {}",
                        digest_to_hex(key)
                    )))
                }
            };
            let mut reservation: IdempotencyRecord = decode_in_txn(&reservation_bytes)?;
            complete_reservation(
                &mut reservation,
                &record.signature,
                record.record_id,
                RecordKind::Transfer,
                now,
            );

            transfers.insert(record.record_id.as_slice(), encode_in_txn(record)?)?;
            idempotency.insert(key.as_slice(), encode_in_txn(&reservation)?)?;
            Ok(())
        });
        Self::map_txn(result)
    }

    async fn commit_redemption(
        &self,
        record: &RedemptionRecord,
        key: &IdempotencyKey,
    ) -> SettlementResult<()> {
        let now = Timestamp::now();
        let result = (
            &self.redemptions,
            &self.merchants,
            &self.relations,
            &self.idempotency,
        )
            .transaction(|(redemptions, merchants, relations, idempotency)| {
                if redemptions.get(record.record_id.as_slice())?.is_some() {
                    return abort(SettlementError::DuplicateRecord(format!(
                        "redemption {}",
                        digest_to_hex(&record.record_id)
                    )));
                }

                let merchant_bytes = match merchants.get(record.merchant_id.as_slice())? {
                    Some(bytes) => bytes,
                    None => {
                        return abort(SettlementError::MerchantNotFound(digest_to_hex(
                            &record.merchant_id,
                        )))
                    }
                };
                let mut merchant: MerchantRecord = decode_in_txn(&merchant_bytes)?;

                let relation_key = Self::relation_key(&record.customer, &record.merchant_id);
                let mut relation: CustomerMerchantStats = match relations.get(&relation_key)? {
                    Some(bytes) => decode_in_txn(&bytes)?,
                    None => CustomerMerchantStats::new(record.customer, record.merchant_id, now),
                };

                let reservation_bytes = match idempotency.get(key.as_slice())? {
                    Some(bytes) => bytes,
                    None => {
                        return abort(SettlementError::Storage(format!(
                            "no reservation for key {}",
                            digest_to_hex(key)
                        )))
                    }
                };
                let mut reservation: IdempotencyRecord = decode_in_txn(&reservation_bytes)?;

                apply_redemption_aggregates(&mut merchant, &mut relation, record, now)
                    .map_err(ConflictableTransactionError::Abort)?;
                complete_reservation(
                    &mut reservation,
                    &record.signature,
                    record.record_id,
                    RecordKind::Redemption,
                    now,
                );

                redemptions.insert(record.record_id.as_slice(), encode_in_txn(record)?)?;
                merchants.insert(record.merchant_id.as_slice(), encode_in_txn(&merchant)?)?;
                relations.insert(relation_key.as_slice(), encode_in_txn(&relation)?)?;
                idempotency.insert(key.as_slice(), encode_in_txn(&reservation)?)?;
                Ok(())
            });
        Self::map_txn(result)
    }

    // ==================== Bulk operations ====================

    async fn stats(&self) -> SettlementResult<StoreStats> {
        let mut stats = StoreStats {
            merchants: self.merchants.len() as u64,
            purchases: self.purchases.len() as u64,
            transfers: self.transfers.len() as u64,
            redemptions: self.redemptions.len() as u64,
            ..Default::default()
        };

        for item in self.idempotency.iter() {
            let (_, bytes) = item.map_err(Self::storage_err)?;
            let reservation: IdempotencyRecord = Self::decode(&bytes)?;
            match reservation.status {
                IdempotencyStatus::Pending => stats.pending_keys += 1,
                IdempotencyStatus::Completed => stats.completed_keys += 1,
                IdempotencyStatus::Failed => stats.failed_keys += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_merchant() -> MerchantRecord {
        MerchantRecord {
            merchant_id: [0xAA; 32],
            wallet: [0x11; 32],
            name: "Toko Buku".to_string(),
            category: "bookstore".to_string(),
            cashback_rate_bps: 300,
            is_active: true,
            total_transactions: 0,
            total_volume: 0,
            total_rewards_distributed: 0,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        }
    }

    fn test_purchase() -> PurchaseRecord {
        PurchaseRecord {
            record_id: [0xBB; 32],
            customer: [0x22; 32],
            merchant_id: [0xAA; 32],
            nonce: [0x01; 32],
            fiat_amount: 50_000,
            redeemed_token_amount: 0,
            total_value: 50_000,
            reward_amount: 1_500_000_000,
            cashback_rate_bps: 300,
            used_tokens: false,
            signature: "sig-p".to_string(),
            slot: 7,
            block_time: Some(1_754_000_000),
            recorded_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn test_merchant_first_write_wins() {
        let store = SledStore::temporary().unwrap();
        let merchant = test_merchant();

        store.insert_merchant(&merchant).await.unwrap();
        assert!(matches!(
            store.insert_merchant(&merchant).await.unwrap_err(),
            SettlementError::DuplicateRecord(_)
        ));

        let loaded = store.get_merchant(&merchant.merchant_id).await.unwrap();
        assert_eq!(loaded, Some(merchant));
    }

    #[tokio::test]
    async fn test_reserve_cas_lifecycle() {
        let store = SledStore::temporary().unwrap();
        let key = [0x42; 32];

        assert!(matches!(
            store.reserve_idempotency(&key, "sig").await.unwrap(),
            ReserveState::Inserted
        ));
        assert!(matches!(
            store.reserve_idempotency(&key, "sig").await.unwrap(),
            ReserveState::Existing(_)
        ));

        store.fail_idempotency(&key, "timed out").await.unwrap();
        assert!(matches!(
            store.reserve_idempotency(&key, "sig2").await.unwrap(),
            ReserveState::Rearmed(_)
        ));

        let rec = store.get_idempotency(&key).await.unwrap().unwrap();
        assert_eq!(rec.status, IdempotencyStatus::Pending);
        assert_eq!(rec.signature, "sig2");
    }

    #[tokio::test]
    async fn test_commit_purchase_transactional() {
        let store = SledStore::temporary().unwrap();
        store.insert_merchant(&test_merchant()).await.unwrap();

        let record = test_purchase();
        let key = [0x42; 32];
        store
            .reserve_idempotency(&key, &record.signature)
            .await
            .unwrap();
        store.commit_purchase(&record, &key).await.unwrap();

        let merchant = store.get_merchant(&[0xAA; 32]).await.unwrap().unwrap();
        assert_eq!(merchant.total_transactions, 1);
        assert_eq!(merchant.total_volume, 50_000);
        assert_eq!(merchant.total_rewards_distributed, 1_500_000_000);

        let reservation = store.get_idempotency(&key).await.unwrap().unwrap();
        assert_eq!(reservation.status, IdempotencyStatus::Completed);
        assert_eq!(reservation.record_id, Some(record.record_id));
    }

    #[tokio::test]
    async fn test_duplicate_commit_aborts_whole_transaction() {
        let store = SledStore::temporary().unwrap();
        store.insert_merchant(&test_merchant()).await.unwrap();

        let record = test_purchase();
        let key1 = [0x42; 32];
        store
            .reserve_idempotency(&key1, &record.signature)
            .await
            .unwrap();
        store.commit_purchase(&record, &key1).await.unwrap();

        let key2 = [0x43; 32];
        store
            .reserve_idempotency(&key2, &record.signature)
            .await
            .unwrap();
        let err = store.commit_purchase(&record, &key2).await.unwrap_err();
        assert!(matches!(err, SettlementError::DuplicateRecord(_)));

        // The abort must not have completed the key or bumped aggregates.
        let merchant = store.get_merchant(&[0xAA; 32]).await.unwrap().unwrap();
        assert_eq!(merchant.total_transactions, 1);
        let reservation = store.get_idempotency(&key2).await.unwrap().unwrap();
        assert_eq!(reservation.status, IdempotencyStatus::Pending);
    }

    #[tokio::test]
    async fn test_commit_redemption_decrements_earned() {
        let store = SledStore::temporary().unwrap();
        store.insert_merchant(&test_merchant()).await.unwrap();

        // Seed earned balance via a purchase
        let purchase = test_purchase();
        let key1 = [0x42; 32];
        store
            .reserve_idempotency(&key1, &purchase.signature)
            .await
            .unwrap();
        store.commit_purchase(&purchase, &key1).await.unwrap();

        let redemption = RedemptionRecord {
            record_id: [0xCC; 32],
            customer: [0x22; 32],
            merchant_id: [0xAA; 32],
            nonce: [0x02; 32],
            token_amount: 1_000_000_000,
            fiat_value: 1_000,
            discount_rate_bps: 0,
            signature: "sig-r".to_string(),
            slot: 8,
            block_time: Some(1_754_000_100),
            recorded_at: Timestamp::now(),
        };
        let key2 = [0x43; 32];
        store
            .reserve_idempotency(&key2, &redemption.signature)
            .await
            .unwrap();
        store.commit_redemption(&redemption, &key2).await.unwrap();

        let relation = store
            .get_customer_merchant(&[0x22; 32], &[0xAA; 32])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relation.total_earned, 500_000_000);

        let merchant = store.get_merchant(&[0xAA; 32]).await.unwrap().unwrap();
        assert_eq!(merchant.total_transactions, 2);
        assert_eq!(merchant.total_volume, 51_000);
    }

    #[tokio::test]
    async fn test_update_merchant_patch() {
        let store = SledStore::temporary().unwrap();
        let merchant = test_merchant();
        store.insert_merchant(&merchant).await.unwrap();

        let patch = MerchantPatch {
            cashback_rate_bps: crate::types::FieldPatch::SetTo(800),
            is_active: crate::types::FieldPatch::SetTo(false),
        };
        let updated = store
            .update_merchant(&merchant.merchant_id, &merchant.wallet, &patch)
            .await
            .unwrap();
        assert_eq!(updated.cashback_rate_bps, 800);
        assert!(!updated.is_active);

        assert!(matches!(
            store
                .update_merchant(&merchant.merchant_id, &[0x99; 32], &patch)
                .await
                .unwrap_err(),
            SettlementError::OwnerMismatch
        ));
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let store = SledStore::temporary().unwrap();
        store.insert_merchant(&test_merchant()).await.unwrap();

        let record = test_purchase();
        let key = [0x42; 32];
        store
            .reserve_idempotency(&key, &record.signature)
            .await
            .unwrap();
        store.commit_purchase(&record, &key).await.unwrap();
        store
            .reserve_idempotency(&[0x50; 32], "sig-pending")
            .await
            .unwrap();
        store.fail_idempotency(&[0x50; 32], "timeout").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.merchants, 1);
        assert_eq!(stats.purchases, 1);
        assert_eq!(stats.completed_keys, 1);
        assert_eq!(stats.failed_keys, 1);
    }
}
