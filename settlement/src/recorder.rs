//! Transaction Recorder
//!
//! Orchestrates recording of ledger-settled events into the relational
//! store: reserve the idempotency key, verify settlement on the ledger,
//! recompute the economic values from client-asserted inputs, then persist
//! the record, the aggregate increments and the key completion as one
//! atomic commit.
//!
//! The recomputation is the correctness firewall: stored reward amounts
//! derive from the inputs and the merchant's rate, never from
//! client-reported outputs.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::address::AddressDeriver;
use crate::calculator;
use crate::config::SettlementConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::idempotency::{IdempotencyLedger, ReserveOutcome};
use crate::ledger::LedgerRpc;
use crate::monitor::ConfirmationMonitor;
use crate::storage::SettlementStore;
use crate::types::{
    digest_to_hex, AccountId, IdempotencyKey, IdempotencyRecord, IdempotencyStatus, MerchantPatch,
    MerchantRecord, Nonce, PurchaseRecord, RecordKind, RedemptionRecord, Signature, Timestamp,
    TransferRecord,
};

/// Inputs asserted by the client for a settled purchase
#[derive(Debug, Clone)]
pub struct PurchaseParams {
    /// Customer wallet
    pub customer: AccountId,
    /// Merchant wallet
    pub merchant_wallet: AccountId,
    /// Event nonce used on the ledger
    pub nonce: Nonce,
    /// Fiat amount in minor currency units
    pub fiat_amount: u64,
    /// Credits redeemed as payment, smallest units
    pub redeemed_token_amount: Option<u64>,
    /// Settlement signature
    pub signature: Signature,
}

/// Inputs asserted by the client for a settled transfer
#[derive(Debug, Clone)]
pub struct TransferParams {
    /// Sending wallet
    pub sender: AccountId,
    /// Receiving wallet
    pub recipient: AccountId,
    /// Event nonce used on the ledger
    pub nonce: Nonce,
    /// Credits transferred, smallest units
    pub amount: u64,
    /// Free-form note (at most 64 bytes)
    pub memo: String,
    /// Settlement signature
    pub signature: Signature,
}

/// Inputs asserted by the client for a settled redemption
#[derive(Debug, Clone)]
pub struct RedemptionParams {
    /// Customer wallet
    pub customer: AccountId,
    /// Merchant wallet
    pub merchant_wallet: AccountId,
    /// Event nonce used on the ledger
    pub nonce: Nonce,
    /// Credits debited, smallest units
    pub token_amount: u64,
    /// Fiat-equivalent value in minor currency units
    pub fiat_value: u64,
    /// Discount applied, basis points
    pub discount_rate_bps: u16,
    /// Settlement signature
    pub signature: Signature,
}

/// Merchant registration inputs
#[derive(Debug, Clone)]
pub struct RegisterMerchantParams {
    /// Owning wallet
    pub wallet: AccountId,
    /// Display name (at most 32 bytes)
    pub name: String,
    /// Business category (at most 16 bytes)
    pub category: String,
    /// Cashback rate in basis points
    pub cashback_rate_bps: u16,
}

/// Records ledger-settled events exactly once
pub struct TransactionRecorder<S: SettlementStore, L: LedgerRpc> {
    /// Relational store
    store: Arc<S>,
    /// Idempotency ledger over the same store
    idempotency: IdempotencyLedger<S>,
    /// Confirmation monitor over the ledger connection
    monitor: ConfirmationMonitor<L>,
    /// Record identity derivation
    deriver: AddressDeriver,
    /// Default confirmation wait
    confirmation_timeout: Duration,
}

impl<S: SettlementStore, L: LedgerRpc> TransactionRecorder<S, L> {
    /// Create a recorder from injected collaborators.
    ///
    /// Collaborators are constructed once at process start; the caller owns
    /// their lifecycle.
    pub fn new(
        store: Arc<S>,
        ledger: Arc<L>,
        config: &SettlementConfig,
    ) -> SettlementResult<Self> {
        let program_id = config.ledger.program_id_bytes()?;
        Ok(Self {
            idempotency: IdempotencyLedger::new(store.clone()),
            monitor: ConfirmationMonitor::new(ledger, config),
            deriver: AddressDeriver::new(program_id),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
            store,
        })
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The record identity deriver
    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    // ==================== Recording operations ====================

    /// Record a settled purchase exactly once.
    ///
    /// Replaying a completed idempotency key returns the previously
    /// recorded result unchanged.
    pub async fn record_purchase(
        &self,
        params: &PurchaseParams,
        key: IdempotencyKey,
    ) -> SettlementResult<PurchaseRecord> {
        // A completed key replays the prior result as-is, even if the
        // merchant state has changed since.
        if let Some(reservation) = self.completed_reservation(&key).await? {
            return self.replay_purchase(&key, reservation).await;
        }

        let redeemed = params.redeemed_token_amount.unwrap_or(0);

        // Validation happens before any side effect: merchant lookup is a
        // read, and the calculator rejects malformed inputs.
        let merchant = self.active_merchant(&params.merchant_wallet).await?;
        let value = calculator::purchase_value(
            params.fiat_amount,
            redeemed,
            merchant.cashback_rate_bps,
        )?;

        match self.idempotency.reserve(&key, &params.signature).await? {
            ReserveOutcome::Completed(reservation) => {
                return self.replay_purchase(&key, reservation).await
            }
            ReserveOutcome::Pending(_) => {
                return Err(SettlementError::RequestPending {
                    key: digest_to_hex(&key),
                })
            }
            ReserveOutcome::New | ReserveOutcome::Retry(_) => {}
        }

        let confirmation = match self
            .monitor
            .wait_for_confirmation(&params.signature, self.confirmation_timeout)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(e) => return Err(self.abort_reservation(&key, e).await),
        };

        let record = PurchaseRecord {
            record_id: self.deriver.purchase_address(&params.customer, &params.nonce),
            customer: params.customer,
            merchant_id: merchant.merchant_id,
            nonce: params.nonce,
            fiat_amount: params.fiat_amount,
            redeemed_token_amount: redeemed,
            total_value: value.total_value,
            reward_amount: value.reward_units,
            cashback_rate_bps: merchant.cashback_rate_bps,
            used_tokens: redeemed > 0,
            signature: params.signature.clone(),
            slot: confirmation.slot,
            block_time: confirmation.block_time,
            recorded_at: Timestamp::now(),
        };

        if let Err(e) = self.store.commit_purchase(&record, &key).await {
            return Err(self.abort_reservation(&key, e).await);
        }

        info!(
            "Recorded purchase {}: total {} minor units, reward {} units at {}bps",
            digest_to_hex(&record.record_id),
            record.total_value,
            record.reward_amount,
            record.cashback_rate_bps
        );
        Ok(record)
    }

    /// Record a settled peer-to-peer transfer exactly once.
    pub async fn record_transfer(
        &self,
        params: &TransferParams,
        key: IdempotencyKey,
    ) -> SettlementResult<TransferRecord> {
        if let Some(reservation) = self.completed_reservation(&key).await? {
            return self.replay_transfer(&key, reservation).await;
        }

        calculator::validate_transfer(
            &params.sender,
            &params.recipient,
            params.amount,
            &params.memo,
        )?;

        match self.idempotency.reserve(&key, &params.signature).await? {
            ReserveOutcome::Completed(reservation) => {
                return self.replay_transfer(&key, reservation).await
            }
            ReserveOutcome::Pending(_) => {
                return Err(SettlementError::RequestPending {
                    key: digest_to_hex(&key),
                })
            }
            ReserveOutcome::New | ReserveOutcome::Retry(_) => {}
        }

        let confirmation = match self
            .monitor
            .wait_for_confirmation(&params.signature, self.confirmation_timeout)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(e) => return Err(self.abort_reservation(&key, e).await),
        };

        let record = TransferRecord {
            record_id: self.deriver.transfer_address(&params.sender, &params.nonce),
            sender: params.sender,
            recipient: params.recipient,
            nonce: params.nonce,
            amount: params.amount,
            memo: params.memo.clone(),
            signature: params.signature.clone(),
            slot: confirmation.slot,
            block_time: confirmation.block_time,
            recorded_at: Timestamp::now(),
        };

        if let Err(e) = self.store.commit_transfer(&record, &key).await {
            return Err(self.abort_reservation(&key, e).await);
        }

        info!(
            "Recorded transfer {}: {} units",
            digest_to_hex(&record.record_id),
            record.amount
        );
        Ok(record)
    }

    /// Record a settled in-store redemption exactly once.
    pub async fn record_redemption(
        &self,
        params: &RedemptionParams,
        key: IdempotencyKey,
    ) -> SettlementResult<RedemptionRecord> {
        if let Some(reservation) = self.completed_reservation(&key).await? {
            return self.replay_redemption(&key, reservation).await;
        }

        let merchant = self.active_merchant(&params.merchant_wallet).await?;
        calculator::validate_redemption(
            params.token_amount,
            params.fiat_value,
            params.discount_rate_bps,
        )?;

        match self.idempotency.reserve(&key, &params.signature).await? {
            ReserveOutcome::Completed(reservation) => {
                return self.replay_redemption(&key, reservation).await
            }
            ReserveOutcome::Pending(_) => {
                return Err(SettlementError::RequestPending {
                    key: digest_to_hex(&key),
                })
            }
            ReserveOutcome::New | ReserveOutcome::Retry(_) => {}
        }

        let confirmation = match self
            .monitor
            .wait_for_confirmation(&params.signature, self.confirmation_timeout)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(e) => return Err(self.abort_reservation(&key, e).await),
        };

        let record = RedemptionRecord {
            record_id: self.deriver.redemption_address(
                &params.customer,
                &merchant.merchant_id,
                &params.nonce,
            ),
            customer: params.customer,
            merchant_id: merchant.merchant_id,
            nonce: params.nonce,
            token_amount: params.token_amount,
            fiat_value: params.fiat_value,
            discount_rate_bps: params.discount_rate_bps,
            signature: params.signature.clone(),
            slot: confirmation.slot,
            block_time: confirmation.block_time,
            recorded_at: Timestamp::now(),
        };

        if let Err(e) = self.store.commit_redemption(&record, &key).await {
            return Err(self.abort_reservation(&key, e).await);
        }

        info!(
            "Recorded redemption {}: {} units against {} minor units",
            digest_to_hex(&record.record_id),
            record.token_amount,
            record.fiat_value
        );
        Ok(record)
    }

    // ==================== Merchant lifecycle ====================

    /// Register a merchant; the identity derives from its wallet
    pub async fn register_merchant(
        &self,
        params: &RegisterMerchantParams,
    ) -> SettlementResult<MerchantRecord> {
        calculator::validate_merchant_profile(
            &params.name,
            &params.category,
            params.cashback_rate_bps,
        )?;

        let now = Timestamp::now();
        let record = MerchantRecord {
            merchant_id: self.deriver.merchant_address(&params.wallet),
            wallet: params.wallet,
            name: params.name.clone(),
            category: params.category.clone(),
            cashback_rate_bps: params.cashback_rate_bps,
            is_active: true,
            total_transactions: 0,
            total_volume: 0,
            total_rewards_distributed: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_merchant(&record).await?;

        info!(
            "Registered merchant {} ({}) at {}bps",
            record.name, record.category, record.cashback_rate_bps
        );
        Ok(record)
    }

    /// Update merchant settings; only the owning wallet may do so
    pub async fn update_merchant(
        &self,
        wallet: &AccountId,
        patch: &MerchantPatch,
    ) -> SettlementResult<MerchantRecord> {
        if let Some(rate) = patch.cashback_rate_bps.value() {
            if rate > calculator::MAX_RATE_BPS {
                return Err(SettlementError::Validation(format!(
                    "cashback rate {} exceeds {} bps",
                    rate,
                    calculator::MAX_RATE_BPS
                )));
            }
        }
        let merchant_id = self.deriver.merchant_address(wallet);
        self.store.update_merchant(&merchant_id, wallet, patch).await
    }

    /// Look up a merchant by its wallet
    pub async fn merchant(&self, wallet: &AccountId) -> SettlementResult<Option<MerchantRecord>> {
        self.store
            .get_merchant(&self.deriver.merchant_address(wallet))
            .await
    }

    // ==================== Internals ====================

    /// Read-only lookup of a completed reservation for early replay.
    async fn completed_reservation(
        &self,
        key: &IdempotencyKey,
    ) -> SettlementResult<Option<IdempotencyRecord>> {
        Ok(self
            .idempotency
            .check(key)
            .await?
            .filter(|reservation| reservation.status == IdempotencyStatus::Completed))
    }

    async fn active_merchant(&self, wallet: &AccountId) -> SettlementResult<MerchantRecord> {
        let merchant_id = self.deriver.merchant_address(wallet);
        let merchant = self
            .store
            .get_merchant(&merchant_id)
            .await?
            .ok_or_else(|| SettlementError::MerchantNotFound(digest_to_hex(&merchant_id)))?;
        if !merchant.is_active {
            return Err(SettlementError::MerchantNotActive(digest_to_hex(
                &merchant_id,
            )));
        }
        Ok(merchant)
    }

    /// Mark the reservation failed and hand the error back to the caller.
    async fn abort_reservation(
        &self,
        key: &IdempotencyKey,
        err: SettlementError,
    ) -> SettlementError {
        if let Err(fail_err) = self.idempotency.fail(key, &err.to_string()).await {
            warn!(
                "Could not mark reservation {} failed: {}",
                digest_to_hex(key),
                fail_err
            );
        }
        err
    }

    fn replayed_record_id(
        key: &IdempotencyKey,
        reservation: &IdempotencyRecord,
        expected: RecordKind,
    ) -> SettlementResult<crate::types::RecordId> {
        if reservation.record_kind != Some(expected) {
            return Err(SettlementError::Validation(format!(
                "idempotency key {} was used for a different operation",
                digest_to_hex(key)
            )));
        }
        reservation.record_id.ok_or_else(|| {
            SettlementError::Storage(format!(
                "completed reservation {} has no record id",
                digest_to_hex(key)
            ))
        })
    }

    async fn replay_purchase(
        &self,
        key: &IdempotencyKey,
        reservation: IdempotencyRecord,
    ) -> SettlementResult<PurchaseRecord> {
        let record_id = Self::replayed_record_id(key, &reservation, RecordKind::Purchase)?;
        info!("Replaying purchase for key {}", digest_to_hex(key));
        self.store.get_purchase(&record_id).await?.ok_or_else(|| {
            SettlementError::Storage(format!(
                "completed reservation {} points at missing purchase",
                digest_to_hex(key)
            ))
        })
    }

    async fn replay_transfer(
        &self,
        key: &IdempotencyKey,
        reservation: IdempotencyRecord,
    ) -> SettlementResult<TransferRecord> {
        let record_id = Self::replayed_record_id(key, &reservation, RecordKind::Transfer)?;
        info!("Replaying transfer for key {}", digest_to_hex(key));
        self.store.get_transfer(&record_id).await?.ok_or_else(|| {
            SettlementError::Storage(format!(
                "completed reservation {} points at missing transfer",
                digest_to_hex(key)
            ))
        })
    }

    async fn replay_redemption(
        &self,
        key: &IdempotencyKey,
        reservation: IdempotencyRecord,
    ) -> SettlementResult<RedemptionRecord> {
        let record_id = Self::replayed_record_id(key, &reservation, RecordKind::Redemption)?;
        info!("Replaying redemption for key {}", digest_to_hex(key));
        self.store.get_redemption(&record_id).await?.ok_or_else(|| {
            SettlementError::Storage(format!(
                "completed reservation {} points at missing redemption",
                digest_to_hex(key)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{SignatureStatus, TransactionDetail};
    use crate::storage::MemoryStore;
    use crate::types::FieldPatch;
    use async_trait::async_trait;

    /// Ledger stub that settles every signature immediately
    struct InstantLedger;

    #[async_trait]
    impl LedgerRpc for InstantLedger {
        async fn get_signature_status(&self, _signature: &str) -> SettlementResult<SignatureStatus> {
            Ok(SignatureStatus::Confirmed)
        }

        async fn get_transaction(&self, _signature: &str) -> SettlementResult<TransactionDetail> {
            Ok(TransactionDetail {
                slot: 99,
                block_time: Some(1_754_000_000),
            })
        }
    }

    /// Ledger stub that never settles
    struct NeverLedger;

    #[async_trait]
    impl LedgerRpc for NeverLedger {
        async fn get_signature_status(&self, _signature: &str) -> SettlementResult<SignatureStatus> {
            Ok(SignatureStatus::Pending)
        }

        async fn get_transaction(&self, _signature: &str) -> SettlementResult<TransactionDetail> {
            Err(SettlementError::SignatureNotFound("never".to_string()))
        }
    }

    /// Ledger stub that reports an execution failure
    struct RejectingLedger;

    #[async_trait]
    impl LedgerRpc for RejectingLedger {
        async fn get_signature_status(&self, _signature: &str) -> SettlementResult<SignatureStatus> {
            Ok(SignatureStatus::Errored {
                reason: "insufficient balance".to_string(),
            })
        }

        async fn get_transaction(&self, _signature: &str) -> SettlementResult<TransactionDetail> {
            Err(SettlementError::SignatureNotFound("rejected".to_string()))
        }
    }

    /// Ledger stub that must never be polled
    struct PanicLedger;

    #[async_trait]
    impl LedgerRpc for PanicLedger {
        async fn get_signature_status(&self, _signature: &str) -> SettlementResult<SignatureStatus> {
            panic!("validation must reject before the confirmation watcher runs");
        }

        async fn get_transaction(&self, _signature: &str) -> SettlementResult<TransactionDetail> {
            panic!("validation must reject before the confirmation watcher runs");
        }
    }

    const MERCHANT_WALLET: AccountId = [0x11; 32];
    const CUSTOMER: AccountId = [0x22; 32];

    fn recorder_with<L: LedgerRpc>(ledger: L) -> TransactionRecorder<MemoryStore, L> {
        let mut config = SettlementConfig::development();
        config.poll_interval_ms = 10;
        config.confirmation_timeout_secs = 1;
        TransactionRecorder::new(Arc::new(MemoryStore::new()), Arc::new(ledger), &config).unwrap()
    }

    async fn register_test_merchant<L: LedgerRpc>(
        recorder: &TransactionRecorder<MemoryStore, L>,
        rate: u16,
    ) -> MerchantRecord {
        recorder
            .register_merchant(&RegisterMerchantParams {
                wallet: MERCHANT_WALLET,
                name: "Kopi Kenangan".to_string(),
                category: "coffee_shop".to_string(),
                cashback_rate_bps: rate,
            })
            .await
            .unwrap()
    }

    fn purchase_params(nonce: u8, fiat: u64) -> PurchaseParams {
        PurchaseParams {
            customer: CUSTOMER,
            merchant_wallet: MERCHANT_WALLET,
            nonce: [nonce; 32],
            fiat_amount: fiat,
            redeemed_token_amount: None,
            signature: format!("sig-{}", nonce),
        }
    }

    #[tokio::test]
    async fn test_record_purchase_happy_path() {
        let recorder = recorder_with(InstantLedger);
        let merchant = register_test_merchant(&recorder, 300).await;

        let record = recorder
            .record_purchase(&purchase_params(1, 100_000), [0x01; 32])
            .await
            .unwrap();

        assert_eq!(record.total_value, 100_000);
        assert_eq!(record.reward_amount, 3_000_000_000);
        assert_eq!(record.cashback_rate_bps, 300);
        assert_eq!(record.slot, 99);
        assert!(!record.used_tokens);

        let merchant = recorder
            .store()
            .get_merchant(&merchant.merchant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merchant.total_transactions, 1);
        assert_eq!(merchant.total_volume, 100_000);
        assert_eq!(merchant.total_rewards_distributed, 3_000_000_000);

        let relation = recorder
            .store()
            .get_customer_merchant(&CUSTOMER, &merchant.merchant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relation.visit_count, 1);
        assert_eq!(relation.total_earned, 3_000_000_000);
    }

    #[tokio::test]
    async fn test_purchase_with_redemption_value() {
        let recorder = recorder_with(InstantLedger);
        register_test_merchant(&recorder, 400).await;

        let mut params = purchase_params(2, 50_000);
        params.redeemed_token_amount = Some(5_000_000_000);

        let record = recorder.record_purchase(&params, [0x02; 32]).await.unwrap();
        assert_eq!(record.total_value, 55_000);
        assert_eq!(record.reward_amount, 2_200_000_000);
        assert!(record.used_tokens);
    }

    #[tokio::test]
    async fn test_replay_returns_identical_record() {
        let recorder = recorder_with(InstantLedger);
        let merchant = register_test_merchant(&recorder, 300).await;

        let params = purchase_params(3, 80_000);
        let key = [0x03; 32];

        let first = recorder.record_purchase(&params, key).await.unwrap();
        let second = recorder.record_purchase(&params, key).await.unwrap();
        assert_eq!(first, second);

        // Aggregates moved exactly once
        let merchant = recorder
            .store()
            .get_merchant(&merchant.merchant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merchant.total_transactions, 1);
        assert_eq!(merchant.total_volume, 80_000);
    }

    #[tokio::test]
    async fn test_unknown_merchant_rejected_before_reservation() {
        let recorder = recorder_with(PanicLedger);

        let key = [0x04; 32];
        let err = recorder
            .record_purchase(&purchase_params(4, 10_000), key)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::MerchantNotFound(_)));

        // No reservation was created
        assert!(recorder
            .store()
            .get_idempotency(&key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_inactive_merchant_rejected() {
        let recorder = recorder_with(PanicLedger);
        register_test_merchant(&recorder, 300).await;
        recorder
            .update_merchant(
                &MERCHANT_WALLET,
                &MerchantPatch {
                    is_active: FieldPatch::SetTo(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = recorder
            .record_purchase(&purchase_params(5, 10_000), [0x05; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::MerchantNotActive(_)));
    }

    #[tokio::test]
    async fn test_zero_value_purchase_never_reaches_watcher() {
        let recorder = recorder_with(PanicLedger);
        register_test_merchant(&recorder, 300).await;

        let err = recorder
            .record_purchase(&purchase_params(6, 0), [0x06; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[tokio::test]
    async fn test_ledger_rejection_marks_key_failed() {
        let recorder = recorder_with(RejectingLedger);
        register_test_merchant(&recorder, 300).await;

        let key = [0x07; 32];
        let err = recorder
            .record_purchase(&purchase_params(7, 10_000), key)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::LedgerRejected { .. }));
        assert!(!err.is_retryable());

        let reservation = recorder
            .store()
            .get_idempotency(&key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.status, IdempotencyStatus::Failed);

        // No domain row was created
        let record_id = recorder.deriver().purchase_address(&CUSTOMER, &[7; 32]);
        assert!(recorder
            .store()
            .get_purchase(&record_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_confirmation_timeout_is_retryable() {
        let recorder = recorder_with(NeverLedger);
        register_test_merchant(&recorder, 300).await;

        let key = [0x08; 32];
        let err = recorder
            .record_purchase(&purchase_params(8, 10_000), key)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotConfirmed { .. }));
        assert!(err.is_retryable());

        let reservation = recorder
            .store()
            .get_idempotency(&key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.status, IdempotencyStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_purchases_aggregate_exactly() {
        let recorder = Arc::new(recorder_with(InstantLedger));
        let merchant = register_test_merchant(&recorder, 200).await;

        let mut handles = Vec::new();
        let mut expected_volume = 0u64;
        for i in 0..6u8 {
            let fiat = 10_000 * (i as u64 + 1);
            expected_volume += fiat;
            let recorder = recorder.clone();
            handles.push(tokio::spawn(async move {
                let mut params = purchase_params(100 + i, fiat);
                params.customer = [0x30 + i; 32];
                recorder.record_purchase(&params, [0x40 + i; 32]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let merchant = recorder
            .store()
            .get_merchant(&merchant.merchant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merchant.total_transactions, 6);
        assert_eq!(merchant.total_volume, expected_volume);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_commits_once() {
        let recorder = Arc::new(recorder_with(InstantLedger));
        let merchant = register_test_merchant(&recorder, 300).await;

        let params = purchase_params(9, 10_000);
        let key = [0x09; 32];

        let mut handles = Vec::new();
        for _ in 0..2 {
            let recorder = recorder.clone();
            let params = params.clone();
            handles.push(tokio::spawn(async move {
                recorder.record_purchase(&params, key).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(record) => {
                    successes += 1;
                    assert_eq!(record.fiat_amount, 10_000);
                }
                Err(SettlementError::RequestPending { .. }) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert!(successes >= 1);

        let merchant = recorder
            .store()
            .get_merchant(&merchant.merchant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merchant.total_transactions, 1);
    }

    #[tokio::test]
    async fn test_record_transfer() {
        let recorder = recorder_with(InstantLedger);

        let params = TransferParams {
            sender: [0x22; 32],
            recipient: [0x33; 32],
            nonce: [0x0A; 32],
            amount: 2_500_000_000,
            memo: "lunch split".to_string(),
            signature: "sig-t".to_string(),
        };
        let record = recorder
            .record_transfer(&params, [0x0A; 32])
            .await
            .unwrap();
        assert_eq!(record.amount, 2_500_000_000);
        assert_eq!(record.memo, "lunch split");
        assert_eq!(record.slot, 99);

        // Replay
        let replayed = recorder
            .record_transfer(&params, [0x0A; 32])
            .await
            .unwrap();
        assert_eq!(record, replayed);
    }

    #[tokio::test]
    async fn test_self_transfer_never_reaches_watcher() {
        let recorder = recorder_with(PanicLedger);

        let params = TransferParams {
            sender: [0x22; 32],
            recipient: [0x22; 32],
            nonce: [0x0B; 32],
            amount: 1_000,
            memo: String::new(),
            signature: "sig-self".to_string(),
        };
        let err = recorder
            .record_transfer(&params, [0x0B; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[tokio::test]
    async fn test_record_redemption_updates_aggregates() {
        let recorder = recorder_with(InstantLedger);
        let merchant = register_test_merchant(&recorder, 300).await;

        // Earn some credits first
        recorder
            .record_purchase(&purchase_params(12, 100_000), [0x0C; 32])
            .await
            .unwrap();

        let params = RedemptionParams {
            customer: CUSTOMER,
            merchant_wallet: MERCHANT_WALLET,
            nonce: [0x0D; 32],
            token_amount: 1_000_000_000,
            fiat_value: 1_000,
            discount_rate_bps: 0,
            signature: "sig-r".to_string(),
        };
        let record = recorder
            .record_redemption(&params, [0x0D; 32])
            .await
            .unwrap();
        assert_eq!(record.token_amount, 1_000_000_000);

        let merchant = recorder
            .store()
            .get_merchant(&merchant.merchant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merchant.total_transactions, 2);
        assert_eq!(merchant.total_volume, 101_000);
        // Redemptions distribute no rewards
        assert_eq!(merchant.total_rewards_distributed, 3_000_000_000);

        let relation = recorder
            .store()
            .get_customer_merchant(&CUSTOMER, &merchant.merchant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relation.total_earned, 2_000_000_000);
        assert_eq!(relation.visit_count, 1);
    }

    #[tokio::test]
    async fn test_update_merchant_rate_validation() {
        let recorder = recorder_with(InstantLedger);
        register_test_merchant(&recorder, 300).await;

        let err = recorder
            .update_merchant(
                &MERCHANT_WALLET,
                &MerchantPatch {
                    cashback_rate_bps: FieldPatch::SetTo(10_001),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        let updated = recorder
            .update_merchant(
                &MERCHANT_WALLET,
                &MerchantPatch {
                    cashback_rate_bps: FieldPatch::SetTo(150),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.cashback_rate_bps, 150);
    }

    #[tokio::test]
    async fn test_register_merchant_validation() {
        let recorder = recorder_with(InstantLedger);

        let err = recorder
            .register_merchant(&RegisterMerchantParams {
                wallet: MERCHANT_WALLET,
                name: String::new(),
                category: "coffee_shop".to_string(),
                cashback_rate_bps: 300,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        register_test_merchant(&recorder, 300).await;
        let err = recorder
            .register_merchant(&RegisterMerchantParams {
                wallet: MERCHANT_WALLET,
                name: "Another".to_string(),
                category: "coffee_shop".to_string(),
                cashback_rate_bps: 300,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::DuplicateRecord(_)));
    }
}
