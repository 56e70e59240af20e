//! Idempotency ledger
//!
//! Duplicate-suppression boundary for recording operations. The first
//! caller to reserve a key is the only one allowed to run side effects;
//! everyone else observes the existing reservation.
//!
//! The atomicity of `reserve` lives in the storage engine (insert-if-absent
//! / compare-and-swap), so the guarantee holds across processes, not just
//! across tasks in this one.

use std::sync::Arc;
use tracing::debug;

use crate::error::SettlementResult;
use crate::storage::{ReserveState, SettlementStore};
use crate::types::{
    digest_to_hex, IdempotencyKey, IdempotencyRecord, IdempotencyStatus, RecordId, RecordKind,
};

/// Outcome of reserving an idempotency key
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    /// Unseen key; the caller owns the side effects
    New,
    /// A previous attempt failed; the caller may retry, owning the key again
    Retry(IdempotencyRecord),
    /// Another request holds the key and has not finished
    Pending(IdempotencyRecord),
    /// The operation already completed; replay the recorded result
    Completed(IdempotencyRecord),
}

/// Idempotency ledger over a settlement store
pub struct IdempotencyLedger<S: SettlementStore> {
    store: Arc<S>,
}

impl<S: SettlementStore> IdempotencyLedger<S> {
    /// Create a new idempotency ledger
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Reserve a key for a signature.
    ///
    /// Existing pending and completed reservations are returned without
    /// modification; a failed reservation is re-armed for the new attempt.
    pub async fn reserve(
        &self,
        key: &IdempotencyKey,
        signature: &str,
    ) -> SettlementResult<ReserveOutcome> {
        match self.store.reserve_idempotency(key, signature).await? {
            ReserveState::Inserted => {
                debug!("Reserved idempotency key {}", digest_to_hex(key));
                Ok(ReserveOutcome::New)
            }
            ReserveState::Rearmed(prior) => {
                debug!(
                    "Re-armed idempotency key {} after failure: {:?}",
                    digest_to_hex(key),
                    prior.failure_reason
                );
                Ok(ReserveOutcome::Retry(prior))
            }
            ReserveState::Existing(record) => match record.status {
                IdempotencyStatus::Pending => {
                    debug!("Idempotency key {} is in flight", digest_to_hex(key));
                    Ok(ReserveOutcome::Pending(record))
                }
                IdempotencyStatus::Completed => {
                    debug!("Idempotency key {} already completed", digest_to_hex(key));
                    Ok(ReserveOutcome::Completed(record))
                }
                // The store re-arms failed records; reaching here means a
                // concurrent re-arm won, so treat it as in flight.
                IdempotencyStatus::Failed => Ok(ReserveOutcome::Pending(record)),
            },
        }
    }

    /// Current reservation for a key, if any
    pub async fn check(&self, key: &IdempotencyKey) -> SettlementResult<Option<IdempotencyRecord>> {
        self.store.get_idempotency(key).await
    }

    /// Transition a reservation to completed, linking the settled record
    pub async fn complete(
        &self,
        key: &IdempotencyKey,
        signature: &str,
        record_id: &RecordId,
        kind: RecordKind,
    ) -> SettlementResult<()> {
        self.store
            .complete_idempotency(key, signature, record_id, kind)
            .await
    }

    /// Transition a reservation to failed, keeping the key re-usable
    pub async fn fail(&self, key: &IdempotencyKey, reason: &str) -> SettlementResult<()> {
        self.store.fail_idempotency(key, reason).await
    }
}
