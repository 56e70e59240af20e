//! Shared domain types
//!
//! Identities, timestamps, domain records and the idempotency record.
//!
//! All identities are 32-byte values. On text interfaces (APIs, logs,
//! storage keys rendered for humans) they travel as lowercase hex.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// 32-byte digest type
pub type Digest32 = [u8; 32];

/// Wallet identity on the ledger
pub type AccountId = Digest32;

/// Derived identity of a settled record
pub type RecordId = Digest32;

/// Client-chosen 32-byte value, used once per logical event
pub type Nonce = Digest32;

/// Client-supplied key guaranteeing at-most-once recording
pub type IdempotencyKey = Digest32;

/// Settlement signature of a ledger event, opaque to this layer
pub type Signature = String;

/// Timestamp type (Unix milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock timestamp
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Create from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Convert to milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Whether the timestamp is unset
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of settled domain record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Purchase with reward distribution
    Purchase,
    /// Peer-to-peer credit transfer
    Transfer,
    /// In-store credit redemption
    Redemption,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Purchase => write!(f, "purchase"),
            Self::Transfer => write!(f, "transfer"),
            Self::Redemption => write!(f, "redemption"),
        }
    }
}

/// Merchant participating in the loyalty program
///
/// Aggregate totals are only ever mutated through atomic store commits,
/// never read-modify-write in application memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantRecord {
    /// Derived merchant identity
    pub merchant_id: RecordId,
    /// The merchant's wallet on the ledger
    pub wallet: AccountId,
    /// Display name (at most 32 bytes)
    pub name: String,
    /// Business category (at most 16 bytes)
    pub category: String,
    /// Cashback percentage in basis points (0-10000)
    pub cashback_rate_bps: u16,
    /// Whether the merchant currently accepts transactions
    pub is_active: bool,
    /// Number of settled transactions at this merchant
    pub total_transactions: u64,
    /// Settled purchase volume in minor currency units
    pub total_volume: u64,
    /// Reward credits distributed, in smallest credit units
    pub total_rewards_distributed: u64,
    /// Registration time
    pub created_at: Timestamp,
    /// Last settings update
    pub updated_at: Timestamp,
}

/// Settled purchase, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Derived identity of (customer, nonce)
    pub record_id: RecordId,
    /// The purchasing customer's wallet
    pub customer: AccountId,
    /// The merchant's derived identity
    pub merchant_id: RecordId,
    /// Client-chosen event nonce
    pub nonce: Nonce,
    /// Fiat amount in minor currency units
    pub fiat_amount: u64,
    /// Credits redeemed as payment, smallest units (0 if none)
    pub redeemed_token_amount: u64,
    /// Total economic value in minor currency units
    pub total_value: u64,
    /// Reward credits minted, smallest units
    pub reward_amount: u64,
    /// Cashback rate snapshot at time of purchase
    pub cashback_rate_bps: u16,
    /// Whether credits were used as payment
    pub used_tokens: bool,
    /// Settlement signature
    pub signature: Signature,
    /// Block ordinal of settlement
    pub slot: u64,
    /// Ledger block time, seconds since epoch
    pub block_time: Option<i64>,
    /// Recording time in this store
    pub recorded_at: Timestamp,
}

/// Settled peer-to-peer transfer, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Derived identity of (sender, nonce)
    pub record_id: RecordId,
    /// Sending wallet
    pub sender: AccountId,
    /// Receiving wallet
    pub recipient: AccountId,
    /// Client-chosen event nonce
    pub nonce: Nonce,
    /// Credits transferred, smallest units
    pub amount: u64,
    /// Free-form note (at most 64 bytes)
    pub memo: String,
    /// Settlement signature
    pub signature: Signature,
    /// Block ordinal of settlement
    pub slot: u64,
    /// Ledger block time, seconds since epoch
    pub block_time: Option<i64>,
    /// Recording time in this store
    pub recorded_at: Timestamp,
}

/// Settled in-store redemption, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionRecord {
    /// Derived identity of (customer, merchant, nonce)
    pub record_id: RecordId,
    /// The redeeming customer's wallet
    pub customer: AccountId,
    /// The merchant's derived identity
    pub merchant_id: RecordId,
    /// Client-chosen event nonce
    pub nonce: Nonce,
    /// Credits debited, smallest units
    pub token_amount: u64,
    /// Fiat-equivalent value in minor currency units
    pub fiat_value: u64,
    /// Discount applied, basis points
    pub discount_rate_bps: u16,
    /// Settlement signature
    pub signature: Signature,
    /// Block ordinal of settlement
    pub slot: u64,
    /// Ledger block time, seconds since epoch
    pub block_time: Option<i64>,
    /// Recording time in this store
    pub recorded_at: Timestamp,
}

/// Per-(customer, merchant) relationship aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMerchantStats {
    /// Customer wallet
    pub customer: AccountId,
    /// Merchant derived identity
    pub merchant_id: RecordId,
    /// Settled purchases by this customer at this merchant
    pub visit_count: u64,
    /// Total spent in minor currency units
    pub total_spent: u64,
    /// Total credits earned here, smallest units
    pub total_earned: u64,
    /// First settled visit
    pub first_visit_at: Timestamp,
    /// Most recent settled activity
    pub last_visit_at: Timestamp,
}

impl CustomerMerchantStats {
    /// Fresh relation row with zeroed aggregates
    pub fn new(customer: AccountId, merchant_id: RecordId, now: Timestamp) -> Self {
        Self {
            customer,
            merchant_id,
            visit_count: 0,
            total_spent: 0,
            total_earned: 0,
            first_visit_at: now,
            last_visit_at: now,
        }
    }
}

/// Idempotency record lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// Reserved; side effects may be in flight
    Pending,
    /// Side effects applied exactly once
    Completed,
    /// The attempt failed; the key may be re-armed
    Failed,
}

impl IdempotencyStatus {
    /// Whether the record will no longer transition on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Durable record of one idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Client-supplied key, globally unique
    pub key: IdempotencyKey,
    /// Current lifecycle state
    pub status: IdempotencyStatus,
    /// Settlement signature the reservation is bound to
    pub signature: Signature,
    /// Domain record created under this key (set on completion)
    pub record_id: Option<RecordId>,
    /// Kind of that domain record
    pub record_kind: Option<RecordKind>,
    /// Why the attempt failed (set on failure)
    pub failure_reason: Option<String>,
    /// Reservation time
    pub created_at: Timestamp,
    /// Completion time
    pub completed_at: Option<Timestamp>,
}

impl IdempotencyRecord {
    /// New pending reservation for a signature
    pub fn pending(key: IdempotencyKey, signature: &str) -> Self {
        Self {
            key,
            status: IdempotencyStatus::Pending,
            signature: signature.to_string(),
            record_id: None,
            record_kind: None,
            failure_reason: None,
            created_at: Timestamp::now(),
            completed_at: None,
        }
    }
}

/// Settlement outcome observed on the ledger (derived, not stored)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnChainConfirmation {
    /// Settlement signature
    pub signature: Signature,
    /// Block ordinal
    pub slot: u64,
    /// Block time, seconds since epoch
    pub block_time: Option<i64>,
    /// Whether the event is settled at the required commitment
    pub confirmed: bool,
}

/// Per-field update semantics for mutable merchant settings
///
/// Replaces null-means-no-change conventions: an untouched field is
/// `Unchanged`, an explicit update is `SetTo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldPatch<T> {
    /// Leave the field as it is
    #[default]
    Unchanged,
    /// Set the field to the given value
    SetTo(T),
}

impl<T: Copy> FieldPatch<T> {
    /// Apply to a field slot; returns whether it changed
    pub fn apply(&self, slot: &mut T) -> bool {
        match self {
            Self::Unchanged => false,
            Self::SetTo(value) => {
                *slot = *value;
                true
            }
        }
    }

    /// The new value, if any
    pub fn value(&self) -> Option<T> {
        match self {
            Self::Unchanged => None,
            Self::SetTo(value) => Some(*value),
        }
    }
}

/// Patch for the merchant settings mutable by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MerchantPatch {
    /// New cashback rate in basis points
    pub cashback_rate_bps: FieldPatch<u16>,
    /// New active flag
    pub is_active: FieldPatch<bool>,
}

impl MerchantPatch {
    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.cashback_rate_bps == FieldPatch::Unchanged && self.is_active == FieldPatch::Unchanged
    }
}

/// Render a 32-byte value as lowercase hex
pub fn digest_to_hex(digest: &Digest32) -> String {
    hex::encode(digest)
}

/// Parse a 32-byte value from hex
pub fn digest_from_hex(hex_str: &str) -> Result<Digest32, hex::FromHexError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes);
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp() {
        let ts = Timestamp::now();
        assert!(!ts.is_zero());
        assert!(ts.as_millis() > 0);
    }

    #[test]
    fn test_digest_hex_roundtrip() {
        let original = [0xab; 32];
        let hex_str = digest_to_hex(&original);
        assert_eq!(hex_str.len(), 64);
        let parsed = digest_from_hex(&hex_str).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_digest_from_hex_rejects_short_input() {
        assert!(digest_from_hex("abcd").is_err());
    }

    #[test]
    fn test_field_patch_apply() {
        let mut rate: u16 = 300;
        assert!(!FieldPatch::<u16>::Unchanged.apply(&mut rate));
        assert_eq!(rate, 300);

        assert!(FieldPatch::SetTo(500u16).apply(&mut rate));
        assert_eq!(rate, 500);
    }

    #[test]
    fn test_merchant_patch_is_empty() {
        assert!(MerchantPatch::default().is_empty());
        let patch = MerchantPatch {
            is_active: FieldPatch::SetTo(false),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_idempotency_record_pending() {
        let rec = IdempotencyRecord::pending([0x11; 32], "sig");
        assert_eq!(rec.status, IdempotencyStatus::Pending);
        assert!(rec.record_id.is_none());
        assert!(!rec.status.is_terminal());
    }
}
