//! Deterministic record-address derivation
//!
//! Mirrors the ledger program's derived-account scheme so client and server
//! compute identical record identities from the same seeds. Used two ways:
//! clients predict the identity a submission will create, so duplicate
//! nonces collide at the ledger layer; the recorder derives the identity a
//! settled event must have before trusting its payload.
//!
//! Derivation must stay bit-exact across both sides.

use sha2::{Digest, Sha256};

use crate::types::{AccountId, Nonce, RecordId, RecordKind};

/// Seed prefixes matching the ledger program.
pub mod seeds {
    pub const MERCHANT: &[u8] = b"merchant";
    pub const PURCHASE: &[u8] = b"transaction";
    pub const TRANSFER: &[u8] = b"transfer";
    pub const REDEMPTION: &[u8] = b"redemption";
}

/// Derives record identities for one ledger program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: [u8; 32],
}

impl AddressDeriver {
    /// Create a deriver bound to a ledger program id
    pub fn new(program_id: [u8; 32]) -> Self {
        Self { program_id }
    }

    /// The bound program id
    pub fn program_id(&self) -> &[u8; 32] {
        &self.program_id
    }

    /// Hash seeds together with the program id into a derived identity
    fn derive(&self, parts: &[&[u8]]) -> RecordId {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.update(self.program_id);
        hasher.update(b"ProgramDerivedAddress");
        let result = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&result);
        out
    }

    /// Merchant identity, derived from the owning wallet
    pub fn merchant_address(&self, wallet: &AccountId) -> RecordId {
        self.derive(&[seeds::MERCHANT, wallet])
    }

    /// Purchase record identity for (customer, nonce)
    pub fn purchase_address(&self, customer: &AccountId, nonce: &Nonce) -> RecordId {
        self.derive(&[seeds::PURCHASE, customer, nonce])
    }

    /// Transfer record identity for (sender, nonce)
    pub fn transfer_address(&self, sender: &AccountId, nonce: &Nonce) -> RecordId {
        self.derive(&[seeds::TRANSFER, sender, nonce])
    }

    /// Redemption record identity for (customer, merchant, nonce)
    pub fn redemption_address(
        &self,
        customer: &AccountId,
        merchant_id: &RecordId,
        nonce: &Nonce,
    ) -> RecordId {
        self.derive(&[seeds::REDEMPTION, customer, merchant_id, nonce])
    }

    /// Event record identity by kind.
    ///
    /// Redemptions additionally bind the merchant; use
    /// [`redemption_address`](Self::redemption_address) for those.
    pub fn record_address(&self, kind: RecordKind, actor: &AccountId, nonce: &Nonce) -> RecordId {
        match kind {
            RecordKind::Purchase => self.purchase_address(actor, nonce),
            RecordKind::Transfer => self.transfer_address(actor, nonce),
            RecordKind::Redemption => self.derive(&[seeds::REDEMPTION, actor, nonce]),
        }
    }
}
