//! Confirmation Monitor
//!
//! Polls the ledger for the settlement status of a submitted event until it
//! is confirmed at the required commitment, rejected, or a timeout elapses.
//!
//! The monitor is a read-only oracle: it never applies side effects. Waits
//! are cancellable by dropping the future; the timeout bounds every wait.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{CommitmentLevel, SettlementConfig};
use crate::error::{SettlementError, SettlementResult};
use crate::ledger::{LedgerRpc, SignatureStatus};
use crate::types::OnChainConfirmation;

/// Confirmation monitor over a ledger connection
pub struct ConfirmationMonitor<L: LedgerRpc> {
    /// Ledger RPC connection
    ledger: Arc<L>,
    /// Poll interval between status checks
    poll_interval: Duration,
    /// Required commitment before an event counts as settled
    commitment: CommitmentLevel,
}

fn meets_commitment(status: &SignatureStatus, commitment: CommitmentLevel) -> bool {
    match commitment {
        CommitmentLevel::Confirmed => matches!(
            status,
            SignatureStatus::Confirmed | SignatureStatus::Finalized
        ),
        CommitmentLevel::Finalized => matches!(status, SignatureStatus::Finalized),
    }
}

impl<L: LedgerRpc> ConfirmationMonitor<L> {
    /// Create a new confirmation monitor
    pub fn new(ledger: Arc<L>, config: &SettlementConfig) -> Self {
        Self {
            ledger,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            commitment: config.ledger.commitment,
        }
    }

    /// Current settlement status, without waiting
    pub async fn check_signature(&self, signature: &str) -> SettlementResult<SignatureStatus> {
        let status = self.ledger.get_signature_status(signature).await?;
        debug!("Signature {} status: {:?}", signature, status);
        Ok(status)
    }

    /// Wait for a signature to settle at the required commitment.
    ///
    /// Returns `NotConfirmed` once `timeout` has elapsed without settlement;
    /// a ledger-reported execution error fails immediately with
    /// `LedgerRejected`. Transient RPC failures are retried on the next
    /// poll.
    pub async fn wait_for_confirmation(
        &self,
        signature: &str,
        timeout: Duration,
    ) -> SettlementResult<OnChainConfirmation> {
        let start = std::time::Instant::now();

        loop {
            if start.elapsed() >= timeout {
                warn!(
                    "Signature {} not confirmed after {:?}",
                    signature, timeout
                );
                return Err(SettlementError::NotConfirmed {
                    signature: signature.to_string(),
                    waited_secs: start.elapsed().as_secs(),
                });
            }

            match self.ledger.get_signature_status(signature).await {
                Ok(SignatureStatus::Errored { reason }) => {
                    return Err(SettlementError::LedgerRejected {
                        signature: signature.to_string(),
                        reason,
                    });
                }
                Ok(status) if meets_commitment(&status, self.commitment) => {
                    let detail = self.ledger.get_transaction(signature).await?;
                    if let Some(block_time) = detail.block_time {
                        info!(
                            "Signature {} settled at slot {} ({})",
                            signature,
                            detail.slot,
                            chrono::DateTime::<chrono::Utc>::from_timestamp(block_time, 0)
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_else(|| block_time.to_string())
                        );
                    } else {
                        info!("Signature {} settled at slot {}", signature, detail.slot);
                    }
                    return Ok(OnChainConfirmation {
                        signature: signature.to_string(),
                        slot: detail.slot,
                        block_time: detail.block_time,
                        confirmed: true,
                    });
                }
                Ok(status) => {
                    debug!(
                        "Signature {} still {:?}, waiting for {:?}",
                        signature, status, self.commitment
                    );
                }
                Err(e) if e.is_retryable() => {
                    warn!("Status check for {} failed: {}", signature, e);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
