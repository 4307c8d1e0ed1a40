//! Transaction confirmation waiter.
//!
//! Polls a [`ReceiptSource`] for a transaction's inclusion receipt with a bounded number of
//! attempts. The retry decision for a single attempt is the pure function [`decide`]; the
//! delays between attempts come from a [`backon`] backoff, so the shape of the policy can be
//! swapped without touching the driver.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256};
use backon::{BackoffBuilder, ConstantBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    error::DeployError,
    rpc::{RpcError, deserialize_opt_u64_from_hex, deserialize_u64_from_hex},
};

/// Default number of receipt queries before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Default delay between two receipt queries.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);

/// Proof that a transaction was included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationReceipt {
    pub transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    pub block_number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    pub gas_used: u64,
    /// `Some(1)` on success, `Some(0)` when execution failed. Pre-Byzantium nodes omit it.
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_hex")]
    pub status: Option<u64>,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl ConfirmationReceipt {
    /// Whether the receipt reports a failed execution.
    pub fn reverted(&self) -> bool {
        self.status == Some(0)
    }
}

/// Anything that can be asked for a transaction receipt.
///
/// `Ok(None)` means the transaction is not included yet.
pub trait ReceiptSource {
    fn fetch_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<ConfirmationReceipt>, RpcError>> + Send;
}

/// What happened on one receipt query.
#[derive(Debug)]
pub enum AttemptOutcome {
    Confirmed(ConfirmationReceipt),
    Pending,
    Failed(RpcError),
}

impl From<Result<Option<ConfirmationReceipt>, RpcError>> for AttemptOutcome {
    fn from(result: Result<Option<ConfirmationReceipt>, RpcError>) -> Self {
        match result {
            Ok(Some(receipt)) => Self::Confirmed(receipt),
            Ok(None) => Self::Pending,
            Err(e) => Self::Failed(e),
        }
    }
}

impl AttemptOutcome {
    /// Progress line logged when another attempt follows this one.
    pub fn retry_message(&self) -> &'static str {
        match self {
            Self::Confirmed(_) => "Transaction confirmed",
            Self::Pending => "Transaction still pending",
            Self::Failed(_) => "Receipt query failed, retrying",
        }
    }
}

/// What the driver does after an attempt.
#[derive(Debug)]
pub enum NextAction {
    Return(ConfirmationReceipt),
    Wait(Duration),
    Fail(DeployError),
}

/// Decide the next action from an attempt outcome.
///
/// `next_delay` is the delay the backoff would apply before another attempt, or `None` when
/// the attempt just made was the last one. `attempts` is the number of queries made so far.
pub fn decide(
    tx_hash: B256,
    outcome: AttemptOutcome,
    next_delay: Option<Duration>,
    attempts: usize,
) -> NextAction {
    match (outcome, next_delay) {
        (AttemptOutcome::Confirmed(receipt), _) => NextAction::Return(receipt),
        (AttemptOutcome::Pending | AttemptOutcome::Failed(_), Some(delay)) => {
            NextAction::Wait(delay)
        }
        (AttemptOutcome::Pending, None) => {
            NextAction::Fail(DeployError::ConfirmationTimeout { tx_hash, attempts })
        }
        (AttemptOutcome::Failed(e), None) => NextAction::Fail(DeployError::TransientNetwork(e)),
    }
}

/// Waits for transactions to be included, retrying on absence or transient errors.
#[derive(Debug, Clone)]
pub struct ConfirmationWaiter<B = ConstantBuilder> {
    backoff: B,
}

impl ConfirmationWaiter<ConstantBuilder> {
    /// A fixed-delay waiter making at most `max_attempts` queries (at least one).
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            backoff: ConstantBuilder::default()
                .with_delay(delay)
                .with_max_times(max_attempts.saturating_sub(1)),
        }
    }
}

impl Default for ConfirmationWaiter<ConstantBuilder> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_DELAY)
    }
}

impl<B> ConfirmationWaiter<B>
where
    B: BackoffBuilder + Clone,
{
    /// Use a custom backoff. The waiter makes one more query than the backoff yields delays.
    pub fn with_backoff(backoff: B) -> Self {
        Self { backoff }
    }

    /// Block until `tx_hash` has a receipt, or fail once the backoff is exhausted.
    pub async fn wait<S: ReceiptSource>(
        &self,
        source: &S,
        tx_hash: B256,
    ) -> Result<ConfirmationReceipt, DeployError> {
        let mut delays = self.backoff.clone().build();
        let mut attempts = 0;

        loop {
            attempts += 1;
            tracing::info!(attempt = attempts, %tx_hash, "Waiting for transaction receipt");

            let outcome = AttemptOutcome::from(source.fetch_receipt(tx_hash).await);

            if let AttemptOutcome::Failed(e) = &outcome {
                tracing::warn!(attempt = attempts, %tx_hash, error = %e, "Receipt query failed");
            }
            let retry_message = outcome.retry_message();

            match decide(tx_hash, outcome, delays.next(), attempts) {
                NextAction::Return(receipt) => {
                    tracing::info!(
                        attempt = attempts,
                        %tx_hash,
                        block = receipt.block_number,
                        "Transaction confirmed"
                    );
                    return Ok(receipt);
                }
                NextAction::Wait(delay) => {
                    tracing::info!(
                        attempt = attempts,
                        %tx_hash,
                        retry_in = ?delay,
                        "{retry_message}"
                    );
                    tokio::time::sleep(delay).await;
                }
                NextAction::Fail(e) => {
                    tracing::error!(attempts, %tx_hash, error = %e, "Giving up on transaction");
                    return Err(e);
                }
            }
        }
    }
}
