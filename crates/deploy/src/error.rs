//! Error types for deployment runs.

use alloy_core::primitives::B256;

use crate::rpc::RpcError;

/// Coarse classification of a [`DeployError`].
///
/// Recorded in partial deployment files so callers can branch on the failure
/// category without parsing the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DeployErrorKind {
    TransientNetwork,
    ConfirmationTimeout,
    CallReverted,
    InvalidPlan,
    Artifact,
    Other,
}

/// Errors surfaced by the confirmation waiter, the contract client and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A network request failed. Retried by the confirmation waiter until the final attempt.
    #[error("network error: {0}")]
    TransientNetwork(#[source] RpcError),

    /// Every confirmation attempt came back without a receipt.
    #[error("Transaction {tx_hash} not confirmed after {attempts} attempts")]
    ConfirmationTimeout { tx_hash: B256, attempts: usize },

    /// The node rejected the transaction, or it was mined with a failed status.
    #[error("{step} reverted: {reason}")]
    CallReverted {
        step: String,
        tx_hash: Option<B256>,
        reason: String,
    },

    #[error("invalid deployment plan: {0}")]
    InvalidPlan(String),

    #[error("artifact error for {contract}: {reason}")]
    Artifact { contract: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            Self::TransientNetwork(_) => DeployErrorKind::TransientNetwork,
            Self::ConfirmationTimeout { .. } => DeployErrorKind::ConfirmationTimeout,
            Self::CallReverted { .. } => DeployErrorKind::CallReverted,
            Self::InvalidPlan(_) => DeployErrorKind::InvalidPlan,
            Self::Artifact { .. } => DeployErrorKind::Artifact,
            Self::Other(_) => DeployErrorKind::Other,
        }
    }

    /// Classify an RPC failure raised while submitting a transaction for `step`.
    ///
    /// A response from the node means it refused the transaction; anything else is a
    /// network problem.
    pub fn from_submission(step: &str, err: RpcError) -> Self {
        match err {
            RpcError::Response { message, .. } => Self::CallReverted {
                step: step.to_string(),
                tx_hash: None,
                reason: message,
            },
            other => Self::TransientNetwork(other),
        }
    }

    /// Attribute a revert to the plan step it happened in.
    pub fn in_step(self, step: &str) -> Self {
        match self {
            Self::CallReverted { tx_hash, reason, .. } => Self::CallReverted {
                step: step.to_string(),
                tx_hash,
                reason,
            },
            other => other,
        }
    }
}
