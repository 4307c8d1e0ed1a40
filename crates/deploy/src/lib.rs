//! ossr-deploy - Deployment library for the OSS rewards contracts.
//!
//! This crate deploys and wires the token, rewards and governance contracts on an EVM
//! network, waiting for every transaction to be confirmed before moving to the next step and
//! recording what happened.

pub mod abi;

mod artifacts;
pub use artifacts::ArtifactStore;

mod chain;
pub use chain::{ContractClient, RpcChain, TransactionHandle};

mod config;
pub use config::{ConfirmationConfig, NetworkConfig, OutputConfig};

pub mod confirm;
pub use confirm::{ConfirmationReceipt, ConfirmationWaiter, ReceiptSource};

mod error;
pub use error::{DeployError, DeployErrorKind};

pub mod frontend;

mod orchestrator;
pub use orchestrator::{Orchestrator, RunError, RunState};

mod plan;
pub use plan::{BuiltinPlan, DeploymentPlan, DeploymentStep, StepAction, StepArg};

mod record;
pub use record::{
    ContractRecord, DeploymentResult, DeploymentStore, PARTIAL_FAILURE_STATUS, PartialDeployment,
    StepRecord,
};

pub mod rpc;
pub use rpc::{RpcClient, RpcError};

pub mod status;
pub use status::{ContractReader, ContractStatus, StatusReport, TokenInfo};
