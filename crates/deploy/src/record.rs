//! Deployment records and their durable storage.
//!
//! A successful run writes `<dir>/<network>.json`; a failed run that completed at least one
//! step writes `<dir>/<network>-partial.json`.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DeployErrorKind;

/// Status value written into partial records.
pub const PARTIAL_FAILURE_STATUS: &str = "PARTIAL_FAILURE";

/// Field names of a [`ContractRecord`]. Metadata entries are flattened next to them and may
/// not reuse these names.
pub const RESERVED_RECORD_KEYS: &[&str] = &[
    "address",
    "deploymentBlock",
    "transactionHash",
    "gasUsed",
    "constructorArguments",
    "exportAs",
];

/// The confirmed outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    /// The contract deployed, or the contract called.
    pub contract: String,
    /// The method signature, for call steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Resolved arguments as recorded strings (addresses checksummed).
    pub arguments: Vec<String>,
    /// The deployed address (deploy steps) or the called address (call steps).
    pub address: Address,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Per-contract entry of a [`DeploymentResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub address: Address,
    pub deployment_block: u64,
    pub transaction_hash: B256,
    pub gas_used: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constructor_arguments: Vec<String>,
    /// Key used in the generated front-end module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_as: Option<String>,
    #[serde(default, flatten)]
    pub metadata: BTreeMap<String, String>,
}

/// The record of a fully successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub network: String,
    pub chain_id: u64,
    pub deployer: Address,
    pub timestamp: String,
    /// Deployed contracts keyed by contract name.
    pub contracts: BTreeMap<String, ContractRecord>,
    /// Transaction hash of every step, keyed by step name.
    pub transactions: BTreeMap<String, B256>,
    /// Every step in declaration order.
    pub steps: Vec<StepRecord>,
}

/// The best-effort record of a run that stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialDeployment {
    pub network: String,
    pub chain_id: u64,
    pub deployer: Address,
    pub timestamp: String,
    pub status: String,
    pub completed_steps: Vec<StepRecord>,
    pub failed_step: String,
    pub error_kind: String,
    pub error: String,
}

impl PartialDeployment {
    pub fn error_kind(&self) -> Option<DeployErrorKind> {
        self.error_kind.parse().ok()
    }
}

/// Current time as an ISO-8601 UTC timestamp with millisecond precision.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Reads and writes deployment records in one directory.
#[derive(Debug, Clone)]
pub struct DeploymentStore {
    dir: PathBuf,
}

impl DeploymentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn result_path(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{network}.json"))
    }

    pub fn partial_path(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{network}-partial.json"))
    }

    pub fn save_result(&self, result: &DeploymentResult) -> Result<PathBuf> {
        let path = self.result_path(&result.network);
        self.write_json(&path, result)?;
        tracing::info!(path = %path.display(), "Deployment info saved");
        Ok(path)
    }

    pub fn save_partial(&self, partial: &PartialDeployment) -> Result<PathBuf> {
        let path = self.partial_path(&partial.network);
        self.write_json(&path, partial)?;
        tracing::info!(path = %path.display(), "Partial deployment saved");
        Ok(path)
    }

    pub fn load_result(&self, network: &str) -> Result<DeploymentResult> {
        self.read_json(&self.result_path(network))
    }

    /// The partial record left by a previous failed run, if any.
    pub fn load_partial(&self, network: &str) -> Result<Option<PartialDeployment>> {
        let path = self.partial_path(network);
        if !path.exists() {
            return Ok(None);
        }
        self.read_json(&path).map(Some)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(value).context("Failed to serialize record")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}
