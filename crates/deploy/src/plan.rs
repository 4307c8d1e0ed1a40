//! Deployment plans: the ordered steps of one run.
//!
//! A plan is a list of [`DeploymentStep`]s. Each step either deploys a contract or calls a
//! method on a contract deployed by an earlier step. Arguments may reference the address
//! produced by an earlier deploy step, which is how the rewards contract learns the token
//! address.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use alloy_core::primitives::{Address, U256};
use anyhow::Context;
use derive_more::Deref;
use serde::{Deserialize, Serialize};

use crate::{error::DeployError, frontend::export_key, record::RESERVED_RECORD_KEYS};

/// One constructor or call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepArg {
    /// The address produced by the named earlier deploy step.
    Ref {
        #[serde(rename = "ref")]
        step: String,
    },
    Address {
        address: Address,
    },
    Uint {
        uint: U256,
    },
    Bytes {
        bytes: alloy_core::primitives::Bytes,
    },
    Bool(bool),
    String(String),
}

impl StepArg {
    pub fn reference(step: impl Into<String>) -> Self {
        Self::Ref { step: step.into() }
    }

    /// The step this argument depends on, if any.
    pub fn referenced_step(&self) -> Option<&str> {
        match self {
            Self::Ref { step } => Some(step),
            _ => None,
        }
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Deploy `contract` with the given constructor arguments.
    Deploy {
        contract: String,
        #[serde(default)]
        args: Vec<StepArg>,
        /// Key under which the address is exported to the front-end module.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        export_as: Option<String>,
        /// Free-form values copied into the deployment record (token name, symbol...).
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        metadata: BTreeMap<String, String>,
    },
    /// Call `method` (a full signature such as `addMinter(address)`) on the contract
    /// deployed by step `target`.
    Call {
        target: String,
        method: String,
        #[serde(default)]
        args: Vec<StepArg>,
    },
}

/// One unit of orchestrated work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub name: String,
    #[serde(flatten)]
    pub action: StepAction,
}

impl DeploymentStep {
    pub fn deploy(name: impl Into<String>, contract: impl Into<String>, args: Vec<StepArg>) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Deploy {
                contract: contract.into(),
                args,
                export_as: None,
                metadata: BTreeMap::new(),
            },
        }
    }

    pub fn call(
        name: impl Into<String>,
        target: impl Into<String>,
        method: impl Into<String>,
        args: Vec<StepArg>,
    ) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Call {
                target: target.into(),
                method: method.into(),
                args,
            },
        }
    }

    /// Set the front-end export key. No-op on call steps.
    pub fn export_as(mut self, key: impl Into<String>) -> Self {
        if let StepAction::Deploy { export_as, .. } = &mut self.action {
            *export_as = Some(key.into());
        }
        self
    }

    /// Attach a metadata entry. No-op on call steps.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let StepAction::Deploy { metadata, .. } = &mut self.action {
            metadata.insert(key.into(), value.into());
        }
        self
    }

    pub fn args(&self) -> &[StepArg] {
        match &self.action {
            StepAction::Deploy { args, .. } | StepAction::Call { args, .. } => args,
        }
    }

    /// The contract this step deploys, or `None` for call steps.
    pub fn deployed_contract(&self) -> Option<&str> {
        match &self.action {
            StepAction::Deploy { contract, .. } => Some(contract),
            StepAction::Call { .. } => None,
        }
    }
}

/// The built-in plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum BuiltinPlan {
    /// Token + rewards, rewards granted the minter role.
    Rewards,
    /// Token + rewards v2 + DAO, token ownership handed to the DAO.
    Governance,
}

/// An ordered, validated list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Deref)]
pub struct DeploymentPlan {
    steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    /// Build a plan, checking names and references.
    pub fn new(steps: Vec<DeploymentStep>) -> Result<Self, DeployError> {
        let plan = Self { steps };
        plan.validate()?;
        Ok(plan)
    }

    pub fn builtin(plan: BuiltinPlan) -> Self {
        let steps = match plan {
            BuiltinPlan::Rewards => vec![
                Self::token_step(),
                DeploymentStep::deploy("rewards", "OSSRewards", vec![StepArg::reference("token")])
                    .export_as("REWARDS"),
                DeploymentStep::call(
                    "addMinter",
                    "token",
                    "addMinter(address)",
                    vec![StepArg::reference("rewards")],
                ),
            ],
            BuiltinPlan::Governance => vec![
                Self::token_step(),
                DeploymentStep::deploy(
                    "rewardsV2",
                    "OSSRewardsV2",
                    vec![StepArg::reference("token")],
                )
                .export_as("REWARDS_V2"),
                DeploymentStep::deploy("dao", "OSSDAO", vec![StepArg::reference("token")])
                    .export_as("DAO"),
                DeploymentStep::call(
                    "addMinter",
                    "token",
                    "addMinter(address)",
                    vec![StepArg::reference("rewardsV2")],
                ),
                DeploymentStep::call(
                    "transferOwnership",
                    "token",
                    "transferOwnership(address)",
                    vec![StepArg::reference("dao")],
                ),
            ],
        };

        Self { steps }
    }

    fn token_step() -> DeploymentStep {
        DeploymentStep::deploy("token", "OSSToken", vec![])
            .export_as("TOKEN")
            .with_metadata("name", "Open Source Rewards")
            .with_metadata("symbol", "OSS")
    }

    /// Load a plan from a TOML file with `[[steps]]` tables.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan from {}", path.display()))?;
        let plan: Self = toml::from_str(&content).context("Failed to parse plan file as TOML")?;
        plan.validate()?;
        tracing::info!(path = %path.display(), steps = plan.steps.len(), "Deployment plan loaded");
        Ok(plan)
    }

    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Check that the plan can run: at least one step, unique step names, each contract
    /// deployed at most once, unique front-end export keys, no metadata key shadowing a record
    /// field, and every call target or argument reference names a deploy step declared earlier.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.steps.is_empty() {
            return Err(DeployError::InvalidPlan("plan has no steps".to_string()));
        }

        let mut seen = HashSet::new();
        let mut deployed = HashSet::new();
        let mut contracts = HashSet::new();
        let mut exports = HashSet::new();

        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(DeployError::InvalidPlan(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }

            for dependency in step.args().iter().filter_map(StepArg::referenced_step) {
                if !deployed.contains(dependency) {
                    return Err(DeployError::InvalidPlan(format!(
                        "step '{}' references '{}', which is not an earlier deploy step",
                        step.name, dependency
                    )));
                }
            }

            match &step.action {
                StepAction::Deploy {
                    contract,
                    export_as,
                    metadata,
                    ..
                } => {
                    if !contracts.insert(contract.as_str()) {
                        return Err(DeployError::InvalidPlan(format!(
                            "contract '{}' is deployed more than once",
                            contract
                        )));
                    }

                    let key = export_as.clone().unwrap_or_else(|| export_key(contract));
                    if !is_js_identifier(&key) {
                        return Err(DeployError::InvalidPlan(format!(
                            "step '{}' export key '{}' is not a valid identifier",
                            step.name, key
                        )));
                    }
                    if !exports.insert(key.clone()) {
                        return Err(DeployError::InvalidPlan(format!(
                            "step '{}' export key '{}' is already used by an earlier step",
                            step.name, key
                        )));
                    }

                    if let Some(reserved) = metadata
                        .keys()
                        .find(|k| RESERVED_RECORD_KEYS.contains(&k.as_str()))
                    {
                        return Err(DeployError::InvalidPlan(format!(
                            "step '{}' metadata key '{}' is reserved for the deployment record",
                            step.name, reserved
                        )));
                    }

                    deployed.insert(step.name.as_str());
                }
                StepAction::Call { target, method, .. } => {
                    if !deployed.contains(target.as_str()) {
                        return Err(DeployError::InvalidPlan(format!(
                            "step '{}' calls '{}', which is not an earlier deploy step",
                            step.name, target
                        )));
                    }
                    if !method.contains('(') || !method.ends_with(')') {
                        return Err(DeployError::InvalidPlan(format!(
                            "step '{}' method '{}' is not a full signature like 'name(type,...)'",
                            step.name, method
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Whether `key` can be used as a property name without quoting.
fn is_js_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
