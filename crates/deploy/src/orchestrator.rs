//! Deployment orchestrator.
//!
//! Runs the steps of a [`DeploymentPlan`] strictly in order: a step is submitted only after
//! the previous step's receipt has been obtained. On success the run is recorded in
//! `<network>.json` and the front-end module is regenerated. On the first failure the run
//! stops, nothing is rolled back, and the completed steps are recorded in
//! `<network>-partial.json`.

use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    path::PathBuf,
};

use alloy_core::primitives::Address;
use backon::{BackoffBuilder, ConstantBuilder};

use crate::{
    abi::AbiArg,
    chain::{ContractClient, TransactionHandle},
    config::{NetworkConfig, OutputConfig},
    confirm::{ConfirmationReceipt, ConfirmationWaiter, ReceiptSource},
    error::DeployError,
    frontend,
    plan::{DeploymentPlan, DeploymentStep, StepAction, StepArg},
    record::{
        ContractRecord, DeploymentResult, DeploymentStore, PARTIAL_FAILURE_STATUS,
        PartialDeployment, StepRecord, timestamp_now,
    },
};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunState {
    NotStarted,
    /// Step `i` (zero-based) was submitted and is waiting for its receipt.
    Submitted(usize),
    /// Step `i` has a receipt.
    Confirmed(usize),
    AllConfirmed,
    ResultsPersisted,
    PartialPersisted,
}

/// A run that stopped at `step`.
#[derive(Debug, thiserror::Error)]
#[error("Deployment failed at step '{step}': {error}")]
pub struct RunError {
    pub step: String,
    #[source]
    pub error: DeployError,
    /// The partial record written for this failure, if any step had completed.
    pub partial_path: Option<PathBuf>,
}

/// Sequences deployment and configuration steps on one network.
pub struct Orchestrator<C, B = ConstantBuilder> {
    network: NetworkConfig,
    plan: DeploymentPlan,
    chain: C,
    waiter: ConfirmationWaiter<B>,
    store: DeploymentStore,
    frontend_module: Option<PathBuf>,
    state: RunState,
    completed: Vec<StepRecord>,
    addresses: HashMap<String, Address>,
}

impl<C, B> Orchestrator<C, B>
where
    C: ContractClient + ReceiptSource,
    B: BackoffBuilder + Clone,
{
    pub fn new(
        network: NetworkConfig,
        output: &OutputConfig,
        plan: DeploymentPlan,
        chain: C,
        waiter: ConfirmationWaiter<B>,
    ) -> Self {
        Self {
            network,
            plan,
            chain,
            waiter,
            store: DeploymentStore::new(&output.deployments_dir),
            frontend_module: output.frontend_module.clone(),
            state: RunState::NotStarted,
            completed: Vec::new(),
            addresses: HashMap::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Steps confirmed so far in the current (or last) run.
    pub fn completed(&self) -> &[StepRecord] {
        &self.completed
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn store(&self) -> &DeploymentStore {
        &self.store
    }

    /// Run every step and persist the outcome.
    ///
    /// Each call is a fresh run: new transactions are always submitted, even if a previous
    /// run already succeeded. A partial record left by an earlier failure is reported but not
    /// resumed from.
    pub async fn execute(&mut self) -> Result<DeploymentResult, RunError> {
        self.state = RunState::NotStarted;
        self.completed.clear();
        self.addresses.clear();

        self.warn_previous_partial();

        tracing::info!(
            network = %self.network.network_name,
            chain_id = self.network.chain_id,
            deployer = %self.chain.deployer(),
            steps = self.plan.len(),
            "Starting deployment"
        );

        if let Err((step, error)) = self.run_steps().await {
            return Err(self.persist_failure(step, error));
        }
        self.state = RunState::AllConfirmed;

        let result = self.build_result();

        // Persistence failures are not turned into partial records: every step is on-chain.
        let persisted = self.store.save_result(&result).and_then(|_| match &self.frontend_module {
            Some(path) => frontend::write_module(path, &result),
            None => Ok(()),
        });
        if let Err(e) = persisted {
            return Err(RunError {
                step: "persist".to_string(),
                error: DeployError::Other(e),
                partial_path: None,
            });
        }

        self.state = RunState::ResultsPersisted;
        self.log_summary(&result);

        Ok(result)
    }

    fn warn_previous_partial(&self) {
        match self.store.load_partial(&self.network.network_name) {
            Ok(Some(previous)) => tracing::warn!(
                failed_step = %previous.failed_step,
                timestamp = %previous.timestamp,
                completed = previous.completed_steps.len(),
                error = %previous.error,
                "A previous run on this network failed part-way; starting over from the first step"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = ?e, "Could not read previous partial deployment"),
        }
    }

    async fn run_steps(&mut self) -> Result<(), (String, DeployError)> {
        let steps = self.plan.steps().to_vec();

        for (index, step) in steps.iter().enumerate() {
            self.run_step(index, step)
                .await
                .map_err(|e| (step.name.clone(), e.in_step(&step.name)))?;
        }

        Ok(())
    }

    async fn run_step(&mut self, index: usize, step: &DeploymentStep) -> Result<(), DeployError> {
        let args = self.resolve_args(step.args())?;

        let (handle, contract, method) = match &step.action {
            StepAction::Deploy { contract, .. } => {
                tracing::info!(step = %step.name, contract = %contract, "Deploying");
                let handle = self.chain.deploy(contract, &args).await?;
                (handle, contract.clone(), None)
            }
            StepAction::Call { target, method, .. } => {
                let target_address = self.address_of(target)?;
                tracing::info!(
                    step = %step.name,
                    target = %target_address,
                    method = %method,
                    "Calling"
                );
                let handle = self.chain.call(target_address, method, &args).await?;
                let contract = self
                    .plan
                    .step(target)
                    .and_then(DeploymentStep::deployed_contract)
                    .unwrap_or(target)
                    .to_string();
                (handle, contract, Some(method.clone()))
            }
        };

        self.state = RunState::Submitted(index);
        tracing::info!(step = %step.name, tx_hash = %handle.hash, "Transaction submitted");

        let receipt = self.waiter.wait(&self.chain, handle.hash).await?;
        if receipt.reverted() {
            return Err(DeployError::CallReverted {
                step: step.name.clone(),
                tx_hash: Some(handle.hash),
                reason: format!(
                    "transaction failed in block {} (status 0)",
                    receipt.block_number
                ),
            });
        }

        let address = match &step.action {
            StepAction::Deploy { .. } => {
                let address = created_address(&handle, &receipt)?;
                self.set_result_address(&step.name, address)?;
                tracing::info!(step = %step.name, address = %address, "Contract deployed");
                address
            }
            StepAction::Call { target, .. } => {
                tracing::info!(step = %step.name, "Configuration call confirmed");
                self.address_of(target)?
            }
        };

        self.completed.push(StepRecord {
            name: step.name.clone(),
            contract,
            method,
            arguments: args.iter().map(AbiArg::display_value).collect(),
            address,
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        });
        self.state = RunState::Confirmed(index);

        Ok(())
    }

    fn resolve_args(&self, args: &[StepArg]) -> Result<Vec<AbiArg>, DeployError> {
        args.iter()
            .map(|arg| {
                Ok(match arg {
                    StepArg::Ref { step } => AbiArg::Address(self.address_of(step)?),
                    StepArg::Address { address } => AbiArg::Address(*address),
                    StepArg::Uint { uint } => AbiArg::Uint(*uint),
                    StepArg::Bytes { bytes } => AbiArg::Bytes(bytes.clone()),
                    StepArg::Bool(b) => AbiArg::Bool(*b),
                    StepArg::String(s) => AbiArg::String(s.clone()),
                })
            })
            .collect()
    }

    fn address_of(&self, step: &str) -> Result<Address, DeployError> {
        self.addresses.get(step).copied().ok_or_else(|| {
            DeployError::InvalidPlan(format!("step '{step}' has no deployed address yet"))
        })
    }

    /// Record the address a deploy step produced. Each step's address is written once.
    fn set_result_address(&mut self, step: &str, address: Address) -> Result<(), DeployError> {
        match self.addresses.entry(step.to_string()) {
            Entry::Occupied(existing) => Err(DeployError::Other(anyhow::anyhow!(
                "address of step '{step}' already set to {}",
                existing.get()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(address);
                Ok(())
            }
        }
    }

    fn persist_failure(&mut self, step: String, error: DeployError) -> RunError {
        tracing::error!(step = %step, kind = %error.kind(), error = %error, "Deployment error");

        let mut partial_path = None;
        if !self.completed.is_empty() {
            let partial = PartialDeployment {
                network: self.network.network_name.clone(),
                chain_id: self.network.chain_id,
                deployer: self.chain.deployer(),
                timestamp: timestamp_now(),
                status: PARTIAL_FAILURE_STATUS.to_string(),
                completed_steps: self.completed.clone(),
                failed_step: step.clone(),
                error_kind: error.kind().to_string(),
                error: error.to_string(),
            };
            match self.store.save_partial(&partial) {
                Ok(path) => {
                    partial_path = Some(path);
                    self.state = RunState::PartialPersisted;
                }
                Err(e) => tracing::error!(error = ?e, "Failed to save partial deployment"),
            }
        }

        RunError {
            step,
            error,
            partial_path,
        }
    }

    fn build_result(&self) -> DeploymentResult {
        let mut contracts = BTreeMap::new();
        let mut transactions = BTreeMap::new();

        for (record, step) in self.completed.iter().zip(self.plan.iter()) {
            transactions.insert(record.name.clone(), record.transaction_hash);

            if let StepAction::Deploy {
                contract,
                export_as,
                metadata,
                ..
            } = &step.action
            {
                contracts.insert(
                    contract.clone(),
                    ContractRecord {
                        address: record.address,
                        deployment_block: record.block_number,
                        transaction_hash: record.transaction_hash,
                        gas_used: record.gas_used,
                        constructor_arguments: record.arguments.clone(),
                        export_as: export_as.clone(),
                        metadata: metadata.clone(),
                    },
                );
            }
        }

        DeploymentResult {
            network: self.network.network_name.clone(),
            chain_id: self.network.chain_id,
            deployer: self.chain.deployer(),
            timestamp: timestamp_now(),
            contracts,
            transactions,
            steps: self.completed.clone(),
        }
    }

    fn log_summary(&self, result: &DeploymentResult) {
        tracing::info!("Deployment summary");
        for step in result.steps.iter().filter(|s| s.method.is_none()) {
            match self.network.explorer_address_url(&step.address.to_string()) {
                Some(link) => tracing::info!(
                    contract = %step.contract,
                    address = %step.address,
                    explorer = %link,
                    "Deployed"
                ),
                None => tracing::info!(contract = %step.contract, address = %step.address, "Deployed"),
            }
        }
        tracing::info!(network = %result.network, "Deployment completed successfully");
    }
}

/// The address a creation produced: the receipt's `contractAddress` when the node reports
/// one, otherwise the address derived at submission.
fn created_address(
    handle: &TransactionHandle,
    receipt: &ConfirmationReceipt,
) -> Result<Address, DeployError> {
    match (receipt.contract_address, handle.address) {
        (Some(reported), Some(expected)) if reported != expected => {
            tracing::warn!(
                %reported,
                %expected,
                "Receipt contract address differs from the submitted creation address"
            );
            Ok(reported)
        }
        (Some(address), _) | (None, Some(address)) => Ok(address),
        (None, None) => Err(DeployError::Other(anyhow::anyhow!(
            "no contract address for creation transaction {}",
            handle.hash
        ))),
    }
}
