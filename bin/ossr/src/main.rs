//! ossr deploys the OSS rewards contracts and keeps track of where they live.

mod cli;
mod config;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, DeployArgs, PlanArg, StatusArgs};
use config::FileConfig;
use ossr_deploy::{
    ArtifactStore, BuiltinPlan, DeploymentPlan, DeploymentStore, Orchestrator, RpcChain, RpcClient,
    StatusReport, status,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let file_config = FileConfig::load(&cli.config)?;

    match cli.command {
        Command::Deploy(args) => deploy(&file_config, &cli.network, args).await,
        Command::Status(args) => show_status(&file_config, &cli.network, args).await,
    }
}

async fn deploy(file_config: &FileConfig, network_name: &str, args: DeployArgs) -> Result<()> {
    let network = file_config.network(network_name, &args.network, args.private_key.clone())?;
    let output = file_config.output(&args.network, Some(&args));
    let confirmation = file_config.confirmation(&args)?;

    if network.deployer_key.is_empty() {
        anyhow::bail!("No deployer key: set PRIVATE_KEY or pass --private-key");
    }

    let plan = match &args.plan {
        PlanArg::Rewards => DeploymentPlan::builtin(BuiltinPlan::Rewards),
        PlanArg::Governance => DeploymentPlan::builtin(BuiltinPlan::Governance),
        PlanArg::File(path) => DeploymentPlan::load_from_file(Path::new(path))?,
    };

    tracing::info!(
        network = %network.network_name,
        rpc_url = %network.rpc_url,
        chain_id = network.chain_id,
        plan = %args.plan,
        max_attempts = confirmation.max_attempts,
        delay_ms = confirmation.delay_ms,
        "Loading deployment..."
    );

    let rpc = RpcClient::new(network.rpc_url.clone())?;
    let chain = RpcChain::new(
        rpc,
        &network.deployer_key,
        network.chain_id,
        ArtifactStore::new(&output.artifacts_dir),
    )?;
    chain.preflight().await?;

    let mut orchestrator =
        Orchestrator::new(network, &output, plan, chain, confirmation.waiter());

    match orchestrator.execute().await {
        Ok(_) => Ok(()),
        Err(e) => {
            if let Some(path) = &e.partial_path {
                tracing::error!(path = %path.display(), "Partial deployment info saved");
            }
            Err(e.into())
        }
    }
}

async fn show_status(file_config: &FileConfig, network_name: &str, args: StatusArgs) -> Result<()> {
    let network = file_config.network(network_name, &args.network, None)?;
    let output = file_config.output(&args.network, None);

    let rpc = RpcClient::new(network.rpc_url.clone())?;
    let store = DeploymentStore::new(&output.deployments_dir);

    let report = status::inspect(&store, network_name, &rpc)
        .await
        .context("Failed to inspect deployment")?;

    println!("{}", render_report(&report));

    if !report.healthy() {
        anyhow::bail!("Some recorded contracts have no code on {network_name}");
    }
    Ok(())
}

fn render_report(report: &StatusReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Contract", "Address", "Block", "Code", "Name", "Symbol", "Decimals", "Total supply",
    ]);

    for contract in &report.contracts {
        let token = contract.token.clone().unwrap_or_default();
        let code = if contract.has_code { "yes" } else { "MISSING" };
        table.add_row(vec![
            contract.contract.clone(),
            contract.address.to_string(),
            contract.deployment_block.to_string(),
            code.to_string(),
            token.name.unwrap_or_default(),
            token.symbol.unwrap_or_default(),
            token.decimals.map(|d| d.to_string()).unwrap_or_default(),
            token.total_supply.map(|s| s.to_string()).unwrap_or_default(),
        ]);
    }

    format!(
        "Network: {} (chain {})\nDeployer: {}\nDeployed at: {}\n{table}",
        report.network, report.chain_id, report.deployer, report.timestamp
    )
}
