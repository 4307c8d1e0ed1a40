use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use url::Url;

/// The network used when none is given.
pub const DEFAULT_NETWORK: &str = "shardeum";

/// Which plan to run: a built-in plan name, or the path of a plan file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum PlanArg {
    Rewards,
    Governance,
    #[strum(default)]
    File(String),
}

#[derive(Parser)]
#[command(name = "ossr")]
#[command(
    author,
    version,
    about = "Deploy and inspect the OSS rewards contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "OSSR_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file. Missing files are ignored.
    #[arg(long, global = true, alias = "conf", env = "OSSR_CONFIG", default_value = "Ossr.toml")]
    pub config: PathBuf,

    /// The network to target, as named in the configuration file.
    #[arg(short, long, global = true, env = "OSSR_NETWORK", default_value = DEFAULT_NETWORK)]
    pub network: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy the contracts and write the deployment records.
    Deploy(DeployArgs),
    /// Check a recorded deployment against the chain.
    Status(StatusArgs),
}

/// Overrides applied on top of the configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct NetworkOverrides {
    /// The URL of the network's JSON-RPC endpoint.
    #[arg(long, alias = "rpc")]
    pub rpc_url: Option<Url>,

    /// The expected chain id of the endpoint.
    #[arg(long)]
    pub chain_id: Option<u64>,

    /// Directory holding the deployment records.
    #[arg(long, env = "OSSR_DEPLOYMENTS_DIR")]
    pub deployments_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// The plan to run: `rewards`, `governance`, or the path to a TOML plan file.
    #[arg(long, env = "OSSR_PLAN", default_value_t = PlanArg::Rewards)]
    pub plan: PlanArg,

    /// Hex-encoded private key of the deployer account.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    #[clap(flatten)]
    pub network: NetworkOverrides,

    /// Receipt queries per transaction before giving up.
    #[arg(long)]
    pub max_attempts: Option<usize>,

    /// Delay between two receipt queries, in milliseconds.
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Where to write the generated front-end module.
    #[arg(long, alias = "frontend")]
    pub frontend_out: Option<PathBuf>,

    /// Skip generating the front-end module.
    #[arg(long, conflicts_with = "frontend_out")]
    pub no_frontend: bool,

    /// The Hardhat artifacts directory.
    #[arg(long, env = "OSSR_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    #[clap(flatten)]
    pub network: NetworkOverrides,
}
