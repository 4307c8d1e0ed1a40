//! `Ossr.toml` loading.
//!
//! Values are layered: built-in defaults, then the configuration file, then `OSSR_`-prefixed
//! environment variables (`OSSR_CONFIRMATION__DELAY_MS=5000`), then command-line flags.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use ossr_deploy::{ConfirmationConfig, NetworkConfig, OutputConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::{DeployArgs, NetworkOverrides};

/// Environment variable holding the Shardeum RPC URL when none is configured.
const SHARDEUM_RPC_ENV: &str = "SHARDEUM_RPC";

/// A `[networks.<name>]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    #[serde(default)]
    pub rpc_url: Option<Url>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub explorer_url: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkEntry>,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        let networks = BTreeMap::from([
            (
                "localhost".to_string(),
                NetworkEntry {
                    rpc_url: Url::parse("http://127.0.0.1:8545").ok(),
                    chain_id: Some(31337),
                    explorer_url: None,
                },
            ),
            (
                "shardeum".to_string(),
                NetworkEntry {
                    rpc_url: None,
                    chain_id: Some(8119),
                    explorer_url: Url::parse("https://explorer-mezame.shardeum.org").ok(),
                },
            ),
        ]);

        Self {
            networks,
            confirmation: ConfirmationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl FileConfig {
    /// Load the layered configuration. A missing file only contributes nothing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
        }

        Figment::from(Serialized::defaults(FileConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("OSSR_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    /// Resolve the network to run against, applying command-line overrides.
    pub fn network(
        &self,
        name: &str,
        overrides: &NetworkOverrides,
        deployer_key: Option<String>,
    ) -> Result<NetworkConfig> {
        let entry = self.networks.get(name).cloned().unwrap_or_default();

        let rpc_url = match overrides.rpc_url.clone().or(entry.rpc_url) {
            Some(url) => url,
            None if name == "shardeum" => std::env::var(SHARDEUM_RPC_ENV)
                .with_context(|| format!("No RPC URL for shardeum: set {SHARDEUM_RPC_ENV} or --rpc-url"))?
                .parse()
                .with_context(|| format!("Invalid {SHARDEUM_RPC_ENV}"))?,
            None => anyhow::bail!("No RPC URL configured for network '{name}'"),
        };

        let chain_id = overrides
            .chain_id
            .or(entry.chain_id)
            .with_context(|| format!("No chain id configured for network '{name}'"))?;

        Ok(NetworkConfig {
            network_name: name.to_string(),
            rpc_url,
            chain_id,
            deployer_key: deployer_key.unwrap_or_default(),
            explorer_url: entry.explorer_url,
        })
    }

    /// Output settings with command-line overrides applied.
    pub fn output(&self, overrides: &NetworkOverrides, deploy: Option<&DeployArgs>) -> OutputConfig {
        let mut output = self.output.clone();
        if let Some(dir) = &overrides.deployments_dir {
            output.deployments_dir = dir.clone();
        }
        if let Some(deploy) = deploy {
            if let Some(artifacts) = &deploy.artifacts {
                output.artifacts_dir = artifacts.clone();
            }
            if deploy.no_frontend {
                output.frontend_module = None;
            } else if let Some(path) = &deploy.frontend_out {
                output.frontend_module = Some(path.clone());
            }
        }
        output
    }

    /// Confirmation settings with command-line overrides applied.
    pub fn confirmation(&self, deploy: &DeployArgs) -> Result<ConfirmationConfig> {
        let mut confirmation = self.confirmation;
        if let Some(max_attempts) = deploy.max_attempts {
            confirmation.max_attempts = max_attempts;
        }
        if let Some(delay_ms) = deploy.delay_ms {
            confirmation.delay_ms = delay_ms;
        }
        confirmation.validate()?;
        Ok(confirmation)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = FileConfig::load(Path::new("does-not-exist/Ossr.toml")).unwrap();
        assert_eq!(config.confirmation, ConfirmationConfig::default());
        assert_eq!(config.networks["shardeum"].chain_id, Some(8119));

        let local = config
            .network("localhost", &NetworkOverrides::default(), None)
            .unwrap();
        assert_eq!(local.chain_id, 31337);
        assert_eq!(local.rpc_url.as_str(), "http://127.0.0.1:8545/");
    }

    #[test]
    fn test_file_values_and_overrides() {
        let tmp = TempDir::new("ossr-config").unwrap();
        let path = tmp.path().join("Ossr.toml");
        std::fs::write(
            &path,
            r#"
[networks.holesky]
rpc_url = "https://ethereum-holesky.publicnode.com"
chain_id = 17000
explorer_url = "https://holesky.etherscan.io"

[confirmation]
max_attempts = 4
delay_ms = 2500

[output]
deployments_dir = "records"
artifacts_dir = "out"
"#,
        )
        .unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.confirmation.max_attempts, 4);
        assert_eq!(config.output.deployments_dir, PathBuf::from("records"));
        // Keys absent from the file keep their defaults.
        assert_eq!(
            config.output.frontend_module,
            Some(PathBuf::from("src/utils/contracts.js"))
        );

        let overrides = NetworkOverrides {
            chain_id: Some(1),
            ..Default::default()
        };
        let network = config
            .network("holesky", &overrides, Some("0x01".to_string()))
            .unwrap();
        assert_eq!(network.chain_id, 1);
        assert_eq!(network.deployer_key, "0x01");
        assert_eq!(
            network.explorer_address_url("0xabc").as_deref(),
            Some("https://holesky.etherscan.io/address/0xabc")
        );
    }

    #[test]
    fn test_unknown_network_needs_rpc_url() {
        let config = FileConfig::default();
        assert!(config
            .network("nowhere", &NetworkOverrides::default(), None)
            .is_err());
    }
}
