//! Run configuration passed explicitly into the orchestrator.

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::confirm::{ConfirmationWaiter, DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS};

/// The network a run targets and the key it deploys with.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Name used for record files (`deployments/<name>.json`).
    pub network_name: String,
    pub rpc_url: Url,
    pub chain_id: u64,
    /// Hex-encoded private key of the deployer account.
    #[serde(skip_serializing, default)]
    pub deployer_key: String,
    /// Block explorer base URL, used for address links in the summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<Url>,
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("network_name", &self.network_name)
            .field("rpc_url", &self.rpc_url.as_str())
            .field("chain_id", &self.chain_id)
            .field("deployer_key", &"<redacted>")
            .field("explorer_url", &self.explorer_url.as_ref().map(Url::as_str))
            .finish()
    }
}

impl NetworkConfig {
    /// Explorer link for an address, if an explorer is configured.
    pub fn explorer_address_url(&self, address: &str) -> Option<String> {
        self.explorer_url.as_ref().map(|base| {
            format!("{}/address/{}", base.as_str().trim_end_matches('/'), address)
        })
    }
}

/// Retry policy for receipt polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Receipt queries before giving up. Must be at least 1.
    pub max_attempts: usize,
    /// Delay between two queries, in milliseconds.
    pub delay_ms: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_DELAY.as_millis() as u64,
        }
    }
}

impl ConfirmationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("confirmation.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn waiter(&self) -> ConfirmationWaiter {
        ConfirmationWaiter::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Where run artifacts go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory holding `<network>.json` and `<network>-partial.json`.
    pub deployments_dir: PathBuf,
    /// Generated front-end module. `None` skips generation.
    #[serde(default)]
    pub frontend_module: Option<PathBuf>,
    /// Hardhat `artifacts/` directory.
    pub artifacts_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            deployments_dir: PathBuf::from("deployments"),
            frontend_module: Some(PathBuf::from("src/utils/contracts.js")),
            artifacts_dir: PathBuf::from("artifacts"),
        }
    }
}
