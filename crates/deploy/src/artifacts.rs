//! Compiled contract artifacts.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::DeployError;

/// The fields we need from a Hardhat artifact JSON file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: Option<String>,
    bytecode: String,
}

/// Looks up creation bytecode in a Hardhat-style `artifacts/` directory.
///
/// For a contract `OSSToken` the candidates are, in order:
/// `<root>/contracts/OSSToken.sol/OSSToken.json` and `<root>/OSSToken.json`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, contract: &str) -> [PathBuf; 2] {
        [
            self.root
                .join("contracts")
                .join(format!("{contract}.sol"))
                .join(format!("{contract}.json")),
            self.root.join(format!("{contract}.json")),
        ]
    }

    /// Creation bytecode for `contract`.
    pub fn bytecode(&self, contract: &str) -> Result<Vec<u8>, DeployError> {
        let artifact_error = |reason: String| DeployError::Artifact {
            contract: contract.to_string(),
            reason,
        };

        let path = self
            .candidates(contract)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| {
                artifact_error(format!("no artifact found under {}", self.root.display()))
            })?;

        let content = std::fs::read_to_string(&path)
            .map_err(|e| artifact_error(format!("failed to read {}: {e}", path.display())))?;
        let artifact: ArtifactFile = serde_json::from_str(&content)
            .map_err(|e| artifact_error(format!("failed to parse {}: {e}", path.display())))?;

        if let Some(name) = artifact.contract_name.as_deref() {
            if name != contract {
                return Err(artifact_error(format!(
                    "{} holds contract '{name}'",
                    path.display()
                )));
            }
        }

        let code = artifact.bytecode.trim().trim_start_matches("0x");
        if code.is_empty() {
            return Err(artifact_error(
                "empty bytecode (abstract contract or interface?)".to_string(),
            ));
        }

        let bytecode = hex::decode(code)
            .map_err(|e| artifact_error(format!("bytecode is not valid hex: {e}")))?;

        tracing::debug!(contract, path = %path.display(), size = bytecode.len(), "Loaded artifact");

        Ok(bytecode)
    }
}
