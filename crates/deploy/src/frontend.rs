//! Generated front-end module exposing deployed addresses.

use std::{fmt::Write as _, path::Path};

use anyhow::{Context, Result};

use crate::record::DeploymentResult;

/// Render the module source for `result`.
///
/// The output is valid JavaScript and TypeScript. `CONTRACT_ADDRESSES` maps each export key
/// (the step's `export_as`, or the upper snake case contract name) to its address. Keys are
/// unique for any validated plan.
pub fn render_module(result: &DeploymentResult) -> String {
    let exports: Vec<(String, String, u64)> = result
        .steps
        .iter()
        .filter(|step| step.method.is_none())
        .map(|step| {
            let record = result.contracts.get(&step.contract);
            let key = record
                .and_then(|r| r.export_as.clone())
                .unwrap_or_else(|| export_key(&step.contract));
            (key, step.address.to_string(), step.gas_used)
        })
        .collect();

    let mut out = String::new();
    out.push_str("// Auto-generated contract addresses - DO NOT EDIT\n");
    out.push_str("// Updated by deployment script\n\n");

    out.push_str("export const CONTRACT_ADDRESSES = {\n");
    for (key, address, _) in &exports {
        let _ = writeln!(out, "  {key}: \"{address}\",");
    }
    out.push_str("};\n\n");

    out.push_str("export const DEPLOYMENT_INFO = {\n");
    let _ = writeln!(out, "  network: \"{}\",", result.network);
    let _ = writeln!(out, "  chainId: {},", result.chain_id);
    let _ = writeln!(out, "  deployedAt: \"{}\",", result.timestamp);
    let _ = writeln!(out, "  deployer: \"{}\",", result.deployer);
    out.push_str("  gasUsed: {\n");
    for (key, _, gas) in &exports {
        let _ = writeln!(out, "    {key}: {gas},");
    }
    out.push_str("  },\n");
    out.push_str("};\n");

    out
}

/// Write the module to `path`, creating parent directories.
pub fn write_module(path: &Path, result: &DeploymentResult) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, render_module(result))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Frontend config updated");
    Ok(())
}

/// `OSSRewardsV2` -> `OSS_REWARDS_V2`.
pub fn export_key(contract: &str) -> String {
    let chars: Vec<char> = contract.chars().collect();
    let mut key = String::with_capacity(contract.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            if !key.ends_with('_') && !key.is_empty() {
                key.push('_');
            }
            continue;
        }
        if i > 0 && c.is_ascii_uppercase() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if (prev.is_ascii_lowercase() || prev.is_ascii_digit() || (prev.is_ascii_uppercase() && next_is_lower))
                && !key.ends_with('_')
            {
                key.push('_');
            }
        }
        key.push(c.to_ascii_uppercase());
    }

    key
}
