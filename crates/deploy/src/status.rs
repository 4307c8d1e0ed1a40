//! Read-only inspection of a recorded deployment.

use std::future::Future;

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, Bytes, U256},
};
use anyhow::{Context, Result};

use crate::{
    abi,
    record::{DeploymentResult, DeploymentStore},
    rpc::{RpcClient, RpcError},
};

/// Chain state needed to verify a deployment.
pub trait ContractReader {
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes, RpcError>> + Send;

    fn read(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<Bytes, RpcError>> + Send;
}

impl ContractReader for RpcClient {
    async fn code_at(&self, address: Address) -> Result<Bytes, RpcError> {
        RpcClient::code_at(self, address).await
    }

    async fn read(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        RpcClient::read(self, to, data).await
    }
}

/// ERC-20 metadata read from a token contract. Fields the contract does not expose are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenInfo {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub total_supply: Option<U256>,
}

impl TokenInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.symbol.is_none()
            && self.decimals.is_none()
            && self.total_supply.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractStatus {
    pub contract: String,
    pub address: Address,
    pub deployment_block: u64,
    /// Whether runtime code is present at the address.
    pub has_code: bool,
    pub token: Option<TokenInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub network: String,
    pub chain_id: u64,
    pub deployer: Address,
    pub timestamp: String,
    pub contracts: Vec<ContractStatus>,
}

impl StatusReport {
    /// True when every recorded contract still has code on-chain.
    pub fn healthy(&self) -> bool {
        self.contracts.iter().all(|c| c.has_code)
    }
}

/// Load the record for `network` from `store` and check it against the chain.
pub async fn inspect<R: ContractReader>(
    store: &DeploymentStore,
    network: &str,
    reader: &R,
) -> Result<StatusReport> {
    let result = store
        .load_result(network)
        .with_context(|| format!("No deployment recorded for network '{network}'"))?;
    inspect_result(&result, reader).await
}

pub async fn inspect_result<R: ContractReader>(
    result: &DeploymentResult,
    reader: &R,
) -> Result<StatusReport> {
    let mut contracts = Vec::with_capacity(result.contracts.len());

    for (name, record) in &result.contracts {
        let code = reader
            .code_at(record.address)
            .await
            .with_context(|| format!("Failed to read code of {name} at {}", record.address))?;
        let has_code = !code.is_empty();

        let token = if has_code {
            Some(token_info(reader, record.address).await).filter(|t| !t.is_empty())
        } else {
            tracing::warn!(contract = %name, address = %record.address, "No code at recorded address");
            None
        };

        contracts.push(ContractStatus {
            contract: name.clone(),
            address: record.address,
            deployment_block: record.deployment_block,
            has_code,
            token,
        });
    }

    Ok(StatusReport {
        network: result.network.clone(),
        chain_id: result.chain_id,
        deployer: result.deployer,
        timestamp: result.timestamp.clone(),
        contracts,
    })
}

async fn token_info<R: ContractReader>(reader: &R, address: Address) -> TokenInfo {
    TokenInfo {
        name: read_value(reader, address, "name()", &DynSolType::String)
            .await
            .and_then(|v| v.as_str().map(str::to_string)),
        symbol: read_value(reader, address, "symbol()", &DynSolType::String)
            .await
            .and_then(|v| v.as_str().map(str::to_string)),
        decimals: read_value(reader, address, "decimals()", &DynSolType::Uint(8))
            .await
            .and_then(|v| v.as_uint())
            .and_then(|(v, _)| u8::try_from(v).ok()),
        total_supply: read_value(reader, address, "totalSupply()", &DynSolType::Uint(256))
            .await
            .and_then(|v| v.as_uint())
            .map(|(v, _)| v),
    }
}

async fn read_value<R: ContractReader>(
    reader: &R,
    address: Address,
    signature: &str,
    ty: &DynSolType,
) -> Option<DynSolValue> {
    match reader.read(address, abi::encode_call(signature, &[])).await {
        Ok(data) => abi::decode_return(ty, &data),
        Err(e) => {
            tracing::debug!(%address, signature, error = %e, "Read failed");
            None
        }
    }
}
