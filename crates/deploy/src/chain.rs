//! Contract deployment and call capability backed by a JSON-RPC endpoint.

use std::future::Future;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256, utils::format_ether};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;

use crate::{
    abi::{self, AbiArg},
    artifacts::ArtifactStore,
    confirm::{ConfirmationReceipt, ReceiptSource},
    error::DeployError,
    rpc::{RpcClient, RpcError, parse_hex_u64},
};

/// Extra gas on top of the node's estimate, in percent.
const GAS_LIMIT_MARGIN_PERCENT: u64 = 20;

fn gas_limit_with_margin(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.saturating_mul(GAS_LIMIT_MARGIN_PERCENT) / 100)
}

/// A submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    pub hash: B256,
    /// The address the contract will live at, for contract creations.
    pub address: Option<Address>,
}

/// Submits deployments and configuration calls on behalf of the deployer account.
pub trait ContractClient {
    /// The account paying for and signing every transaction.
    fn deployer(&self) -> Address;

    /// Submit the creation of `contract` with the given constructor arguments.
    fn deploy(
        &mut self,
        contract: &str,
        args: &[AbiArg],
    ) -> impl Future<Output = Result<TransactionHandle, DeployError>> + Send;

    /// Submit a call to `signature` on `target`.
    fn call(
        &mut self,
        target: Address,
        signature: &str,
        args: &[AbiArg],
    ) -> impl Future<Output = Result<TransactionHandle, DeployError>> + Send;
}

/// Contract client that signs legacy (EIP-155) transactions locally and submits them with
/// `eth_sendRawTransaction`.
///
/// The nonce is read once from the node (`pending` tag) and incremented locally. This is
/// sound because the orchestrator never submits a transaction before the previous one is
/// confirmed.
#[derive(Debug)]
pub struct RpcChain {
    rpc: RpcClient,
    signer: PrivateKeySigner,
    chain_id: u64,
    artifacts: ArtifactStore,
    nonce: Option<u64>,
}

impl RpcChain {
    pub fn new(
        rpc: RpcClient,
        deployer_key: &str,
        chain_id: u64,
        artifacts: ArtifactStore,
    ) -> anyhow::Result<Self> {
        let signer: PrivateKeySigner = deployer_key
            .trim()
            .parse()
            .context("Failed to parse deployer private key")?;

        Ok(Self {
            rpc,
            signer,
            chain_id,
            artifacts,
            nonce: None,
        })
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// The chain id reported by the endpoint.
    pub async fn remote_chain_id(&self) -> Result<u64, RpcError> {
        let id: String = self.rpc.call("eth_chainId", vec![]).await?;
        parse_hex_u64(&id).map_err(|e| RpcError::Decode {
            method: "eth_chainId".to_string(),
            message: e.to_string(),
        })
    }

    /// The deployer's balance in wei.
    pub async fn balance(&self) -> Result<U256, RpcError> {
        self.rpc
            .call(
                "eth_getBalance",
                vec![
                    serde_json::json!(self.signer.address()),
                    serde_json::json!("latest"),
                ],
            )
            .await
    }

    /// Check the endpoint serves `expected_chain_id` and log the deployer's balance.
    pub async fn preflight(&self) -> anyhow::Result<()> {
        let remote = self
            .remote_chain_id()
            .await
            .context("Failed to query chain id")?;
        if remote != self.chain_id {
            anyhow::bail!(
                "RPC endpoint reports chain id {remote}, expected {}",
                self.chain_id
            );
        }

        let balance = self.balance().await.context("Failed to query deployer balance")?;
        tracing::info!(
            deployer = %self.signer.address(),
            balance = %format!("{} ETH", format_ether(balance)),
            chain_id = remote,
            "Deployer account"
        );
        if balance.is_zero() {
            tracing::warn!("Deployer balance is zero, transactions will fail");
        }

        Ok(())
    }

    /// The nonce for the next submission. The pending count is read once, then the local
    /// counter only moves when a submission is accepted.
    async fn next_nonce(&mut self) -> Result<u64, RpcError> {
        let nonce = match self.nonce {
            Some(nonce) => nonce,
            None => {
                let count: String = self
                    .rpc
                    .call(
                        "eth_getTransactionCount",
                        vec![
                            serde_json::json!(self.signer.address()),
                            serde_json::json!("pending"),
                        ],
                    )
                    .await?;
                let nonce = parse_hex_u64(&count).map_err(|e| RpcError::Decode {
                    method: "eth_getTransactionCount".to_string(),
                    message: e.to_string(),
                })?;
                self.nonce = Some(nonce);
                nonce
            }
        };
        Ok(nonce)
    }

    /// Estimate, sign and submit one transaction. `label` names the step in errors.
    async fn submit(
        &mut self,
        label: &str,
        to: TxKind,
        input: Bytes,
    ) -> Result<(B256, u64), DeployError> {
        let from = self.signer.address();
        let nonce = self
            .next_nonce()
            .await
            .map_err(DeployError::TransientNetwork)?;

        let mut request = serde_json::json!({
            "from": from,
            "data": input,
        });
        if let TxKind::Call(to) = to {
            request["to"] = serde_json::json!(to);
        }

        let estimate: String = self
            .rpc
            .call("eth_estimateGas", vec![request])
            .await
            .map_err(|e| DeployError::from_submission(label, e))?;
        let estimate = parse_hex_u64(&estimate)
            .with_context(|| format!("Invalid gas estimate for {label}"))?;
        let gas_limit = gas_limit_with_margin(estimate);

        let gas_price: U256 = self
            .rpc
            .call("eth_gasPrice", vec![])
            .await
            .map_err(DeployError::TransientNetwork)?;
        let gas_price = u128::try_from(gas_price)
            .with_context(|| format!("Gas price {gas_price} does not fit in u128"))?;

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to,
            value: U256::ZERO,
            input,
        };

        let signature = self
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .context("Failed to sign transaction")?;
        let envelope: TxEnvelope = tx.into_signed(signature).into();
        let raw = Bytes::from(envelope.encoded_2718());

        tracing::debug!(label, nonce, gas_limit, gas_price = %gas_price, "Submitting transaction");

        let hash: B256 = self
            .rpc
            .call("eth_sendRawTransaction", vec![serde_json::json!(raw)])
            .await
            .map_err(|e| DeployError::from_submission(label, e))?;

        self.nonce = Some(nonce + 1);

        Ok((hash, nonce))
    }
}

impl ContractClient for RpcChain {
    fn deployer(&self) -> Address {
        self.signer.address()
    }

    async fn deploy(
        &mut self,
        contract: &str,
        args: &[AbiArg],
    ) -> Result<TransactionHandle, DeployError> {
        let bytecode = self.artifacts.bytecode(contract)?;
        let init_code = abi::encode_deploy(&bytecode, args);

        let (hash, nonce) = self.submit(contract, TxKind::Create, init_code).await?;

        Ok(TransactionHandle {
            hash,
            address: Some(self.signer.address().create(nonce)),
        })
    }

    async fn call(
        &mut self,
        target: Address,
        signature: &str,
        args: &[AbiArg],
    ) -> Result<TransactionHandle, DeployError> {
        let calldata = abi::encode_call(signature, args);
        let (hash, _) = self.submit(signature, TxKind::Call(target), calldata).await?;

        Ok(TransactionHandle {
            hash,
            address: None,
        })
    }
}

impl ReceiptSource for RpcChain {
    async fn fetch_receipt(&self, tx_hash: B256) -> Result<Option<ConfirmationReceipt>, RpcError> {
        self.rpc
            .call("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use alloy_core::primitives::keccak256;
    use alloy_eips::eip2718::Decodable2718;
    use serde_json::{Value, json};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };
    use url::Url;

    use super::*;

    // Well-known development key (Hardhat/Anvil account #0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_deployer_address_from_key() {
        let rpc = RpcClient::new("http://127.0.0.1:8545".parse().unwrap()).unwrap();
        let chain = RpcChain::new(rpc, DEV_KEY, 31337, ArtifactStore::new("artifacts")).unwrap();

        assert_eq!(
            chain.deployer(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_rejects_malformed_key() {
        let rpc = RpcClient::new("http://127.0.0.1:8545".parse().unwrap()).unwrap();
        assert!(RpcChain::new(rpc, "not-a-key", 1, ArtifactStore::new("artifacts")).is_err());
    }

    #[test]
    fn test_create_address_matches_nonce() {
        let deployer: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        // First contract deployed by account #0 on a fresh Hardhat/Anvil node.
        assert_eq!(
            deployer.create(0),
            "0x5FbDB2315678afecb367f032d93F642f64180aa3"
                .parse::<Address>()
                .unwrap()
        );
    }

    type Reply = Result<Value, (i64, String)>;
    type Requests = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

    /// A JSON-RPC node on a local port answering each request from `handler`.
    struct RpcStub {
        url: Url,
        requests: Requests,
    }

    impl RpcStub {
        async fn spawn<H>(handler: H) -> Self
        where
            H: Fn(&str, &[Value]) -> Reply + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap())
                .parse()
                .unwrap();
            let requests = Requests::default();

            let handler = Arc::new(handler);
            let log = requests.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve(socket, handler.clone(), log.clone()));
                }
            });

            Self { url, requests }
        }

        fn chain(&self, chain_id: u64, artifacts: ArtifactStore) -> RpcChain {
            let rpc = RpcClient::new(self.url.clone()).unwrap();
            RpcChain::new(rpc, DEV_KEY, chain_id, artifacts).unwrap()
        }

        fn count(&self, method: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| m == method)
                .count()
        }

        /// Every transaction sent with `eth_sendRawTransaction`, decoded.
        fn sent(&self) -> Vec<(B256, TxLegacy)> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| m == "eth_sendRawTransaction")
                .map(|(_, params)| {
                    let raw: Bytes = serde_json::from_value(params[0].clone()).unwrap();
                    let mut buf: &[u8] = &raw;
                    match TxEnvelope::decode_2718(&mut buf).unwrap() {
                        TxEnvelope::Legacy(signed) => (*signed.hash(), signed.tx().clone()),
                        other => panic!("expected a legacy transaction, got {other:?}"),
                    }
                })
                .collect()
        }
    }

    async fn serve<H>(mut socket: TcpStream, handler: Arc<H>, log: Requests)
    where
        H: Fn(&str, &[Value]) -> Reply + Send + Sync + 'static,
    {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let header_end = loop {
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            };

            let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let length: usize = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);

            while buf.len() < header_end + length {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }

            let request: Value = serde_json::from_slice(&buf[header_end..header_end + length]).unwrap();
            buf.drain(..header_end + length);

            let method = request["method"].as_str().unwrap_or_default().to_string();
            let params = request["params"].as_array().cloned().unwrap_or_default();
            log.lock().unwrap().push((method.clone(), params.clone()));

            let reply = match handler(&method, &params) {
                Ok(result) => json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }),
                Err((code, message)) => json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "error": { "code": code, "message": message },
                }),
            };
            let payload = reply.to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                payload.len(),
                payload
            );
            if socket.write_all(response.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    /// A node with pending nonce 5, a 100 000 gas estimate and a 1 gwei gas price. Calls to
    /// `fail()` revert at estimation.
    fn node(method: &str, params: &[Value]) -> Reply {
        match method {
            "eth_getTransactionCount" => Ok(json!("0x5")),
            "eth_estimateGas" => {
                let data = params[0]["data"].as_str().unwrap_or_default();
                let fail_selector = format!("0x{}", hex::encode(abi::selector("fail()")));
                if data.starts_with(&fail_selector) {
                    Err((3, "execution reverted: always fails".to_string()))
                } else {
                    Ok(json!("0x186a0"))
                }
            }
            "eth_gasPrice" => Ok(json!("0x3b9aca00")),
            "eth_sendRawTransaction" => {
                let raw: Bytes = serde_json::from_value(params[0].clone()).unwrap();
                Ok(json!(keccak256(&raw)))
            }
            "eth_getTransactionReceipt" => Ok(Value::Null),
            _ => Err((-32601, format!("method {method} not found"))),
        }
    }

    #[test]
    fn test_gas_margin_saturates() {
        assert_eq!(gas_limit_with_margin(100_000), 120_000);
        assert_eq!(gas_limit_with_margin(0), 0);
        assert_eq!(gas_limit_with_margin(u64::MAX), u64::MAX);
        assert_eq!(gas_limit_with_margin(1_000_000_000_000_000_000), u64::MAX);
    }

    #[tokio::test]
    async fn test_nonce_fetched_once_and_signed_fields() {
        let stub = RpcStub::spawn(node).await;
        let mut chain = stub.chain(31337, ArtifactStore::new("artifacts"));
        let target = Address::repeat_byte(0x42);

        let mut hashes = Vec::new();
        for _ in 0..3 {
            let handle = chain.call(target, "pause()", &[]).await.unwrap();
            assert!(handle.address.is_none());
            hashes.push(handle.hash);
        }

        assert_eq!(stub.count("eth_getTransactionCount"), 1);

        let sent = stub.sent();
        let nonces: Vec<_> = sent.iter().map(|(_, tx)| tx.nonce).collect();
        assert_eq!(nonces, vec![5, 6, 7]);

        for ((hash, tx), returned) in sent.iter().zip(&hashes) {
            assert_eq!(hash, returned);
            assert_eq!(tx.chain_id, Some(31337));
            assert_eq!(tx.gas_limit, 120_000);
            assert_eq!(tx.gas_price, 1_000_000_000);
            assert_eq!(tx.to, TxKind::Call(target));
            assert_eq!(tx.value, U256::ZERO);
            assert_eq!(tx.input, abi::encode_call("pause()", &[]));
        }
    }

    #[tokio::test]
    async fn test_rejected_estimate_keeps_nonce() {
        let stub = RpcStub::spawn(node).await;
        let mut chain = stub.chain(31337, ArtifactStore::new("artifacts"));
        let target = Address::repeat_byte(0x42);

        let err = chain.call(target, "fail()", &[]).await.unwrap_err();
        assert_eq!(err.kind(), crate::DeployErrorKind::CallReverted);
        assert!(err.to_string().contains("always fails"));

        chain.call(target, "pause()", &[]).await.unwrap();

        assert_eq!(stub.count("eth_getTransactionCount"), 1);
        let sent = stub.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.nonce, 5);
    }

    #[tokio::test]
    async fn test_rejected_submission_keeps_nonce() {
        let rejected = AtomicBool::new(false);
        let stub = RpcStub::spawn(move |method: &str, params: &[Value]| {
            if method == "eth_sendRawTransaction" && !rejected.swap(true, Ordering::SeqCst) {
                return Err((-32000, "replacement transaction underpriced".to_string()));
            }
            node(method, params)
        })
        .await;
        let mut chain = stub.chain(31337, ArtifactStore::new("artifacts"));
        let target = Address::repeat_byte(0x42);

        let err = chain.call(target, "pause()", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::CallReverted { tx_hash: None, ref reason, .. } if reason.contains("underpriced")
        ));

        chain.call(target, "pause()", &[]).await.unwrap();

        // Both attempts were signed with the same nonce.
        let nonces: Vec<_> = stub.sent().iter().map(|(_, tx)| tx.nonce).collect();
        assert_eq!(nonces, vec![5, 5]);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url: Url = format!("http://{}", listener.local_addr().unwrap())
            .parse()
            .unwrap();
        drop(listener);

        let rpc = RpcClient::new(url).unwrap();
        let mut chain = RpcChain::new(rpc, DEV_KEY, 31337, ArtifactStore::new("artifacts")).unwrap();

        let err = chain
            .call(Address::repeat_byte(0x42), "pause()", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::DeployErrorKind::TransientNetwork);
    }

    #[tokio::test]
    async fn test_missing_receipt_is_none() {
        let stub = RpcStub::spawn(|method: &str, params: &[Value]| {
            if method == "eth_getTransactionReceipt" && params[0] == json!(B256::repeat_byte(0x01)) {
                return Ok(json!({
                    "transactionHash": B256::repeat_byte(0x01),
                    "blockNumber": "0x10",
                    "gasUsed": "0x5208",
                    "status": "0x1",
                    "contractAddress": null,
                }));
            }
            node(method, params)
        })
        .await;
        let chain = stub.chain(31337, ArtifactStore::new("artifacts"));

        assert_eq!(chain.fetch_receipt(B256::repeat_byte(0x02)).await.unwrap(), None);

        let receipt = chain.fetch_receipt(B256::repeat_byte(0x01)).await.unwrap().unwrap();
        assert_eq!(receipt.block_number, 16);
        assert_eq!(receipt.gas_used, 21_000);
        assert!(!receipt.reverted());
    }

    #[tokio::test]
    async fn test_deploy_signs_creation_with_constructor_args() {
        let tmp = tempdir::TempDir::new("ossr-chain").unwrap();
        let dir = tmp.path().join("contracts/OSSRewards.sol");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("OSSRewards.json"),
            json!({ "contractName": "OSSRewards", "bytecode": "0x6080604052" }).to_string(),
        )
        .unwrap();

        let stub = RpcStub::spawn(node).await;
        let mut chain = stub.chain(8119, ArtifactStore::new(tmp.path()));
        let token = Address::repeat_byte(0x11);

        let handle = chain
            .deploy("OSSRewards", &[AbiArg::Address(token)])
            .await
            .unwrap();
        assert_eq!(handle.address, Some(chain.deployer().create(5)));

        let sent = stub.sent();
        let (hash, tx) = &sent[0];
        assert_eq!(*hash, handle.hash);
        assert_eq!(tx.to, TxKind::Create);
        assert_eq!(tx.chain_id, Some(8119));
        assert_eq!(
            tx.input,
            abi::encode_deploy(&[0x60, 0x80, 0x60, 0x40, 0x52], &[AbiArg::Address(token)])
        );
    }
}
