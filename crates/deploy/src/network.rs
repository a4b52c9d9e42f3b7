//! Network context and the write-side backend used by the deployment controller.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    contract::{InspectorApi, InspectorContract},
    rpc::{self, deserialize_u64_from_hex},
};

/// Default number of confirmations required before a deployment is considered settled.
pub const DEFAULT_CONFIRMATIONS: u64 = 2;
/// Default upper bound for waiting on confirmations.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);
/// Default interval between receipt/head polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default signer balance under which a warning is emitted (0.1 native units).
pub const DEFAULT_MIN_BALANCE_WEI: u128 = 100_000_000_000_000_000;

/// Everything the deployment controller needs to know about the target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    /// Logical network identifier (e.g. `sepolia`, `local`).
    pub name: String,
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Signing identity. Must be an account the node can sign for.
    pub deployer: Address,
    /// Minimum confirmation depth before the deployment counts as settled.
    pub confirmations: u64,
    /// Upper bound for the confirmation wait.
    pub confirmation_timeout: Duration,
    /// Interval between receipt/head polls.
    pub poll_interval: Duration,
    /// Signer balance under which a low-balance warning is emitted.
    pub min_balance_wei: U256,
}

impl NetworkContext {
    pub fn new(name: impl Into<String>, rpc_url: Url, deployer: Address) -> Self {
        Self {
            name: name.into(),
            rpc_url,
            deployer,
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_balance_wei: U256::from(DEFAULT_MIN_BALANCE_WEI),
        }
    }
}

/// Block inclusion of a deployment transaction, observed at the required depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    pub tx_hash: B256,
    pub block_number: u64,
    /// Confirmations observed when the wait returned (`head - block_number + 1`).
    pub confirmations: u64,
    pub gas_used: u64,
    pub effective_gas_price: Option<U256>,
    /// Created contract, `None` if the transaction did not create one.
    pub contract_address: Option<Address>,
    /// Execution status from the receipt.
    pub success: bool,
}

/// Write-side operations against the network.
///
/// Every method crosses the network boundary and may suspend the caller.
pub trait DeployBackend {
    /// Read handle type for deployed instances.
    type Reader: InspectorApi;

    /// Build a read handle for the instance at `address`.
    fn reader(&self, address: Address) -> Self::Reader;

    /// Native-currency balance of the signing identity.
    async fn signer_balance(&self) -> anyhow::Result<U256>;

    /// Current price per unit of gas.
    async fn gas_price(&self) -> anyhow::Result<U256>;

    /// Projected gas cost of deploying `bytecode`.
    async fn estimate_deploy(&self, bytecode: &Bytes) -> anyhow::Result<u64>;

    /// Submit the deployment with the given gas limit, returning the transaction hash.
    async fn deploy(&self, bytecode: &Bytes, gas_limit: u64) -> anyhow::Result<B256>;

    /// Block until `tx_hash` is included and buried under `min_depth` confirmations.
    ///
    /// This has no internal deadline; callers bound it with a timeout.
    async fn wait_confirmations(&self, tx_hash: B256, min_depth: u64)
    -> anyhow::Result<Inclusion>;
}

/// Transaction receipt fields used to build an [`Inclusion`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    gas_used: u64,
    #[serde(default)]
    effective_gas_price: Option<U256>,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(default)]
    status: Option<String>,
}

impl TransactionReceipt {
    fn success(&self) -> bool {
        // Pre-byzantium receipts carry no status field.
        self.status
            .as_deref()
            .map(|s| rpc::parse_hex_u64(s).map(|v| v == 1).unwrap_or(false))
            .unwrap_or(true)
    }
}

/// Outcome of one polling attempt. Only `Pending` is retried; RPC and decoding
/// failures end the wait.
#[derive(Debug)]
enum Poll {
    Pending(String),
    Failed(anyhow::Error),
}

impl Poll {
    fn is_pending(&self) -> bool {
        matches!(self, Poll::Pending(_))
    }

    fn into_error(self) -> anyhow::Error {
        match self {
            Poll::Pending(progress) => anyhow::anyhow!("gave up waiting: {}", progress),
            Poll::Failed(err) => err,
        }
    }
}

impl std::fmt::Display for Poll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Poll::Pending(progress) => write!(f, "{}", progress),
            Poll::Failed(err) => write!(f, "{:#}", err),
        }
    }
}

/// [`DeployBackend`] talking to a JSON-RPC node that holds the signer's key
/// (`eth_sendTransaction`), e.g. Anvil or a node with an unlocked account.
#[derive(Debug, Clone)]
pub struct JsonRpcBackend {
    client: reqwest::Client,
    rpc_url: String,
    from: Address,
    poll_interval: Duration,
}

impl JsonRpcBackend {
    pub fn new(ctx: &NetworkContext) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            rpc_url: ctx.rpc_url.to_string(),
            from: ctx.deployer,
            poll_interval: ctx.poll_interval,
        })
    }

    /// Chain id reported by the node.
    pub async fn chain_id(&self) -> anyhow::Result<u64> {
        let result: String =
            rpc::json_rpc_call(&self.client, &self.rpc_url, "eth_chainId", vec![]).await?;
        rpc::parse_hex_u64(&result)
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        let result: String =
            rpc::json_rpc_call(&self.client, &self.rpc_url, "eth_blockNumber", vec![]).await?;
        rpc::parse_hex_u64(&result)
    }

    async fn receipt(&self, tx_hash: B256) -> anyhow::Result<Option<TransactionReceipt>> {
        rpc::json_rpc_call(
            &self.client,
            &self.rpc_url,
            "eth_getTransactionReceipt",
            vec![serde_json::json!(tx_hash)],
        )
        .await
    }
}

impl DeployBackend for JsonRpcBackend {
    type Reader = InspectorContract;

    fn reader(&self, address: Address) -> Self::Reader {
        InspectorContract::new(self.client.clone(), self.rpc_url.clone(), address)
    }

    async fn signer_balance(&self) -> anyhow::Result<U256> {
        rpc::json_rpc_call(
            &self.client,
            &self.rpc_url,
            "eth_getBalance",
            vec![serde_json::json!(self.from), serde_json::json!("latest")],
        )
        .await
    }

    async fn gas_price(&self) -> anyhow::Result<U256> {
        rpc::json_rpc_call(&self.client, &self.rpc_url, "eth_gasPrice", vec![]).await
    }

    async fn estimate_deploy(&self, bytecode: &Bytes) -> anyhow::Result<u64> {
        let result: String = rpc::json_rpc_call(
            &self.client,
            &self.rpc_url,
            "eth_estimateGas",
            vec![serde_json::json!({ "from": self.from, "data": bytecode })],
        )
        .await?;
        rpc::parse_hex_u64(&result)
    }

    async fn deploy(&self, bytecode: &Bytes, gas_limit: u64) -> anyhow::Result<B256> {
        rpc::json_rpc_call(
            &self.client,
            &self.rpc_url,
            "eth_sendTransaction",
            vec![serde_json::json!({
                "from": self.from,
                "data": bytecode,
                "gas": format!("0x{:x}", gas_limit),
            })],
        )
        .await
    }

    async fn wait_confirmations(
        &self,
        tx_hash: B256,
        min_depth: u64,
    ) -> anyhow::Result<Inclusion> {
        let backoff = || {
            ConstantBuilder::default()
                .with_delay(self.poll_interval)
                .without_max_times()
        };

        let receipt = (|| async {
            match self.receipt(tx_hash).await {
                Ok(Some(receipt)) => Ok(receipt),
                Ok(None) => Err(Poll::Pending(format!("{} not yet included", tx_hash))),
                Err(err) => Err(Poll::Failed(err)),
            }
        })
        .retry(backoff())
        .when(Poll::is_pending)
        .notify(|poll, _| {
            tracing::trace!(tx_hash = %tx_hash, status = %poll, "Waiting for inclusion...");
        })
        .await
        .map_err(Poll::into_error)?;

        tracing::debug!(
            tx_hash = %receipt.transaction_hash,
            block_number = receipt.block_number,
            "Transaction included"
        );

        let confirmations = (|| async {
            let head = self.block_number().await.map_err(Poll::Failed)?;
            let depth = head.saturating_sub(receipt.block_number) + 1;
            if depth >= min_depth {
                Ok(depth)
            } else {
                Err(Poll::Pending(format!("{} of {} confirmations", depth, min_depth)))
            }
        })
        .retry(backoff())
        .when(Poll::is_pending)
        .notify(|poll, _| {
            tracing::trace!(tx_hash = %tx_hash, progress = %poll, "Waiting for confirmations...");
        })
        .await
        .map_err(Poll::into_error)?;

        Ok(Inclusion {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            confirmations,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            contract_address: receipt.contract_address,
            success: receipt.success(),
        })
    }
}
