//! Read-side handle to a deployed token inspector contract.
//!
//! The contract exposes a fixed set of view methods. [`InspectorApi`] is the seam the
//! query client and the deployment verification step talk to; [`InspectorContract`]
//! implements it over `eth_call`.

use alloy_core::{
    primitives::{Address, Bytes, U256},
    sol,
    sol_types::SolCall,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::rpc;

sol! {
    interface ITokenInspector {
        struct TokenInfo {
            address token;
            string symbol;
            uint8 decimals;
            uint256 balance;
            uint256 totalSupply;
        }

        function getBalance(address token) external view returns (uint256);
        function getMultipleBalances(address[] calldata tokens) external view returns (uint256[] memory);
        function getMultipleTokenInfo(address[] calldata tokens) external view returns (TokenInfo[] memory);
        function batchValidateTokens(address[] calldata tokens) external view returns (bool[] memory);
        function getContractInfo() external view returns (string memory version, uint256 deployedAt, bool paused);
        function owner() external view returns (address);
        function isValidToken(address token) external view returns (bool);
    }
}

/// Sentinel identifier that never resolves to a token contract.
pub const INVALID_TOKEN_SENTINEL: Address = Address::with_last_byte(1);

/// Per-token record returned by `getMultipleTokenInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDetails {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub balance: U256,
    pub total_supply: U256,
}

impl From<ITokenInspector::TokenInfo> for TokenDetails {
    fn from(info: ITokenInspector::TokenInfo) -> Self {
        Self {
            address: info.token,
            symbol: info.symbol,
            decimals: info.decimals,
            balance: info.balance,
            total_supply: info.totalSupply,
        }
    }
}

/// Metadata returned by `getContractInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    /// Version tag compiled into the contract.
    pub version: String,
    /// Unix timestamp recorded by the constructor.
    pub deployed_at: u64,
    pub paused: bool,
}

/// View methods exposed by a deployed inspector instance.
///
/// Batched methods return exactly one entry per input, in input order.
pub trait InspectorApi {
    /// Address of the instance this handle talks to.
    fn address(&self) -> Address;

    async fn get_balance(&self, token: Address) -> anyhow::Result<U256>;

    async fn get_multiple_balances(&self, tokens: &[Address]) -> anyhow::Result<Vec<U256>>;

    async fn get_multiple_token_info(&self, tokens: &[Address])
    -> anyhow::Result<Vec<TokenDetails>>;

    async fn batch_validate_tokens(&self, tokens: &[Address]) -> anyhow::Result<Vec<bool>>;

    async fn get_contract_info(&self) -> anyhow::Result<ContractInfo>;

    async fn owner(&self) -> anyhow::Result<Address>;

    async fn is_valid_token(&self, token: Address) -> anyhow::Result<bool>;
}

/// [`InspectorApi`] implementation issuing `eth_call` requests against a JSON-RPC node.
#[derive(Debug, Clone)]
pub struct InspectorContract {
    client: reqwest::Client,
    rpc_url: String,
    address: Address,
}

impl InspectorContract {
    pub fn new(client: reqwest::Client, rpc_url: impl Into<String>, address: Address) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            address,
        }
    }

    /// Execute a view call at the latest block and decode its return data.
    async fn call<C: SolCall>(&self, call: C) -> anyhow::Result<C::Return> {
        let data = Bytes::from(call.abi_encode());

        let output: Bytes = rpc::json_rpc_call(
            &self.client,
            &self.rpc_url,
            "eth_call",
            vec![
                serde_json::json!({ "to": self.address, "data": data }),
                serde_json::json!("latest"),
            ],
        )
        .await
        .with_context(|| format!("{} call to {} failed", C::SIGNATURE, self.address))?;

        if output.is_empty() {
            anyhow::bail!(
                "{} returned no data; is {} an inspector contract?",
                C::SIGNATURE,
                self.address
            );
        }

        C::abi_decode_returns(&output, true)
            .with_context(|| format!("Malformed {} response", C::SIGNATURE))
    }
}

impl InspectorApi for InspectorContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn get_balance(&self, token: Address) -> anyhow::Result<U256> {
        Ok(self
            .call(ITokenInspector::getBalanceCall { token })
            .await?
            ._0)
    }

    async fn get_multiple_balances(&self, tokens: &[Address]) -> anyhow::Result<Vec<U256>> {
        Ok(self
            .call(ITokenInspector::getMultipleBalancesCall {
                tokens: tokens.to_vec(),
            })
            .await?
            ._0)
    }

    async fn get_multiple_token_info(
        &self,
        tokens: &[Address],
    ) -> anyhow::Result<Vec<TokenDetails>> {
        let infos = self
            .call(ITokenInspector::getMultipleTokenInfoCall {
                tokens: tokens.to_vec(),
            })
            .await?
            ._0;

        Ok(infos.into_iter().map(TokenDetails::from).collect())
    }

    async fn batch_validate_tokens(&self, tokens: &[Address]) -> anyhow::Result<Vec<bool>> {
        Ok(self
            .call(ITokenInspector::batchValidateTokensCall {
                tokens: tokens.to_vec(),
            })
            .await?
            ._0)
    }

    async fn get_contract_info(&self) -> anyhow::Result<ContractInfo> {
        let info = self.call(ITokenInspector::getContractInfoCall {}).await?;

        Ok(ContractInfo {
            version: info.version,
            deployed_at: u64::try_from(info.deployedAt).unwrap_or(u64::MAX),
            paused: info.paused,
        })
    }

    async fn owner(&self) -> anyhow::Result<Address> {
        Ok(self.call(ITokenInspector::ownerCall {}).await?._0)
    }

    async fn is_valid_token(&self, token: Address) -> anyhow::Result<bool> {
        Ok(self
            .call(ITokenInspector::isValidTokenCall { token })
            .await?
            ._0)
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::sol_types::SolValue;

    use super::*;

    #[test]
    fn test_invalid_token_sentinel() {
        assert_eq!(
            INVALID_TOKEN_SENTINEL.to_string().to_lowercase(),
            "0x0000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_batched_call_encodes_every_identifier_in_order() {
        let tokens = vec![Address::with_last_byte(0xaa), Address::with_last_byte(0xbb)];
        let encoded = ITokenInspector::getMultipleBalancesCall {
            tokens: tokens.clone(),
        }
        .abi_encode();

        assert_eq!(
            &encoded[..4],
            ITokenInspector::getMultipleBalancesCall::SELECTOR.as_slice()
        );
        let decoded = ITokenInspector::getMultipleBalancesCall::abi_decode(&encoded, true).unwrap();
        assert_eq!(decoded.tokens, tokens);
    }

    #[test]
    fn test_decode_token_info_preserves_order() {
        let infos = vec![
            ITokenInspector::TokenInfo {
                token: Address::with_last_byte(2),
                symbol: "USDC".to_string(),
                decimals: 6,
                balance: U256::from(1_000_000u64),
                totalSupply: U256::from(9_000_000u64),
            },
            ITokenInspector::TokenInfo {
                token: Address::with_last_byte(3),
                symbol: "WETH".to_string(),
                decimals: 18,
                balance: U256::ZERO,
                totalSupply: U256::from(42u64),
            },
        ];
        let output = (infos,).abi_encode_params();

        let decoded = ITokenInspector::getMultipleTokenInfoCall::abi_decode_returns(&output, true)
            .unwrap()
            ._0;
        let details: Vec<TokenDetails> = decoded.into_iter().map(TokenDetails::from).collect();

        assert_eq!(details.len(), 2);
        assert_eq!(details[0].symbol, "USDC");
        assert_eq!(details[0].decimals, 6);
        assert_eq!(details[1].address, Address::with_last_byte(3));
        assert_eq!(details[1].total_supply, U256::from(42u64));
    }
}
