//! In-memory stand-ins for the remote side, used by unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use alloy_core::primitives::{Address, B256, Bytes, U256};

use crate::{
    config_store::RegisteredToken,
    contract::{ContractInfo, InspectorApi, TokenDetails},
    network::{DeployBackend, Inclusion},
};

pub(crate) const TOKEN_A: Address = Address::with_last_byte(0xa1);
pub(crate) const TOKEN_B: Address = Address::with_last_byte(0xb2);
pub(crate) const INSTANCE: Address = Address::with_last_byte(0x42);
pub(crate) const OWNER: Address = Address::with_last_byte(0x01);

/// Registry with two tokens, in symbol order.
pub(crate) fn registry() -> Vec<RegisteredToken> {
    vec![
        RegisteredToken {
            symbol: "TOKEN_A".to_string(),
            address: TOKEN_A,
            decimals: 18,
        },
        RegisteredToken {
            symbol: "TOKEN_B".to_string(),
            address: TOKEN_B,
            decimals: 6,
        },
    ]
}

/// Scriptable inspector instance.
#[derive(Debug, Clone)]
pub(crate) struct FakeInspector {
    address: Address,
    balances: HashMap<Address, U256>,
    tokens: HashMap<Address, (String, u8)>,
    valid: HashSet<Address>,
    info: ContractInfo,
    failing: HashSet<&'static str>,
    truncate: bool,
}

impl FakeInspector {
    /// An instance that answers every call consistently with [`registry`].
    pub(crate) fn healthy() -> Self {
        Self {
            address: INSTANCE,
            balances: HashMap::from([
                (TOKEN_A, U256::from(1_000_000_000_000_000_000u128)),
                (TOKEN_B, U256::from(2_000_000u64)),
                (Address::ZERO, U256::from(50_000_000_000_000_000u128)),
            ]),
            tokens: HashMap::from([
                (TOKEN_A, ("TOKEN_A".to_string(), 18)),
                (TOKEN_B, ("TOKEN_B".to_string(), 6)),
            ]),
            valid: HashSet::from([TOKEN_A, TOKEN_B]),
            info: ContractInfo {
                version: "1.0.0".to_string(),
                deployed_at: 1_737_316_800,
                paused: false,
            },
            failing: HashSet::new(),
            truncate: false,
        }
    }

    /// Make every call to `operation` fail.
    pub(crate) fn failing(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    pub(crate) fn valid_token(mut self, token: Address) -> Self {
        self.valid.insert(token);
        self
    }

    /// Drop the last entry of every batched response.
    pub(crate) fn truncated(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub(crate) fn version(mut self, version: &str) -> Self {
        self.info.version = version.to_string();
        self
    }

    fn check(&self, operation: &'static str) -> anyhow::Result<()> {
        if self.failing.contains(operation) {
            anyhow::bail!("execution reverted: {} unavailable", operation);
        }
        Ok(())
    }

    fn batch<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if self.truncate {
            items.pop();
        }
        items
    }
}

impl InspectorApi for FakeInspector {
    fn address(&self) -> Address {
        self.address
    }

    async fn get_balance(&self, token: Address) -> anyhow::Result<U256> {
        self.check("getBalance")?;
        Ok(self.balances.get(&token).copied().unwrap_or_default())
    }

    async fn get_multiple_balances(&self, tokens: &[Address]) -> anyhow::Result<Vec<U256>> {
        self.check("getMultipleBalances")?;
        Ok(self.batch(
            tokens
                .iter()
                .map(|t| self.balances.get(t).copied().unwrap_or_default())
                .collect(),
        ))
    }

    async fn get_multiple_token_info(
        &self,
        tokens: &[Address],
    ) -> anyhow::Result<Vec<TokenDetails>> {
        self.check("getMultipleTokenInfo")?;
        Ok(self.batch(
            tokens
                .iter()
                .map(|t| {
                    let (symbol, decimals) = self.tokens.get(t).cloned().unwrap_or_default();
                    TokenDetails {
                        address: *t,
                        symbol,
                        decimals,
                        balance: self.balances.get(t).copied().unwrap_or_default(),
                        total_supply: U256::from(1_000_000u64),
                    }
                })
                .collect(),
        ))
    }

    async fn batch_validate_tokens(&self, tokens: &[Address]) -> anyhow::Result<Vec<bool>> {
        self.check("batchValidateTokens")?;
        Ok(self.batch(tokens.iter().map(|t| self.valid.contains(t)).collect()))
    }

    async fn get_contract_info(&self) -> anyhow::Result<ContractInfo> {
        self.check("getContractInfo")?;
        Ok(self.info.clone())
    }

    async fn owner(&self) -> anyhow::Result<Address> {
        self.check("owner")?;
        Ok(OWNER)
    }

    async fn is_valid_token(&self, token: Address) -> anyhow::Result<bool> {
        self.check("isValidToken")?;
        Ok(self.valid.contains(&token))
    }
}

/// How [`FakeChain::wait_confirmations`] behaves.
#[derive(Debug, Clone)]
pub(crate) enum Confirmation {
    Included(Inclusion),
    /// Never returns.
    Pending,
    Error(String),
}

/// Scriptable chain for the deployment controller.
#[derive(Debug)]
pub(crate) struct FakeChain {
    pub(crate) estimate: Result<u64, String>,
    pub(crate) gas_price: U256,
    pub(crate) balance: Result<U256, String>,
    pub(crate) submit: Result<B256, String>,
    pub(crate) confirmation: Confirmation,
    pub(crate) inspector: FakeInspector,
    /// Gas limit passed to `deploy`, if it was called.
    pub(crate) submitted_gas_limit: Mutex<Option<u64>>,
    submissions: Mutex<u8>,
}

/// Hash of the first submission. Later submissions get `repeat_byte(0x78)`, `0x79`, ...
pub(crate) const TX_HASH: B256 = B256::repeat_byte(0x77);

impl FakeChain {
    /// A chain where the deployment succeeds with two confirmations.
    pub(crate) fn confirming() -> Self {
        Self {
            estimate: Ok(500_000),
            gas_price: U256::from(2_000_000_000u64),
            balance: Ok(U256::from(1_000_000_000_000_000_000u128)),
            submit: Ok(TX_HASH),
            confirmation: Confirmation::Included(Inclusion {
                tx_hash: TX_HASH,
                block_number: 100,
                confirmations: 2,
                gas_used: 450_000,
                effective_gas_price: Some(U256::from(1_000_000_000u64)),
                contract_address: Some(INSTANCE),
                success: true,
            }),
            inspector: FakeInspector::healthy(),
            submitted_gas_limit: Mutex::new(None),
            submissions: Mutex::new(0),
        }
    }

    pub(crate) fn submitted_gas_limit(&self) -> Option<u64> {
        *self.submitted_gas_limit.lock().unwrap()
    }

    pub(crate) fn inclusion_mut(&mut self) -> &mut Inclusion {
        match &mut self.confirmation {
            Confirmation::Included(inclusion) => inclusion,
            _ => panic!("chain is not configured to include the deployment"),
        }
    }
}

impl DeployBackend for FakeChain {
    type Reader = FakeInspector;

    fn reader(&self, _address: Address) -> Self::Reader {
        self.inspector.clone()
    }

    async fn signer_balance(&self) -> anyhow::Result<U256> {
        self.balance.clone().map_err(anyhow::Error::msg)
    }

    async fn gas_price(&self) -> anyhow::Result<U256> {
        Ok(self.gas_price)
    }

    async fn estimate_deploy(&self, _bytecode: &Bytes) -> anyhow::Result<u64> {
        self.estimate.clone().map_err(anyhow::Error::msg)
    }

    async fn deploy(&self, _bytecode: &Bytes, gas_limit: u64) -> anyhow::Result<B256> {
        *self.submitted_gas_limit.lock().unwrap() = Some(gas_limit);
        let hash = self.submit.clone().map_err(anyhow::Error::msg)?;

        let mut submissions = self.submissions.lock().unwrap();
        let hash = match *submissions {
            0 => hash,
            n => B256::repeat_byte(hash[0].wrapping_add(n)),
        };
        *submissions += 1;
        Ok(hash)
    }

    async fn wait_confirmations(
        &self,
        tx_hash: B256,
        _min_depth: u64,
    ) -> anyhow::Result<Inclusion> {
        match &self.confirmation {
            Confirmation::Included(inclusion) => Ok(Inclusion {
                tx_hash,
                ..inclusion.clone()
            }),
            Confirmation::Pending => std::future::pending().await,
            Confirmation::Error(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}
