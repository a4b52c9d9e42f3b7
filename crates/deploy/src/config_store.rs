//! Durable record of deployed instance addresses and the token registry.
//!
//! The store is a single JSON document per network:
//!
//! ```json
//! {
//!   "contracts": { "<name>": { "address": "0x..", "deployed": "2026-01-01T00:00:00Z" } },
//!   "tokens":    { "<symbol>": { "address": "0x..", "decimals": 18 } }
//! }
//! ```
//!
//! Writers are not coordinated: a single deployment process is assumed to be the only
//! writer at any time.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default file name of the config store.
pub const CONFIG_STORE_FILENAME: &str = "config.json";

/// Active deployment of a logical contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub address: Address,
    pub deployed: DateTime<Utc>,
}

/// Registered token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub address: Address,
    pub decimals: u8,
}

/// A token from the registry, in registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredToken {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

/// Persisted state of the config store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigState {
    /// Logical contract name -> active deployment.
    #[serde(default)]
    pub contracts: BTreeMap<String, ContractEntry>,
    /// Token symbol -> token metadata.
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenEntry>,
    /// Keys the store does not own (network settings, comments, ...). Carried through writes.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConfigState {
    /// Address of the active deployment of `name`, if any.
    pub fn contract_address(&self, name: &str) -> Option<Address> {
        self.contracts.get(name).map(|entry| entry.address)
    }

    /// The token registry as an ordered list (ascending symbol).
    pub fn token_registry(&self) -> Vec<RegisteredToken> {
        self.tokens
            .iter()
            .map(|(symbol, entry)| RegisteredToken {
                symbol: symbol.clone(),
                address: entry.address,
                decimals: entry.decimals,
            })
            .collect()
    }
}

/// Partial update of the `contracts` sub-map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractsUpdate {
    pub name: String,
    pub entry: ContractEntry,
}

impl ContractsUpdate {
    pub fn new(name: impl Into<String>, address: Address, deployed: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            entry: ContractEntry { address, deployed },
        }
    }
}

/// File-backed config store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current state. A missing file reads as an empty state.
    pub fn read(&self) -> Result<ConfigState> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "Config store not found, using empty state");
            return Ok(ConfigState::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config store {}", self.path.display()))?;
        let state: ConfigState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config store {}", self.path.display()))?;

        tracing::debug!(
            path = %self.path.display(),
            contracts = state.contracts.len(),
            tokens = state.tokens.len(),
            "Config store loaded"
        );
        Ok(state)
    }

    /// Read-modify-write: merge one `contracts` entry into the persisted state.
    ///
    /// Everything else in the document (tokens, other contracts, unknown keys) is
    /// written back unchanged. The last write for a name wins.
    pub fn write(&self, update: ContractsUpdate) -> Result<ConfigState> {
        let mut state = self.read()?;

        if let Some(previous) = state.contracts.get(&update.name) {
            tracing::info!(
                name = %update.name,
                previous = %previous.address,
                address = %update.entry.address,
                "Replacing active contract address"
            );
        }
        state.contracts.insert(update.name, update.entry);

        self.save(&state)?;
        Ok(state)
    }

    fn save(&self, state: &ConfigState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(state).context("Failed to serialize config store")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write config store {}", self.path.display()))?;

        tracing::info!(path = %self.path.display(), "Config store saved");
        Ok(())
    }
}
