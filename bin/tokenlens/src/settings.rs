//! Runtime settings, layered from defaults, a TOML file and `TOKENLENS_*` environment variables.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::{Address, address};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tokenlens_deploy::{
    CONFIG_STORE_FILENAME, ConfigStore, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_CONFIRMATIONS,
    DEFAULT_POLL_INTERVAL, NetworkContext, eth_to_wei,
};
use url::Url;

/// Default settings file name.
pub const SETTINGS_FILENAME: &str = "Tokenlens.toml";

/// Prefix of the environment variables that override settings.
pub const ENV_PREFIX: &str = "TOKENLENS_";

/// First account of a default anvil/hardhat node.
const DEFAULT_DEPLOYER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Network identifier, used in record file names.
    pub network: String,
    pub rpc_url: Url,
    /// Signing account. The node must hold its key.
    pub deployer: Address,
    pub confirmations: u64,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Deployer balance (in native units) under which a warning is emitted.
    pub min_balance: f64,
    /// Directory holding the config store and the deployment records.
    pub data_dir: PathBuf,
    /// Logical name of the inspector contract in the config store.
    pub contract_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            network: "local".to_string(),
            rpc_url: Url::parse("http://localhost:8545").expect("valid default RPC URL"),
            deployer: DEFAULT_DEPLOYER,
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT.as_secs(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            min_balance: 0.1,
            data_dir: PathBuf::from("deployments"),
            contract_name: "TokenInspector".to_string(),
            artifact: None,
        }
    }
}

impl Settings {
    /// Load the settings.
    ///
    /// An explicit `path` must exist. Without one, `./Tokenlens.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.exists() => {
                anyhow::bail!("Settings file not found: {}", path.display())
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(SETTINGS_FILENAME),
        };

        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .with_context(|| format!("Failed to load settings (file: {})", file.display()))?;
        settings.validate()?;

        tracing::debug!(
            path = %file.display(),
            network = %settings.network,
            rpc_url = %settings.rpc_url,
            "Settings loaded"
        );
        Ok(settings)
    }

    /// The network name is used as a directory and file name component.
    fn validate(&self) -> Result<()> {
        let valid = !self.network.is_empty()
            && self
                .network
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!(
                "Invalid network name '{}': use letters, digits, '-' or '_'",
                self.network
            );
        }
        Ok(())
    }

    /// Write the settings as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    pub fn network_context(&self) -> NetworkContext {
        let mut ctx = NetworkContext::new(&self.network, self.rpc_url.clone(), self.deployer);
        ctx.confirmations = self.confirmations;
        ctx.confirmation_timeout = Duration::from_secs(self.confirmation_timeout_secs);
        ctx.poll_interval = Duration::from_secs(self.poll_interval_secs);
        ctx.min_balance_wei = eth_to_wei(self.min_balance);
        ctx
    }

    /// Per-network directory, so two networks never share a config store.
    pub fn network_dir(&self) -> PathBuf {
        self.data_dir.join(&self.network)
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(self.network_dir().join(CONFIG_STORE_FILENAME))
    }

    pub fn records_dir(&self) -> PathBuf {
        self.network_dir()
    }
}
