//! tokenlens-deploy - Deployment and inspection library for token-inspector contracts.
//!
//! This crate deploys a read-only token inspector contract to an EVM network, records
//! every deployment, keeps a config store pointing at the active instance, and runs
//! grouped batch queries against it.

mod artifact;
pub use artifact::{Artifact, DEFAULT_ARTIFACT_VERSION};

mod config_store;
pub use config_store::{
    CONFIG_STORE_FILENAME, ConfigState, ConfigStore, ContractEntry, ContractsUpdate,
    RegisteredToken, TokenEntry,
};

mod contract;
pub use contract::{
    ContractInfo, INVALID_TOKEN_SENTINEL, ITokenInspector, InspectorApi, InspectorContract,
    TokenDetails,
};

mod deployer;
pub use deployer::{
    DeployError, DeployStage, DeploymentController, DeploymentOutcome, Diagnostic,
    GAS_BUFFER_PERCENT, buffered_gas_limit,
};

mod network;
pub use network::{
    DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_CONFIRMATIONS, DEFAULT_MIN_BALANCE_WEI,
    DEFAULT_POLL_INTERVAL, DeployBackend, Inclusion, JsonRpcBackend, NetworkContext,
};

mod query;
pub use query::{
    ContractSummary, GroupStatus, NATIVE_LABEL, QueryClient, QueryGroup, QueryGroupError,
    QueryGroupResult, QueryItem, QueryReport, QueryValue,
};

mod reconcile;
pub use reconcile::{ReconcileReport, reconcile, repair};

mod record;
pub use record::{DeploymentRecord, RECORD_FILE_PREFIX};

pub mod rpc;

mod units;
pub use units::{NATIVE_DECIMALS, eth_to_wei, format_units};

#[cfg(test)]
mod testing;
