//! Deployment controller: turns a compiled artifact into a confirmed, verified and
//! recorded on-chain instance.
//!
//! Stages run strictly in order:
//!
//! `ESTIMATING -> SUBMITTING -> AWAITING_CONFIRMATION -> VERIFYING -> PERSISTING -> DONE`
//!
//! Failures up to and including the confirmation wait abort the run with a
//! [`DeployError`]. Once the instance is confirmed it is live and irreversible, so
//! verification and persistence problems are reported as [`Diagnostic`]s instead.

use std::{fmt, path::PathBuf, time::Duration};

use alloy_core::primitives::{Address, B256, U256};
use chrono::Utc;

use crate::{
    artifact::Artifact,
    config_store::{ConfigStore, ContractsUpdate},
    contract::InspectorApi,
    network::{DeployBackend, Inclusion, NetworkContext},
    record::DeploymentRecord,
    units::{NATIVE_DECIMALS, format_units},
};

/// Safety margin added on top of the gas estimate.
pub const GAS_BUFFER_PERCENT: u64 = 20;

/// Stages of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployStage {
    Estimating,
    Submitting,
    AwaitingConfirmation,
    Verifying,
    Persisting,
    Done,
}

/// Fatal deployment failures.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("gas estimation failed: {0:#}")]
    Estimation(anyhow::Error),

    #[error("deployment submission rejected: {0:#}")]
    Submission(anyhow::Error),

    /// The transaction may still confirm later; re-check `tx_hash` before redeploying.
    #[error(
        "deployment {tx_hash} did not reach {confirmations} confirmations within {timeout:?}"
    )]
    ConfirmationTimeout {
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    },

    #[error("failed to confirm deployment {tx_hash}: {cause:#}")]
    Confirmation { tx_hash: B256, cause: anyhow::Error },

    #[error("deployment {tx_hash} reverted or created no contract")]
    Reverted { tx_hash: B256 },
}

impl DeployError {
    /// Stage the run was in when it failed.
    pub fn stage(&self) -> DeployStage {
        match self {
            DeployError::InvalidArtifact(_) | DeployError::Estimation(_) => DeployStage::Estimating,
            DeployError::Submission(_) => DeployStage::Submitting,
            DeployError::ConfirmationTimeout { .. }
            | DeployError::Confirmation { .. }
            | DeployError::Reverted { .. } => DeployStage::AwaitingConfirmation,
        }
    }

    /// Whether the failure may clear up by waiting and re-checking the submission.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DeployError::ConfirmationTimeout { .. })
    }

    /// Submitted transaction, for failures that happen after submission.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            DeployError::ConfirmationTimeout { tx_hash, .. }
            | DeployError::Confirmation { tx_hash, .. }
            | DeployError::Reverted { tx_hash } => Some(*tx_hash),
            _ => None,
        }
    }
}

/// Non-fatal problems observed during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Signer balance below the configured minimum; the deployment went ahead anyway.
    LowBalance { balance_wei: U256, minimum_wei: U256 },
    /// Signer balance could not be read.
    BalanceUnavailable(String),
    /// The deployed instance did not answer as expected.
    VerificationWarning(String),
    /// The record or the config store could not be written.
    PersistenceError(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::LowBalance {
                balance_wei,
                minimum_wei,
            } => write!(
                f,
                "low signer balance: {} (minimum {})",
                format_units(*balance_wei, NATIVE_DECIMALS),
                format_units(*minimum_wei, NATIVE_DECIMALS)
            ),
            Diagnostic::BalanceUnavailable(reason) => {
                write!(f, "signer balance unavailable: {}", reason)
            }
            Diagnostic::VerificationWarning(reason) => write!(f, "verification: {}", reason),
            Diagnostic::PersistenceError(reason) => write!(f, "persistence: {}", reason),
        }
    }
}

/// Result of a run that reached DONE.
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    pub record: DeploymentRecord,
    /// Where the record was written, `None` if writing it failed.
    pub record_path: Option<PathBuf>,
    /// Whether the config store now points at the new instance.
    pub config_updated: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl DeploymentOutcome {
    pub fn address(&self) -> Address {
        self.record.address
    }

    /// Gas cost of the deployment, in wei.
    pub fn total_cost_wei(&self) -> U256 {
        self.record.total_cost_wei
    }
}

/// Gas limit for a submission: the estimate plus [`GAS_BUFFER_PERCENT`].
pub fn buffered_gas_limit(estimate: u64) -> u64 {
    let limit = u128::from(estimate) * u128::from(100 + GAS_BUFFER_PERCENT) / 100;
    u64::try_from(limit).unwrap_or(u64::MAX)
}

/// Orchestrates one deployment against a [`DeployBackend`].
pub struct DeploymentController<B> {
    backend: B,
    network: NetworkContext,
    store: ConfigStore,
    records_dir: PathBuf,
}

impl<B: DeployBackend> DeploymentController<B> {
    pub fn new(
        backend: B,
        network: NetworkContext,
        store: ConfigStore,
        records_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            network,
            store,
            records_dir: records_dir.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Deploy `artifact` and record the result.
    ///
    /// Returns an error only if the run fails before the instance is confirmed.
    pub async fn deploy(&self, artifact: &Artifact) -> Result<DeploymentOutcome, DeployError> {
        let mut diagnostics = Vec::new();

        tracing::info!(
            network = %self.network.name,
            artifact = %artifact.name,
            version = %artifact.version,
            deployer = %self.network.deployer,
            "Starting deployment..."
        );

        self.enter(DeployStage::Estimating);
        if artifact.bytecode.is_empty() {
            return Err(DeployError::InvalidArtifact(format!(
                "{} has no bytecode",
                artifact.name
            )));
        }
        let estimate = self
            .backend
            .estimate_deploy(&artifact.bytecode)
            .await
            .map_err(DeployError::Estimation)?;
        let gas_price = self
            .backend
            .gas_price()
            .await
            .map_err(DeployError::Estimation)?;
        let gas_limit = buffered_gas_limit(estimate);
        tracing::info!(
            estimate,
            gas_limit,
            gas_price = %gas_price,
            max_cost = %format_units(U256::from(gas_limit) * gas_price, NATIVE_DECIMALS),
            "Gas estimated"
        );

        self.enter(DeployStage::Submitting);
        self.check_balance(&mut diagnostics).await;
        let tx_hash = self
            .backend
            .deploy(&artifact.bytecode, gas_limit)
            .await
            .map_err(DeployError::Submission)?;
        tracing::info!(tx_hash = %tx_hash, "Deployment transaction submitted");

        self.enter(DeployStage::AwaitingConfirmation);
        let inclusion = self.await_confirmation(tx_hash).await?;
        let address = inclusion
            .contract_address
            .filter(|_| inclusion.success)
            .ok_or(DeployError::Reverted { tx_hash })?;
        tracing::info!(
            address = %address,
            block_number = inclusion.block_number,
            confirmations = inclusion.confirmations,
            "Deployment confirmed"
        );

        self.enter(DeployStage::Verifying);
        let verified = self.verify(address, artifact, &mut diagnostics).await;

        self.enter(DeployStage::Persisting);
        let record = self.build_record(address, artifact, &inclusion, gas_price, verified);
        let record_path = match record.save_to_dir(&self.records_dir) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "Failed to write deployment record");
                diagnostics.push(Diagnostic::PersistenceError(format!(
                    "deployment record not written: {err:#}"
                )));
                None
            }
        };
        let update = ContractsUpdate::new(&artifact.name, address, record.deployed_at);
        let config_updated = match self.store.write(update) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    path = %self.store.path().display(),
                    "Failed to update config store; run `reconcile --repair` to fix"
                );
                diagnostics.push(Diagnostic::PersistenceError(format!(
                    "config store not updated: {err:#}"
                )));
                false
            }
        };

        self.enter(DeployStage::Done);
        tracing::info!(
            address = %address,
            cost = %format_units(record.total_cost_wei, NATIVE_DECIMALS),
            warnings = diagnostics.len(),
            "Deployment complete"
        );

        Ok(DeploymentOutcome {
            record,
            record_path,
            config_updated,
            diagnostics,
        })
    }

    fn enter(&self, stage: DeployStage) {
        tracing::info!(stage = %stage, network = %self.network.name, "Deployment stage");
    }

    async fn check_balance(&self, diagnostics: &mut Vec<Diagnostic>) {
        match self.backend.signer_balance().await {
            Ok(balance) if balance < self.network.min_balance_wei => {
                tracing::warn!(
                    deployer = %self.network.deployer,
                    balance = %format_units(balance, NATIVE_DECIMALS),
                    minimum = %format_units(self.network.min_balance_wei, NATIVE_DECIMALS),
                    "Low deployer balance, continuing anyway"
                );
                diagnostics.push(Diagnostic::LowBalance {
                    balance_wei: balance,
                    minimum_wei: self.network.min_balance_wei,
                });
            }
            Ok(balance) => {
                tracing::debug!(balance = %format_units(balance, NATIVE_DECIMALS), "Deployer balance");
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "Failed to read deployer balance");
                diagnostics.push(Diagnostic::BalanceUnavailable(format!("{err:#}")));
            }
        }
    }

    async fn await_confirmation(&self, tx_hash: B256) -> Result<Inclusion, DeployError> {
        let required = self.network.confirmations;
        let timeout = self.network.confirmation_timeout;

        let inclusion = tokio::time::timeout(
            timeout,
            self.backend.wait_confirmations(tx_hash, required),
        )
        .await
        .map_err(|_| DeployError::ConfirmationTimeout {
            tx_hash,
            confirmations: required,
            timeout,
        })?
        .map_err(|cause| DeployError::Confirmation { tx_hash, cause })?;

        if inclusion.confirmations < required {
            return Err(DeployError::Confirmation {
                tx_hash,
                cause: anyhow::anyhow!(
                    "backend returned after {} of {} confirmations",
                    inclusion.confirmations,
                    required
                ),
            });
        }

        Ok(inclusion)
    }

    async fn verify(
        &self,
        address: Address,
        artifact: &Artifact,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> bool {
        let reader = self.backend.reader(address);

        let problem = match reader.get_contract_info().await {
            Ok(info) if info.version != artifact.version => Some(format!(
                "instance reports version {}, expected {}",
                info.version, artifact.version
            )),
            Ok(info) if info.paused => Some("instance is paused".to_string()),
            Ok(info) => {
                tracing::info!(address = %address, version = %info.version, "Deployment verified");
                None
            }
            Err(err) => Some(format!("getContractInfo failed: {err:#}")),
        };

        match problem {
            None => true,
            Some(reason) => {
                tracing::warn!(address = %address, reason = %reason, "Deployment verification failed; the instance stays deployed");
                diagnostics.push(Diagnostic::VerificationWarning(reason));
                false
            }
        }
    }

    fn build_record(
        &self,
        address: Address,
        artifact: &Artifact,
        inclusion: &Inclusion,
        estimated_gas_price: U256,
        verified: bool,
    ) -> DeploymentRecord {
        let gas_price_wei = inclusion
            .effective_gas_price
            .unwrap_or(estimated_gas_price);

        DeploymentRecord {
            network: self.network.name.clone(),
            address,
            deployer: self.network.deployer,
            tx_hash: inclusion.tx_hash,
            block_number: inclusion.block_number,
            confirmations: inclusion.confirmations,
            gas_used: inclusion.gas_used,
            gas_price_wei,
            total_cost_wei: U256::from(inclusion.gas_used) * gas_price_wei,
            deployed_at: Utc::now(),
            artifact_name: artifact.name.clone(),
            artifact_version: artifact.version.clone(),
            bytecode_hash: artifact.bytecode_hash(),
            verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::Bytes;
    use tempdir::TempDir;
    use url::Url;

    use super::*;
    use crate::testing::{Confirmation, FakeChain, FakeInspector, INSTANCE, TX_HASH};

    struct Fixture {
        _temp_dir: TempDir,
        store: ConfigStore,
        records_dir: PathBuf,
        network: NetworkContext,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new("tokenlens-test").expect("Failed to create temp dir");
            let store = ConfigStore::new(temp_dir.path().join("config.json"));
            let records_dir = temp_dir.path().join("deployments");
            let network = NetworkContext::new(
                "local",
                Url::parse("http://localhost:8545").unwrap(),
                Address::with_last_byte(0xde),
            );

            Self {
                _temp_dir: temp_dir,
                store,
                records_dir,
                network,
            }
        }

        fn controller(&self, chain: FakeChain) -> DeploymentController<FakeChain> {
            DeploymentController::new(
                chain,
                self.network.clone(),
                self.store.clone(),
                &self.records_dir,
            )
        }

        fn records(&self) -> Vec<DeploymentRecord> {
            DeploymentRecord::load_all(&self.records_dir).unwrap()
        }
    }

    fn artifact() -> Artifact {
        Artifact::new(
            "TokenInspector",
            "1.0.0",
            Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
        )
    }

    #[test]
    fn test_gas_buffer() {
        assert_eq!(buffered_gas_limit(100_000), 120_000);
        assert_eq!(buffered_gas_limit(21_001), 25_201);
        assert_eq!(buffered_gas_limit(0), 0);
        assert_eq!(buffered_gas_limit(u64::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_successful_deployment() {
        let fixture = Fixture::new();
        let controller = fixture.controller(FakeChain::confirming());

        let outcome = controller.deploy(&artifact()).await.unwrap();

        assert_eq!(outcome.address(), INSTANCE);
        assert!(outcome.record.confirmations >= 2);
        assert!(outcome.record.verified);
        assert!(outcome.config_updated);
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(controller.backend().submitted_gas_limit(), Some(600_000));
        // 450_000 gas at the effective price of 1 gwei
        assert_eq!(
            outcome.total_cost_wei(),
            U256::from(450_000_000_000_000u64)
        );

        let state = fixture.store.read().unwrap();
        assert_eq!(state.contract_address("TokenInspector"), Some(INSTANCE));
        let records = fixture.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], outcome.record);
        assert_eq!(records[0].tx_hash, TX_HASH);
    }

    #[tokio::test]
    async fn test_estimation_failure_produces_no_record() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.estimate = Err("connection refused".to_string());
        let controller = fixture.controller(chain);

        let err = controller.deploy(&artifact()).await.unwrap_err();

        assert!(matches!(err, DeployError::Estimation(_)));
        assert_eq!(err.stage(), DeployStage::Estimating);
        assert_eq!(controller.backend().submitted_gas_limit(), None);
        assert!(fixture.records().is_empty());
        assert!(fixture.store.read().unwrap().contracts.is_empty());
    }

    #[tokio::test]
    async fn test_submission_rejected() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.submit = Err("insufficient funds for gas * price + value".to_string());
        let controller = fixture.controller(chain);

        let err = controller.deploy(&artifact()).await.unwrap_err();

        assert!(matches!(err, DeployError::Submission(_)));
        assert!(err.to_string().contains("insufficient funds"));
        assert!(fixture.records().is_empty());
    }

    #[tokio::test]
    async fn test_low_balance_is_only_a_warning() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.balance = Ok(crate::units::eth_to_wei(0.05));
        let controller = fixture.controller(chain);

        let outcome = controller.deploy(&artifact()).await.unwrap();

        assert_eq!(outcome.address(), INSTANCE);
        assert_eq!(
            outcome.diagnostics,
            vec![Diagnostic::LowBalance {
                balance_wei: crate::units::eth_to_wei(0.05),
                minimum_wei: crate::units::eth_to_wei(0.1),
            }]
        );
        assert_eq!(fixture.records().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_is_retriable() {
        let mut fixture = Fixture::new();
        fixture.network.confirmation_timeout = Duration::from_millis(20);
        let mut chain = FakeChain::confirming();
        chain.confirmation = Confirmation::Pending;
        let controller = fixture.controller(chain);

        let err = controller.deploy(&artifact()).await.unwrap_err();

        assert!(matches!(err, DeployError::ConfirmationTimeout { .. }));
        assert!(err.is_retriable());
        assert_eq!(err.tx_hash(), Some(TX_HASH));
        assert!(fixture.records().is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_error() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.confirmation = Confirmation::Error("node went away".to_string());
        let controller = fixture.controller(chain);

        let err = controller.deploy(&artifact()).await.unwrap_err();
        assert!(matches!(err, DeployError::Confirmation { .. }));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_shallow_confirmation_is_rejected() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.inclusion_mut().confirmations = 1;
        let controller = fixture.controller(chain);

        let err = controller.deploy(&artifact()).await.unwrap_err();
        assert!(matches!(err, DeployError::Confirmation { .. }));
        assert!(fixture.records().is_empty());
    }

    #[tokio::test]
    async fn test_reverted_deployment() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.inclusion_mut().success = false;
        let controller = fixture.controller(chain);

        let err = controller.deploy(&artifact()).await.unwrap_err();
        assert!(matches!(err, DeployError::Reverted { tx_hash } if tx_hash == TX_HASH));
        assert!(fixture.records().is_empty());
    }

    #[tokio::test]
    async fn test_verification_failure_keeps_deployment() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.inspector = FakeInspector::healthy().version("0.9.0");
        let controller = fixture.controller(chain);

        let outcome = controller.deploy(&artifact()).await.unwrap();

        assert!(!outcome.record.verified);
        assert!(matches!(
            outcome.diagnostics.as_slice(),
            [Diagnostic::VerificationWarning(reason)] if reason.contains("0.9.0")
        ));
        assert!(outcome.config_updated);
        assert_eq!(fixture.records().len(), 1);
    }

    #[tokio::test]
    async fn test_unresponsive_instance_is_a_warning() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.inspector = FakeInspector::healthy().failing("getContractInfo");
        let controller = fixture.controller(chain);

        let outcome = controller.deploy(&artifact()).await.unwrap();
        assert!(!outcome.record.verified);
        assert_eq!(outcome.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_config_write_failure_keeps_record() {
        let fixture = Fixture::new();
        // A directory where the config file should be makes the write fail.
        std::fs::create_dir_all(fixture.store.path()).unwrap();
        let controller = fixture.controller(FakeChain::confirming());

        let outcome = controller.deploy(&artifact()).await.unwrap();

        assert!(!outcome.config_updated);
        assert!(outcome.record_path.is_some());
        assert!(matches!(
            outcome.diagnostics.as_slice(),
            [Diagnostic::PersistenceError(_)]
        ));
        assert_eq!(fixture.records().len(), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_deployments_each_get_a_record() {
        let fixture = Fixture::new();
        let controller = fixture.controller(FakeChain::confirming());

        let first = controller.deploy(&artifact()).await.unwrap();
        let second = controller.deploy(&artifact()).await.unwrap();

        assert!(first.diagnostics.is_empty());
        assert!(second.diagnostics.is_empty(), "{:?}", second.diagnostics);
        assert!(second.record_path.is_some());
        assert_ne!(first.record.tx_hash, second.record.tx_hash);

        let records = fixture.records();
        assert_eq!(records.len(), 2);
        assert!(records.contains(&first.record));
        assert!(records.contains(&second.record));
    }

    #[tokio::test]
    async fn test_fallback_to_estimated_gas_price() {
        let fixture = Fixture::new();
        let mut chain = FakeChain::confirming();
        chain.inclusion_mut().effective_gas_price = None;
        let controller = fixture.controller(chain);

        let outcome = controller.deploy(&artifact()).await.unwrap();
        assert_eq!(outcome.record.gas_price_wei, U256::from(2_000_000_000u64));
        assert_eq!(
            outcome.total_cost_wei(),
            U256::from(900_000_000_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_empty_bytecode_is_rejected_before_estimation() {
        let fixture = Fixture::new();
        let controller = fixture.controller(FakeChain::confirming());
        let artifact = Artifact::new("Empty", "1.0.0", Bytes::new());

        let err = controller.deploy(&artifact).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidArtifact(_)));
    }
}
