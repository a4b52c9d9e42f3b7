//! Append-only history of completed deployments.

use std::path::{Path, PathBuf};

use alloy_core::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name prefix of deployment records.
pub const RECORD_FILE_PREFIX: &str = "deployment-";

/// One completed deployment.
///
/// Written once per run under a time-stamped file name and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Network identifier the deployment was made on.
    pub network: String,
    /// Address of the deployed instance.
    pub address: Address,
    /// Account that sent the deployment transaction.
    pub deployer: Address,
    /// Hash of the deployment transaction.
    pub tx_hash: B256,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Confirmations observed before the record was created.
    pub confirmations: u64,
    /// Gas consumed by the deployment.
    pub gas_used: u64,
    /// Price paid per unit of gas.
    pub gas_price_wei: U256,
    /// `gas_used * gas_price_wei`.
    pub total_cost_wei: U256,
    pub deployed_at: DateTime<Utc>,
    pub artifact_name: String,
    pub artifact_version: String,
    /// SHA-256 of the creation bytecode.
    pub bytecode_hash: String,
    /// Whether the post-deployment check passed.
    pub verified: bool,
}

impl DeploymentRecord {
    /// File name of this record: `deployment-<network>-<timestamp>-<tx>.json`, where `<tx>`
    /// is the first 4 bytes of the transaction hash. Characters of the network name that
    /// are not alphanumeric, `-` or `_` are replaced with `_`.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}-{}-{}.json",
            RECORD_FILE_PREFIX,
            file_safe(&self.network),
            self.deployed_at.format("%Y%m%dT%H%M%SZ"),
            hex::encode(&self.tx_hash[..4])
        )
    }

    /// Save this record into `dir`, refusing to overwrite an existing record.
    pub fn save_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create records directory {}", dir.display()))?;

        let path = dir.join(self.file_name());
        if path.exists() {
            anyhow::bail!("Deployment record already exists: {}", path.display());
        }

        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment record")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write deployment record to {}", path.display()))?;

        tracing::info!(path = %path.display(), "Deployment record saved");
        Ok(path)
    }

    /// Load a record from a file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment record {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse deployment record {}", path.display()))
    }

    /// Load every record in `dir`, oldest first.
    ///
    /// A missing directory yields an empty history. Unreadable records are skipped with a warning.
    pub fn load_all(dir: &Path) -> Result<Vec<Self>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list records directory {}", dir.display()))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to list records directory {}", dir.display()))?
                .path();

            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(RECORD_FILE_PREFIX) && n.ends_with(".json"));
            if !is_record {
                continue;
            }

            match Self::load_from_file(&path) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "Skipping unreadable deployment record");
                }
            }
        }

        records.sort_by(|a, b| a.deployed_at.cmp(&b.deployed_at));
        Ok(records)
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
