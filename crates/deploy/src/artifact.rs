//! Compiled contract artifacts.

use std::path::Path;

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Version tag assumed when an artifact does not carry one.
pub const DEFAULT_ARTIFACT_VERSION: &str = "1.0.0";

/// A compiled contract ready to be deployed.
///
/// Only constructor-less contracts are supported: the creation bytecode is sent as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Contract name. Also used as the logical name in the config store.
    pub name: String,
    /// Version tag the deployed instance is expected to report.
    pub version: String,
    /// Creation bytecode.
    pub bytecode: Bytes,
}

/// Loose view over the artifact formats emitted by Hardhat and Foundry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: Option<String>,
    version: Option<String>,
    bytecode: Value,
}

impl Artifact {
    pub fn new(name: impl Into<String>, version: impl Into<String>, bytecode: Bytes) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            bytecode,
        }
    }

    /// Load an artifact from a JSON file.
    ///
    /// Accepts Hardhat (`bytecode: "0x..."`) and Foundry (`bytecode: { object: "0x..." }`)
    /// layouts. When the file has no `contractName`, the file stem is used.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact from {}", path.display()))?;
        let file: ArtifactFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        let name = match file.contract_name {
            Some(name) => name,
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .context("Artifact path has no file name")?,
        };

        let raw = match &file.bytecode {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => obj
                .get("object")
                .and_then(Value::as_str)
                .context("Artifact bytecode object has no `object` field")?,
            _ => anyhow::bail!("Artifact bytecode must be a hex string or an object"),
        };

        let artifact = Self {
            name,
            version: file
                .version
                .unwrap_or_else(|| DEFAULT_ARTIFACT_VERSION.to_string()),
            bytecode: parse_bytecode(raw)?,
        };

        tracing::info!(
            path = %path.display(),
            name = %artifact.name,
            version = %artifact.version,
            size = artifact.bytecode.len(),
            "Artifact loaded"
        );

        Ok(artifact)
    }

    /// Hex-encoded SHA-256 of the creation bytecode.
    pub fn bytecode_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytecode);
        hex::encode(hasher.finalize())
    }
}

fn parse_bytecode(raw: &str) -> Result<Bytes> {
    let stripped = raw.trim().trim_start_matches("0x");
    if stripped.is_empty() {
        anyhow::bail!("Artifact has empty bytecode (abstract contract or interface?)");
    }
    if stripped.contains("__") {
        anyhow::bail!("Artifact bytecode has unlinked library placeholders");
    }

    let bytes = hex::decode(stripped).context("Artifact bytecode is not valid hex")?;
    Ok(Bytes::from(bytes))
}
