//! Consistency check between the deployment history and the config store.
//!
//! The record and the config store are written one after the other without a
//! transaction. A crash or a failed write in between leaves a record whose address
//! never made it into the store. Those records are reported as orphaned.

use std::{collections::BTreeMap, fmt};

use anyhow::Result;

use crate::{
    config_store::{ConfigState, ConfigStore, ContractsUpdate},
    record::DeploymentRecord,
};

/// Records that are newer than what the config store points at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Latest record per artifact name that the store does not reflect, in name order.
    pub orphaned: Vec<DeploymentRecord>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.orphaned.is_empty()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.orphaned.is_empty() {
            return writeln!(f, "Config store is consistent with the deployment history");
        }

        writeln!(f, "{} orphaned deployment record(s):", self.orphaned.len())?;
        for record in &self.orphaned {
            writeln!(
                f,
                "  {} on {}: {} ({})",
                record.artifact_name,
                record.network,
                record.address,
                record.file_name()
            )?;
        }
        Ok(())
    }
}

/// Compare `records` of one network against `state`.
///
/// Only the most recent record of each artifact is considered. It is orphaned when the
/// store has no entry for the artifact, or has a different address recorded before
/// the record was made.
pub fn reconcile(records: &[DeploymentRecord], state: &ConfigState) -> ReconcileReport {
    let mut latest: BTreeMap<&str, &DeploymentRecord> = BTreeMap::new();
    for record in records {
        latest
            .entry(record.artifact_name.as_str())
            .and_modify(|current| {
                if record.deployed_at >= current.deployed_at {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    let orphaned = latest
        .into_values()
        .filter(|record| match state.contracts.get(&record.artifact_name) {
            None => true,
            Some(entry) => entry.address != record.address && entry.deployed < record.deployed_at,
        })
        .cloned()
        .collect::<Vec<_>>();

    for record in &orphaned {
        tracing::warn!(
            name = %record.artifact_name,
            address = %record.address,
            network = %record.network,
            "Deployment record is not reflected in the config store"
        );
    }

    ReconcileReport { orphaned }
}

/// Point the store at every orphaned record. Returns the number of entries written.
pub fn repair(store: &ConfigStore, report: &ReconcileReport) -> Result<usize> {
    for record in &report.orphaned {
        store.write(ContractsUpdate::new(
            &record.artifact_name,
            record.address,
            record.deployed_at,
        ))?;
        tracing::info!(
            name = %record.artifact_name,
            address = %record.address,
            "Config store repaired from deployment record"
        );
    }
    Ok(report.orphaned.len())
}
