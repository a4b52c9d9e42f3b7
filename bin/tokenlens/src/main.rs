//! tokenlens is a CLI tool to deploy a token inspector contract and query it in batches.

mod cli;
mod settings;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Cell, Table, presets::UTF8_FULL};

use cli::{Cli, Command, QuerySelection};
use settings::{SETTINGS_FILENAME, Settings};
use tokenlens_deploy::{
    Artifact, DeploymentController, DeploymentOutcome, DeploymentRecord, JsonRpcBackend,
    NATIVE_DECIMALS, QueryClient, format_units, reconcile, repair,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let settings = || Settings::load(cli.config.as_deref());

    match cli.command {
        Command::Init { force } => {
            let path = cli
                .config
                .as_deref()
                .unwrap_or_else(|| Path::new(SETTINGS_FILENAME));
            init(path, force)
        }
        Command::Deploy {
            artifact,
            artifact_version,
        } => deploy(&settings()?, artifact, artifact_version).await,
        Command::Query {
            selection,
            self_test_token,
        } => query(&settings()?, selection, self_test_token).await,
        Command::Reconcile { repair } => reconcile_store(&settings()?, repair),
        Command::History => history(&settings()?),
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    Settings::default().save_to_file(path)?;
    println!("Default settings written to {}", path.display());
    Ok(())
}

async fn deploy(
    settings: &Settings,
    artifact: Option<PathBuf>,
    artifact_version: Option<String>,
) -> Result<()> {
    let artifact_path = artifact
        .or_else(|| settings.artifact.clone())
        .context("No artifact given: pass --artifact or set `artifact` in the settings")?;
    let mut artifact = Artifact::load_from_file(&artifact_path)?;
    if let Some(version) = artifact_version {
        artifact.version = version;
    }

    warn_orphaned(settings);

    let network = settings.network_context();
    let backend = JsonRpcBackend::new(&network)?;
    let chain_id = backend.chain_id().await?;
    tracing::info!(
        network = %network.name,
        chain_id,
        rpc_url = %network.rpc_url,
        "Connected to network"
    );

    let controller = DeploymentController::new(
        backend,
        network,
        settings.config_store(),
        settings.records_dir(),
    );

    match controller.deploy(&artifact).await {
        Ok(outcome) => {
            println!("{}", deployment_table(&outcome));
            for diagnostic in &outcome.diagnostics {
                println!("warning: {}", diagnostic);
            }
            Ok(())
        }
        Err(err) => {
            if let Some(tx_hash) = err.tx_hash() {
                tracing::error!(
                    stage = %err.stage(),
                    tx_hash = %tx_hash,
                    retriable = err.is_retriable(),
                    "Deployment failed after submission; check the transaction before redeploying"
                );
            }
            Err(err.into())
        }
    }
}

async fn query(
    settings: &Settings,
    selection: QuerySelection,
    self_test_token: Option<alloy_core::primitives::Address>,
) -> Result<()> {
    warn_orphaned(settings);

    let store = settings.config_store();
    let state = store.read()?;
    let backend = JsonRpcBackend::new(&settings.network_context())?;

    let mut client = QueryClient::for_deployment(&backend, &state, &settings.contract_name)?;
    if let Some(token) = self_test_token {
        client = client.with_self_test_token(token);
    }

    let report = client.run(&selection.groups()).await;
    println!("{}", report);

    if !report.all_succeeded() {
        tracing::warn!(failed = ?report.failed_groups(), "Some query groups failed");
    }
    Ok(())
}

fn reconcile_store(settings: &Settings, apply: bool) -> Result<()> {
    let store = settings.config_store();
    let records = network_records(settings)?;
    let report = reconcile(&records, &store.read()?);

    print!("{}", report);
    if apply && !report.is_consistent() {
        let repaired = repair(&store, &report)?;
        println!("Repaired {} config entr{}", repaired, if repaired == 1 { "y" } else { "ies" });
    }
    Ok(())
}

fn history(settings: &Settings) -> Result<()> {
    let records = network_records(settings)?;
    if records.is_empty() {
        println!("No deployments recorded for {}", settings.network);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Deployed at",
        "Artifact",
        "Version",
        "Address",
        "Block",
        "Cost",
        "Verified",
    ]);
    for record in &records {
        table.add_row(vec![
            Cell::new(record.deployed_at.to_rfc3339()),
            Cell::new(&record.artifact_name),
            Cell::new(&record.artifact_version),
            Cell::new(record.address),
            Cell::new(record.block_number),
            Cell::new(format_units(record.total_cost_wei, NATIVE_DECIMALS)),
            Cell::new(if record.verified { "yes" } else { "no" }),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn network_records(settings: &Settings) -> Result<Vec<DeploymentRecord>> {
    let records = DeploymentRecord::load_all(&settings.records_dir())?;
    Ok(records
        .into_iter()
        .filter(|record| record.network == settings.network)
        .collect())
}

/// Startup consistency check. Never fails the command.
fn warn_orphaned(settings: &Settings) {
    let check = || -> Result<usize> {
        let records = network_records(settings)?;
        let state = settings.config_store().read()?;
        Ok(reconcile(&records, &state).orphaned.len())
    };

    match check() {
        Ok(0) => {}
        Ok(orphaned) => tracing::warn!(
            orphaned,
            "Config store is behind the deployment history; run `tokenlens reconcile --repair`"
        ),
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "Consistency check skipped"),
    }
}

fn deployment_table(outcome: &DeploymentOutcome) -> Table {
    let record = &outcome.record;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Deployment", ""]);
    table.add_row(vec![Cell::new("Network"), Cell::new(&record.network)]);
    table.add_row(vec![
        Cell::new("Contract"),
        Cell::new(format!("{} {}", record.artifact_name, record.artifact_version)),
    ]);
    table.add_row(vec![Cell::new("Address"), Cell::new(record.address)]);
    table.add_row(vec![Cell::new("Transaction"), Cell::new(record.tx_hash)]);
    table.add_row(vec![
        Cell::new("Block"),
        Cell::new(format!(
            "{} ({} confirmations)",
            record.block_number, record.confirmations
        )),
    ]);
    table.add_row(vec![Cell::new("Gas used"), Cell::new(record.gas_used)]);
    table.add_row(vec![
        Cell::new("Cost"),
        Cell::new(format_units(record.total_cost_wei, NATIVE_DECIMALS)),
    ]);
    table.add_row(vec![
        Cell::new("Verified"),
        Cell::new(if record.verified { "yes" } else { "no" }),
    ]);
    table.add_row(vec![
        Cell::new("Record"),
        Cell::new(
            outcome
                .record_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "not written".to_string()),
        ),
    ]);
    table.add_row(vec![
        Cell::new("Config store"),
        Cell::new(if outcome.config_updated { "updated" } else { "not updated" }),
    ]);
    table
}
