use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Parser, Subcommand};
use tokenlens_deploy::QueryGroup;
use tracing::level_filters::LevelFilter;

/// Which query groups to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum QuerySelection {
    /// Contract metadata and token metadata.
    Info,
    Balances,
    /// Registry validation, including the invalid sentinel.
    Validate,
    /// Self-test against a known token.
    Test,
    All,
}

impl QuerySelection {
    pub fn groups(&self) -> Vec<QueryGroup> {
        match self {
            QuerySelection::Info => vec![QueryGroup::ContractInfo, QueryGroup::TokenInfo],
            QuerySelection::Balances => vec![QueryGroup::Balances],
            QuerySelection::Validate => vec![QueryGroup::Validation],
            QuerySelection::Test => vec![QueryGroup::SelfTest],
            QuerySelection::All => QueryGroup::ALL.to_vec(),
        }
    }
}

#[derive(Parser)]
#[command(name = "tokenlens")]
#[command(
    author,
    version,
    about = "Deploy a token inspector contract and query it in fault-isolated batches"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "TOKENLENS_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to a Tokenlens.toml settings file.
    ///
    /// If not provided, ./Tokenlens.toml is used when it exists.
    #[arg(long, alias = "conf", env = "TOKENLENS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy the inspector contract and record the deployment.
    Deploy {
        /// Compiled artifact (Hardhat or Foundry JSON). Overrides the `artifact` setting.
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Version tag the deployed instance must report. Overrides the artifact's own.
        #[arg(long)]
        artifact_version: Option<String>,
    },

    /// Run grouped read queries against the active deployment.
    Query {
        #[arg(default_value_t = QuerySelection::All)]
        selection: QuerySelection,

        /// Known-good token for the self-test. Defaults to the first registered token.
        #[arg(long)]
        self_test_token: Option<Address>,
    },

    /// Compare the deployment history with the config store.
    Reconcile {
        /// Write the latest orphaned deployments into the config store.
        #[arg(long)]
        repair: bool,
    },

    /// List every recorded deployment.
    History,

    /// Write the default settings to Tokenlens.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}
