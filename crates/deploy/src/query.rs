//! Batched, fault-isolated read client for a deployed inspector instance.
//!
//! Reads are organised in groups. Each group issues one or a few remote calls and
//! produces a [`QueryGroupResult`]; a failing group is logged and reported but never
//! prevents sibling groups from completing.

use std::{fmt, future::Future};

use alloy_core::primitives::{Address, U256};
use derive_more::Deref;
use futures::{FutureExt, future::LocalBoxFuture};

use crate::{
    config_store::{ConfigState, RegisteredToken},
    contract::{ContractInfo, INVALID_TOKEN_SENTINEL, InspectorApi, TokenDetails},
    network::DeployBackend,
    units::{NATIVE_DECIMALS, format_units},
};

/// Label of the native-currency entry in the balances group.
pub const NATIVE_LABEL: &str = "native";

/// A named group of related reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum QueryGroup {
    Balances,
    TokenInfo,
    Validation,
    ContractInfo,
    SelfTest,
}

impl QueryGroup {
    /// Every group, in reporting order.
    pub const ALL: [QueryGroup; 5] = [
        QueryGroup::ContractInfo,
        QueryGroup::TokenInfo,
        QueryGroup::Balances,
        QueryGroup::Validation,
        QueryGroup::SelfTest,
    ];
}

/// Failure of a whole query group.
#[derive(Debug, thiserror::Error)]
#[error("{group} query failed during {operation}: {cause:#}")]
pub struct QueryGroupError {
    pub group: QueryGroup,
    /// Remote operation that failed.
    pub operation: &'static str,
    pub cause: anyhow::Error,
}

impl QueryGroupError {
    pub fn new(group: QueryGroup, operation: &'static str, cause: anyhow::Error) -> Self {
        Self {
            group,
            operation,
            cause,
        }
    }
}

/// Deployed instance summary combining the metadata and owner reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSummary {
    pub address: Address,
    pub owner: Address,
    pub info: ContractInfo,
}

/// A successfully read value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Balance { amount: U256, decimals: u8 },
    Token(TokenDetails),
    Valid(bool),
    Contract(ContractSummary),
}

/// One entry of a group: a value or a failure marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryItem {
    pub label: String,
    pub result: Result<QueryValue, String>,
}

impl QueryItem {
    pub fn value(label: impl Into<String>, value: QueryValue) -> Self {
        Self {
            label: label.into(),
            result: Ok(value),
        }
    }

    pub fn failure(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            result: Err(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum GroupStatus {
    Succeeded,
    Failed,
}

/// Outcome of one group. Item order matches the order of the identifiers queried.
#[derive(Debug)]
pub struct QueryGroupResult {
    pub group: QueryGroup,
    pub items: Vec<QueryItem>,
    /// Set when the group's remote call(s) failed as a unit.
    pub error: Option<QueryGroupError>,
}

impl QueryGroupResult {
    fn completed(group: QueryGroup, items: Vec<QueryItem>) -> Self {
        Self {
            group,
            items,
            error: None,
        }
    }

    fn failed(group: QueryGroup, error: QueryGroupError) -> Self {
        Self {
            group,
            items: Vec::new(),
            error: Some(error),
        }
    }

    /// A group fails if its call failed or if any item is a failure marker.
    pub fn status(&self) -> GroupStatus {
        if self.error.is_none() && self.items.iter().all(QueryItem::is_ok) {
            GroupStatus::Succeeded
        } else {
            GroupStatus::Failed
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status() == GroupStatus::Succeeded
    }

    /// Successful values in item order.
    pub fn values(&self) -> impl Iterator<Item = &QueryValue> {
        self.items.iter().filter_map(|item| item.result.as_ref().ok())
    }
}

/// Per-group results of one run, in the order the groups were requested.
#[derive(Debug, Deref)]
pub struct QueryReport(Vec<QueryGroupResult>);

impl QueryReport {
    pub fn all_succeeded(&self) -> bool {
        self.0.iter().all(QueryGroupResult::succeeded)
    }

    pub fn failed_groups(&self) -> Vec<QueryGroup> {
        self.0
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.group)
            .collect()
    }

    pub fn get(&self, group: QueryGroup) -> Option<&QueryGroupResult> {
        self.0.iter().find(|r| r.group == group)
    }

    pub fn into_inner(self) -> Vec<QueryGroupResult> {
        self.0
    }
}

/// Read client bound to one deployed instance and a token registry.
pub struct QueryClient<R> {
    reader: R,
    registry: Vec<RegisteredToken>,
    self_test_token: Option<Address>,
}

impl<R: InspectorApi> QueryClient<R> {
    pub fn new(reader: R, registry: Vec<RegisteredToken>) -> Self {
        Self {
            reader,
            registry,
            self_test_token: None,
        }
    }

    /// Build a client for the active deployment of `contract_name` recorded in `state`.
    pub fn for_deployment<B>(backend: &B, state: &ConfigState, contract_name: &str) -> anyhow::Result<Self>
    where
        B: DeployBackend<Reader = R>,
    {
        let address = state.contract_address(contract_name).ok_or_else(|| {
            anyhow::anyhow!(
                "No address for contract '{}' in the config store; deploy it first",
                contract_name
            )
        })?;

        tracing::debug!(contract = %contract_name, address = %address, "Query client bound");
        Ok(Self::new(backend.reader(address), state.token_registry()))
    }

    /// Use `token` as the known-good identifier of the self-test instead of the
    /// first registered token.
    pub fn with_self_test_token(mut self, token: Address) -> Self {
        self.self_test_token = Some(token);
        self
    }

    pub fn registry(&self) -> &[RegisteredToken] {
        &self.registry
    }

    /// Balance of every token in one batched call, followed by the native balance.
    pub async fn balances(&self, tokens: &[RegisteredToken]) -> QueryGroupResult {
        const GROUP: QueryGroup = QueryGroup::Balances;

        run_group(GROUP, async {
            let addresses: Vec<Address> = tokens.iter().map(|t| t.address).collect();

            let balances = self
                .reader
                .get_multiple_balances(&addresses)
                .await
                .map_err(|e| QueryGroupError::new(GROUP, "getMultipleBalances", e))?;
            check_len(GROUP, "getMultipleBalances", addresses.len(), balances.len())?;

            let mut items: Vec<QueryItem> = tokens
                .iter()
                .zip(balances)
                .map(|(token, amount)| {
                    QueryItem::value(
                        &token.symbol,
                        QueryValue::Balance {
                            amount,
                            decimals: token.decimals,
                        },
                    )
                })
                .collect();
            // A failed native read marks its own item; the batched token balances stay.
            items.push(match self.reader.get_balance(Address::ZERO).await {
                Ok(amount) => QueryItem::value(
                    NATIVE_LABEL,
                    QueryValue::Balance {
                        amount,
                        decimals: NATIVE_DECIMALS,
                    },
                ),
                Err(err) => {
                    tracing::warn!(
                        group = %GROUP,
                        operation = "getBalance",
                        error = %format!("{err:#}"),
                        "Native balance read failed"
                    );
                    QueryItem::failure(NATIVE_LABEL, format!("getBalance failed: {err:#}"))
                }
            });

            Ok(items)
        })
        .await
    }

    /// Token metadata for every token in one batched call.
    pub async fn token_info(&self, tokens: &[RegisteredToken]) -> QueryGroupResult {
        const GROUP: QueryGroup = QueryGroup::TokenInfo;

        run_group(GROUP, async {
            let addresses: Vec<Address> = tokens.iter().map(|t| t.address).collect();

            let infos = self
                .reader
                .get_multiple_token_info(&addresses)
                .await
                .map_err(|e| QueryGroupError::new(GROUP, "getMultipleTokenInfo", e))?;
            check_len(GROUP, "getMultipleTokenInfo", addresses.len(), infos.len())?;

            Ok(tokens
                .iter()
                .zip(infos)
                .map(|(token, info)| QueryItem::value(&token.symbol, QueryValue::Token(info)))
                .collect())
        })
        .await
    }

    /// Whether each identifier is a conformant token, in one batched call.
    pub async fn validate(&self, identifiers: &[Address]) -> QueryGroupResult {
        const GROUP: QueryGroup = QueryGroup::Validation;

        run_group(GROUP, async {
            let valid = self
                .reader
                .batch_validate_tokens(identifiers)
                .await
                .map_err(|e| QueryGroupError::new(GROUP, "batchValidateTokens", e))?;
            check_len(GROUP, "batchValidateTokens", identifiers.len(), valid.len())?;

            Ok(identifiers
                .iter()
                .zip(valid)
                .map(|(address, valid)| {
                    QueryItem::value(self.label_for(*address), QueryValue::Valid(valid))
                })
                .collect())
        })
        .await
    }

    /// Contract metadata and owner, read independently and combined.
    pub async fn contract_info(&self) -> QueryGroupResult {
        const GROUP: QueryGroup = QueryGroup::ContractInfo;

        run_group(GROUP, async {
            let (info, owner) =
                futures::join!(self.reader.get_contract_info(), self.reader.owner());
            let info = info.map_err(|e| QueryGroupError::new(GROUP, "getContractInfo", e))?;
            let owner = owner.map_err(|e| QueryGroupError::new(GROUP, "owner", e))?;

            Ok(vec![QueryItem::value(
                "contract",
                QueryValue::Contract(ContractSummary {
                    address: self.reader.address(),
                    owner,
                    info,
                }),
            )])
        })
        .await
    }

    /// Fixed smoke test: read a known token's balance, validate it, and check that the
    /// invalid sentinel is rejected.
    ///
    /// Every step is reported as its own item so a single bad step does not hide the others.
    pub async fn self_test(&self, tokens: &[RegisteredToken]) -> QueryGroupResult {
        const GROUP: QueryGroup = QueryGroup::SelfTest;

        run_group(GROUP, async {
            let known = self
                .self_test_token
                .or_else(|| tokens.first().map(|t| t.address))
                .ok_or_else(|| {
                    QueryGroupError::new(
                        GROUP,
                        "selfTest",
                        anyhow::anyhow!("no known token to test against; register a token first"),
                    )
                })?;
            let decimals = tokens
                .iter()
                .find(|t| t.address == known)
                .map(|t| t.decimals)
                .unwrap_or(NATIVE_DECIMALS);

            let balance = match self.reader.get_balance(known).await {
                Ok(amount) => QueryItem::value(
                    "getBalance(known)",
                    QueryValue::Balance { amount, decimals },
                ),
                Err(err) => QueryItem::failure("getBalance(known)", format!("{err:#}")),
            };

            let known_valid = expect_validity(
                "isValidToken(known)",
                self.reader.is_valid_token(known).await,
                true,
            );
            let sentinel_valid = expect_validity(
                "isValidToken(sentinel)",
                self.reader.is_valid_token(INVALID_TOKEN_SENTINEL).await,
                false,
            );

            let items = vec![balance, known_valid, sentinel_valid];
            for item in items.iter().filter(|item| !item.is_ok()) {
                tracing::warn!(group = %GROUP, step = %item.label, "Self-test step failed");
            }
            Ok(items)
        })
        .await
    }

    /// Run the selected groups concurrently and collect their results in selection order.
    ///
    /// Never fails: group failures are reported in the returned [`QueryReport`].
    pub async fn run(&self, selection: &[QueryGroup]) -> QueryReport {
        let groups = selection.iter().map(|group| self.run_one(*group));
        let results = futures::future::join_all(groups).await;

        let report = QueryReport(results);
        tracing::info!(
            groups = report.len(),
            failed = report.failed_groups().len(),
            "Query run complete"
        );
        report
    }

    fn run_one(&self, group: QueryGroup) -> LocalBoxFuture<'_, QueryGroupResult> {
        match group {
            QueryGroup::Balances => self.balances(&self.registry).boxed_local(),
            QueryGroup::TokenInfo => self.token_info(&self.registry).boxed_local(),
            QueryGroup::Validation => async move {
                let mut identifiers: Vec<Address> =
                    self.registry.iter().map(|t| t.address).collect();
                identifiers.push(INVALID_TOKEN_SENTINEL);
                self.validate(&identifiers).await
            }
            .boxed_local(),
            QueryGroup::ContractInfo => self.contract_info().boxed_local(),
            QueryGroup::SelfTest => self.self_test(&self.registry).boxed_local(),
        }
    }

    fn label_for(&self, address: Address) -> String {
        if address == INVALID_TOKEN_SENTINEL {
            return "sentinel".to_string();
        }
        self.registry
            .iter()
            .find(|t| t.address == address)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| address.to_string())
    }
}

/// Isolation boundary: whatever the group's calls do, the caller gets a result back.
async fn run_group<F>(group: QueryGroup, query: F) -> QueryGroupResult
where
    F: Future<Output = Result<Vec<QueryItem>, QueryGroupError>>,
{
    tracing::debug!(group = %group, "Running query group");

    match query.await {
        Ok(items) => {
            let result = QueryGroupResult::completed(group, items);
            tracing::debug!(group = %group, items = result.items.len(), status = %result.status(), "Query group done");
            result
        }
        Err(err) => {
            tracing::warn!(
                group = %group,
                operation = err.operation,
                error = %err,
                "Query group failed"
            );
            QueryGroupResult::failed(group, err)
        }
    }
}

/// Batched calls are all-or-nothing: a response of the wrong length fails the group.
fn check_len(
    group: QueryGroup,
    operation: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), QueryGroupError> {
    if expected != actual {
        return Err(QueryGroupError::new(
            group,
            operation,
            anyhow::anyhow!(
                "malformed response: expected {} results, got {}",
                expected,
                actual
            ),
        ));
    }
    Ok(())
}

fn expect_validity(label: &str, result: anyhow::Result<bool>, expected: bool) -> QueryItem {
    match result {
        Ok(valid) if valid == expected => QueryItem::value(label, QueryValue::Valid(valid)),
        Ok(valid) => QueryItem::failure(label, format!("expected {}, got {}", expected, valid)),
        Err(err) => QueryItem::failure(label, format!("{err:#}")),
    }
}

// -- Display implementations for printing query reports --

impl fmt::Display for QueryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.0 {
            writeln!(f, "{}", result)?;
        }

        let failed = self.failed_groups().len();
        write!(
            f,
            "{} of {} groups succeeded",
            self.0.len() - failed,
            self.0.len()
        )
    }
}

impl fmt::Display for QueryGroupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} [{}] ===", self.group, self.status())?;

        if let Some(err) = &self.error {
            writeln!(f, "  error: {}", err)?;
        }

        for item in &self.items {
            match &item.result {
                Ok(value) => writeln!(f, "  [ok] {:<24} {}", item.label, value)?,
                Err(reason) => writeln!(f, "  [FAIL] {:<22} {}", item.label, reason)?,
            }
        }

        Ok(())
    }
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Balance { amount, decimals } => {
                write!(f, "{}", format_units(*amount, *decimals))
            }
            QueryValue::Token(token) => write!(
                f,
                "{} {} decimals={} balance={} supply={}",
                token.symbol,
                token.address,
                token.decimals,
                format_units(token.balance, token.decimals),
                format_units(token.total_supply, token.decimals)
            ),
            QueryValue::Valid(valid) => write!(f, "{}", if *valid { "valid" } else { "invalid" }),
            QueryValue::Contract(summary) => write!(
                f,
                "{} version={} owner={} deployed_at={} paused={}",
                summary.address,
                summary.info.version,
                summary.owner,
                summary.info.deployed_at,
                summary.info.paused
            ),
        }
    }
}
