use super::preview::{Adapters, PreviewContext, PreviewEngine};
use super::service::{Simulator, require_tenant};
use crate::domain::account::{AccountId, AccountSnapshot};
use crate::domain::external::{FeeBreakdown, FeeContext, FxQuote, RailInfo, TransferRecord};
use crate::domain::money::{Balance, Currency};
use crate::domain::ports::{
    AccountDirectory, AccountDirectoryRef, FeeSchedule, FeeScheduleRef, FxQuoteSource,
    FxQuoteSourceRef, RailDirectory, RailDirectoryRef, TransferHistory, TransferHistoryRef,
};
use crate::domain::preview::Preview;
use crate::domain::request::{ActionRequest, RawActionRequest};
use crate::domain::simulation::Simulation;
use crate::error::{FieldError, Result, SimulationError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub simulations: Vec<RawActionRequest>,
    #[serde(default)]
    pub stop_on_first_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Completed,
    Failed,
    NotEvaluated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    pub index: usize,
    pub status: BatchItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<Simulation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl BatchItem {
    fn evaluated(index: usize, simulation: Simulation) -> Self {
        let (status, error) = if simulation.can_execute {
            (BatchItemStatus::Completed, None)
        } else {
            let error = simulation.errors.first().map(|f| f.message.clone());
            (BatchItemStatus::Failed, error)
        };
        Self {
            index,
            status,
            simulation: Some(simulation),
            error,
            fields: Vec::new(),
        }
    }

    fn rejected(index: usize, err: SimulationError) -> Self {
        let error = Some(err.to_string());
        let fields = match err {
            SimulationError::Validation(fields) => fields,
            _ => Vec::new(),
        };
        Self {
            index,
            status: BatchItemStatus::Failed,
            simulation: None,
            error,
            fields,
        }
    }

    fn not_evaluated(index: usize) -> Self {
        Self {
            index,
            status: BatchItemStatus::NotEvaluated,
            simulation: None,
            error: None,
            fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrencyTotal {
    pub amount: Decimal,
    pub fees: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorridorSummary {
    pub rail: String,
    pub count: usize,
    pub amount: Decimal,
    pub fees: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
    pub total_count: usize,
    pub successful: usize,
    pub failed: usize,
    pub not_evaluated: usize,
    pub can_execute_all: bool,
    /// Successful items only, keyed by currency code.
    pub totals: BTreeMap<String, CurrencyTotal>,
    /// Successful transfers only, keyed by corridor.
    pub corridors: BTreeMap<String, CorridorSummary>,
}

impl BatchResult {
    fn aggregate(items: Vec<BatchItem>) -> Self {
        let mut totals: BTreeMap<String, CurrencyTotal> = BTreeMap::new();
        let mut corridors: BTreeMap<String, CorridorSummary> = BTreeMap::new();
        let count = |status| items.iter().filter(|i| i.status == status).count();
        let (successful, failed, not_evaluated) = (
            count(BatchItemStatus::Completed),
            count(BatchItemStatus::Failed),
            count(BatchItemStatus::NotEvaluated),
        );

        for preview in items
            .iter()
            .filter(|i| i.status == BatchItemStatus::Completed)
            .filter_map(|i| i.simulation.as_ref()?.preview.as_ref())
        {
            let (currency, amount, fees) = match preview {
                Preview::Transfer(t) => {
                    let corridor = corridors.entry(t.corridor.clone()).or_default();
                    corridor.rail = t.rail.clone();
                    corridor.count += 1;
                    corridor.amount += t.amount;
                    corridor.fees += t.total_fees;
                    (&t.currency, t.amount, t.total_fees)
                }
                Preview::Refund(r) => (&r.currency, r.refund_amount, Decimal::ZERO),
                Preview::Stream(s) => (&s.currency, s.total_cost.unwrap_or(Decimal::ZERO), Decimal::ZERO),
            };
            let total = totals.entry(currency.to_string()).or_default();
            total.amount += amount;
            total.fees += fees;
            total.count += 1;
        }

        Self {
            total_count: items.len(),
            // Vacuously true for an empty batch.
            can_execute_all: successful == items.len(),
            items,
            successful,
            failed,
            not_evaluated,
            totals,
            corridors,
        }
    }
}

/// Previews many requests against a per-account running balance.
///
/// Requests debiting the same account form a partition evaluated in list
/// order: transfers debit their source, refunds the original recipient.
/// Partitions run concurrently.
/// Every evaluated item is persisted as its own simulation and stays
/// individually executable.
#[derive(Clone)]
pub struct BatchCoordinator {
    simulator: Simulator,
}

impl BatchCoordinator {
    pub fn new(simulator: Simulator) -> Self {
        Self { simulator }
    }

    pub async fn run(&self, tenant_id: &str, request: BatchRequest) -> Result<BatchResult> {
        require_tenant(tenant_id)?;
        let started = Instant::now();
        let deadline = request
            .deadline_ms
            .map(|ms| started + std::time::Duration::from_millis(ms));
        let engine = self.simulator.engine();
        let shared = Arc::new(LaneShared {
            simulator: self.simulator.clone(),
            engine: engine.with_adapters(cached(engine.adapters())),
            tenant_id: tenant_id.to_string(),
            deadline,
        });

        let parsed: Vec<(usize, Result<ActionRequest>)> = request
            .simulations
            .into_iter()
            .map(ActionRequest::parse)
            .enumerate()
            .collect();
        let recipients = Arc::new(refund_recipients(&shared.engine, &parsed).await);

        let mut items = Vec::new();
        if request.stop_on_first_error {
            let mut lane = Lane::new(shared, recipients);
            let mut halted = false;
            for (index, parsed) in parsed {
                let item = if halted {
                    BatchItem::not_evaluated(index)
                } else {
                    lane.evaluate(index, parsed).await
                };
                halted |= item.status != BatchItemStatus::Completed;
                items.push(item);
            }
        } else {
            let mut partitions: Vec<Vec<(usize, ActionRequest)>> = Vec::new();
            let mut positions: HashMap<String, usize> = HashMap::new();
            for (index, parsed) in parsed {
                match parsed {
                    Ok(action) => {
                        let key = partition_key(index, &action, &recipients);
                        let position = *positions.entry(key).or_insert_with(|| {
                            partitions.push(Vec::new());
                            partitions.len() - 1
                        });
                        partitions[position].push((index, action));
                    }
                    Err(err) => items.push(BatchItem::rejected(index, err)),
                }
            }

            let mut workers = JoinSet::new();
            for partition in partitions {
                let mut lane = Lane::new(shared.clone(), recipients.clone());
                workers.spawn(async move {
                    let mut evaluated = Vec::with_capacity(partition.len());
                    for (index, action) in partition {
                        evaluated.push(lane.evaluate(index, Ok(action)).await);
                    }
                    evaluated
                });
            }
            while let Some(joined) = workers.join_next().await {
                let evaluated = joined
                    .map_err(|e| SimulationError::Internal(format!("batch partition failed: {e}")))?;
                items.extend(evaluated);
            }
            items.sort_by_key(|item| item.index);
        }

        let result = BatchResult::aggregate(items);
        info!(
            tenant_id,
            total = result.total_count,
            successful = result.successful,
            failed = result.failed,
            not_evaluated = result.not_evaluated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch evaluated"
        );
        Ok(result)
    }
}

/// Maps each refunded transfer to the account the refund debits. Transfers
/// that cannot be read are left out; their refunds fail on their own.
async fn refund_recipients(
    engine: &PreviewEngine,
    parsed: &[(usize, Result<ActionRequest>)],
) -> HashMap<String, AccountId> {
    let mut recipients = HashMap::new();
    for (_, parsed) in parsed {
        let Ok(ActionRequest::Refund(refund)) = parsed else {
            continue;
        };
        if recipients.contains_key(&refund.transfer_id) {
            continue;
        }
        let lookup = engine.adapters().history.transfer(&refund.transfer_id);
        if let Ok(Ok(Some(transfer))) = tokio::time::timeout(engine.config().adapter_timeout(), lookup).await {
            recipients.insert(refund.transfer_id.clone(), transfer.destination_account);
        }
    }
    recipients
}

fn partition_key(index: usize, action: &ActionRequest, recipients: &HashMap<String, AccountId>) -> String {
    match action {
        ActionRequest::Transfer(t) => format!("account:{}", t.source_account),
        ActionRequest::Refund(r) => match recipients.get(&r.transfer_id) {
            Some(recipient) => format!("account:{recipient}"),
            None => format!("transfer:{}", r.transfer_id),
        },
        ActionRequest::Stream(_) => format!("stream:{index}"),
    }
}

struct LaneShared {
    simulator: Simulator,
    engine: PreviewEngine,
    tenant_id: String,
    deadline: Option<Instant>,
}

/// Sequential evaluation state: simulated balances per debited account and
/// refunds per transfer so far.
struct Lane {
    shared: Arc<LaneShared>,
    recipients: Arc<HashMap<String, AccountId>>,
    balances: HashMap<AccountId, Balance>,
    pending_refunds: HashMap<String, Decimal>,
}

impl Lane {
    fn new(shared: Arc<LaneShared>, recipients: Arc<HashMap<String, AccountId>>) -> Self {
        Self {
            shared,
            recipients,
            balances: HashMap::new(),
            pending_refunds: HashMap::new(),
        }
    }

    async fn evaluate(&mut self, index: usize, parsed: Result<ActionRequest>) -> BatchItem {
        let action = match parsed {
            Ok(action) => action,
            Err(err) => return BatchItem::rejected(index, err),
        };
        if self.shared.deadline.is_some_and(|d| Instant::now() >= d) {
            return BatchItem::not_evaluated(index);
        }

        let context = self.context_for(&action);
        let preview = self.shared.engine.preview(&action, &context);
        let outcome = match self.shared.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, preview).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(index, "batch deadline reached mid-item");
                    return BatchItem::not_evaluated(index);
                }
            },
            None => preview.await,
        };

        let persisted = match outcome {
            Ok(outcome) => {
                self.shared
                    .simulator
                    .persist(&self.shared.tenant_id, action, outcome)
                    .await
            }
            Err(err) => Err(err),
        };
        match persisted {
            Ok(simulation) => {
                if simulation.can_execute {
                    self.apply(&simulation);
                }
                BatchItem::evaluated(index, simulation)
            }
            Err(err) => BatchItem::rejected(index, err),
        }
    }

    fn context_for(&self, action: &ActionRequest) -> PreviewContext {
        match action {
            ActionRequest::Transfer(t) => PreviewContext {
                balance_override: self.balances.get(&t.source_account).copied(),
                ..PreviewContext::default()
            },
            ActionRequest::Refund(r) => PreviewContext {
                balance_override: self
                    .recipients
                    .get(&r.transfer_id)
                    .and_then(|recipient| self.balances.get(recipient))
                    .copied(),
                pending_refunds: self
                    .pending_refunds
                    .get(&r.transfer_id)
                    .copied()
                    .unwrap_or(Decimal::ZERO),
                ..PreviewContext::default()
            },
            ActionRequest::Stream(_) => PreviewContext::default(),
        }
    }

    fn apply(&mut self, simulation: &Simulation) {
        match &simulation.preview {
            Some(Preview::Transfer(t)) => {
                self.balances
                    .insert(t.source_account.clone(), t.balance_after);
            }
            Some(Preview::Refund(r)) => {
                self.balances
                    .insert(r.recipient_account.clone(), r.recipient_balance_after);
                *self
                    .pending_refunds
                    .entry(r.transfer_id.clone())
                    .or_insert(Decimal::ZERO) += r.refund_amount;
            }
            Some(Preview::Stream(_)) | None => {}
        }
    }
}

/// Successful lookups remembered for one coordinator run.
struct Memo<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_fetch(&self, key: K, fetch: impl Future<Output = Result<V>>) -> Result<V> {
        if let Some(value) = self.entries.read().await.get(&key) {
            return Ok(value.clone());
        }
        let value = fetch.await?;
        self.entries.write().await.insert(key, value.clone());
        Ok(value)
    }
}

fn cached(adapters: &Adapters) -> Adapters {
    Adapters {
        accounts: Arc::new(CachedAccounts {
            inner: adapters.accounts.clone(),
            memo: Memo::new(),
        }),
        fx: Arc::new(CachedFx {
            inner: adapters.fx.clone(),
            memo: Memo::new(),
        }),
        fees: Arc::new(CachedFees {
            inner: adapters.fees.clone(),
            memo: Memo::new(),
        }),
        rails: Arc::new(CachedRails {
            inner: adapters.rails.clone(),
            memo: Memo::new(),
        }),
        history: Arc::new(CachedHistory {
            inner: adapters.history.clone(),
            transfers: Memo::new(),
        }),
        ..adapters.clone()
    }
}

struct CachedAccounts {
    inner: AccountDirectoryRef,
    memo: Memo<String, Option<AccountSnapshot>>,
}

#[async_trait]
impl AccountDirectory for CachedAccounts {
    async fn snapshot(&self, account_id: &str) -> Result<Option<AccountSnapshot>> {
        self.memo
            .get_or_fetch(account_id.to_string(), self.inner.snapshot(account_id))
            .await
    }
}

struct CachedFx {
    inner: FxQuoteSourceRef,
    memo: Memo<(Currency, Currency), FxQuote>,
}

#[async_trait]
impl FxQuoteSource for CachedFx {
    async fn quote(&self, from: &Currency, to: &Currency, amount: Decimal) -> Result<FxQuote> {
        self.memo
            .get_or_fetch((from.clone(), to.clone()), self.inner.quote(from, to, amount))
            .await
    }
}

struct CachedFees {
    inner: FeeScheduleRef,
    memo: Memo<FeeContext, FeeBreakdown>,
}

#[async_trait]
impl FeeSchedule for CachedFees {
    async fn calculate(&self, context: &FeeContext) -> Result<FeeBreakdown> {
        self.memo
            .get_or_fetch(context.clone(), self.inner.calculate(context))
            .await
    }
}

struct CachedRails {
    inner: RailDirectoryRef,
    memo: Memo<String, Option<RailInfo>>,
}

#[async_trait]
impl RailDirectory for CachedRails {
    async fn lookup(&self, corridor: &str) -> Result<Option<RailInfo>> {
        self.memo
            .get_or_fetch(corridor.to_string(), self.inner.lookup(corridor))
            .await
    }
}

/// Transfer records only; refunded totals are read fresh.
struct CachedHistory {
    inner: TransferHistoryRef,
    transfers: Memo<String, Option<TransferRecord>>,
}

#[async_trait]
impl TransferHistory for CachedHistory {
    async fn transfer(&self, transfer_id: &str) -> Result<Option<TransferRecord>> {
        self.transfers
            .get_or_fetch(transfer_id.to_string(), self.inner.transfer(transfer_id))
            .await
    }

    async fn refunded_total(&self, transfer_id: &str) -> Result<Decimal> {
        self.inner.refunded_total(transfer_id).await
    }
}
