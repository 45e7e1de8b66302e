use super::account::AccountSnapshot;
use super::external::{
    ComplianceReport, FeeBreakdown, FeeContext, FxQuote, LedgerReceipt, LimitReport, RailInfo,
    RefundInstruction, StreamInstruction, TransferInstruction, TransferRecord,
};
use super::money::Currency;
use super::preview::VarianceReport;
use super::simulation::{ClaimOutcome, Finding, Simulation};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Persistence for simulations. Implementations must make `try_claim` and
/// `mark_executed` single conditional writes.
#[async_trait]
pub trait SimulationStore: Send + Sync {
    async fn insert(&self, simulation: Simulation) -> Result<()>;
    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Simulation>>;
    async fn try_claim(&self, id: Uuid, now: DateTime<Utc>, lease: Duration) -> Result<ClaimOutcome>;
    async fn release_claim(&self, id: Uuid) -> Result<()>;
    async fn mark_executed(
        &self,
        id: Uuid,
        execution_result_id: String,
        at: DateTime<Utc>,
        variance: Option<VarianceReport>,
    ) -> Result<bool>;
    async fn mark_failed(&self, id: Uuid, findings: Vec<Finding>) -> Result<()>;
    /// Skips simulations under a live claim.
    async fn mark_expired(&self, id: Uuid, now: DateTime<Utc>, lease: Duration) -> Result<bool>;
    /// Ids of `completed`/`failed` simulations past their expiry and not
    /// under a live claim.
    async fn lapsed(&self, now: DateTime<Utc>, lease: Duration) -> Result<Vec<Uuid>>;
    /// Deletes `expired`/`failed` simulations created before `cutoff`.
    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn snapshot(&self, account_id: &str) -> Result<Option<AccountSnapshot>>;
}

#[async_trait]
pub trait FxQuoteSource: Send + Sync {
    async fn quote(&self, from: &Currency, to: &Currency, amount: Decimal) -> Result<FxQuote>;
}

#[async_trait]
pub trait FeeSchedule: Send + Sync {
    async fn calculate(&self, context: &FeeContext) -> Result<FeeBreakdown>;
}

#[async_trait]
pub trait LimitChecker: Send + Sync {
    async fn check(&self, account_id: &str, amount: Decimal, currency: &Currency) -> Result<LimitReport>;
}

#[async_trait]
pub trait ComplianceChecker: Send + Sync {
    async fn check(&self, account_id: &str, counterparty: &str) -> Result<ComplianceReport>;
}

#[async_trait]
pub trait RailDirectory: Send + Sync {
    async fn lookup(&self, corridor: &str) -> Result<Option<RailInfo>>;
}

#[async_trait]
pub trait TransferHistory: Send + Sync {
    async fn transfer(&self, transfer_id: &str) -> Result<Option<TransferRecord>>;
    /// Sum of successful refunds against the transfer.
    async fn refunded_total(&self, transfer_id: &str) -> Result<Decimal>;
}

/// The only collaborator that mutates balances. Calls repeated with the same
/// idempotency key must return the first receipt without a second mutation.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_transfer(&self, idempotency_key: &str, instruction: &TransferInstruction) -> Result<LedgerReceipt>;
    async fn create_refund(&self, idempotency_key: &str, instruction: &RefundInstruction) -> Result<LedgerReceipt>;
    async fn create_stream(&self, idempotency_key: &str, instruction: &StreamInstruction) -> Result<LedgerReceipt>;
}

pub type SimulationStoreRef = Arc<dyn SimulationStore>;
pub type AccountDirectoryRef = Arc<dyn AccountDirectory>;
pub type FxQuoteSourceRef = Arc<dyn FxQuoteSource>;
pub type FeeScheduleRef = Arc<dyn FeeSchedule>;
pub type LimitCheckerRef = Arc<dyn LimitChecker>;
pub type ComplianceCheckerRef = Arc<dyn ComplianceChecker>;
pub type RailDirectoryRef = Arc<dyn RailDirectory>;
pub type TransferHistoryRef = Arc<dyn TransferHistory>;
pub type LedgerRef = Arc<dyn Ledger>;
