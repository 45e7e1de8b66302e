use super::preview::PreviewEngine;
use super::service::require_tenant;
use crate::domain::clock::ClockRef;
use crate::domain::external::{LedgerReceipt, RefundInstruction, StreamInstruction, TransferInstruction};
use crate::domain::money::{Amount, round_half_even};
use crate::domain::ports::{LedgerRef, SimulationStoreRef};
use crate::domain::preview::{Preview, TransferPreview, VarianceReport};
use crate::domain::simulation::{ClaimOutcome, Finding, FindingCode, PreviewOutcome, Simulation};
use crate::error::{Result, SimulationError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CLAIM_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub simulation_id: Uuid,
    pub execution_result_id: String,
    /// True when the simulation had already been executed and nothing was
    /// mutated by this call.
    pub replayed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub variance: Option<VarianceReport>,
}

impl ExecutionOutcome {
    fn replay(simulation: &Simulation) -> Result<Self> {
        let execution_result_id = simulation.execution_result_id.clone().ok_or_else(|| {
            SimulationError::Internal(format!(
                "simulation {} is executed without a result id",
                simulation.id
            ))
        })?;
        Ok(Self {
            simulation_id: simulation.id,
            execution_result_id,
            replayed: true,
            executed_at: simulation.executed_at,
            variance: simulation.variance.clone(),
        })
    }
}

/// The only path that mutates balances.
///
/// Callers for one simulation id are serialized by an in-process lease; the
/// store's conditional claim covers other processes sharing the store. The
/// simulation id is the ledger idempotency key, so a commit retried after a
/// lost execution mark yields the same result id.
#[derive(Clone)]
pub struct ExecutionGate {
    store: SimulationStoreRef,
    engine: PreviewEngine,
    ledger: LedgerRef,
    clock: ClockRef,
    leases: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl ExecutionGate {
    pub fn new(store: SimulationStoreRef, engine: PreviewEngine, ledger: LedgerRef, clock: ClockRef) -> Self {
        Self {
            store,
            engine,
            ledger,
            clock,
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn execute(&self, tenant_id: &str, id: Uuid) -> Result<ExecutionOutcome> {
        require_tenant(tenant_id)?;
        let lease = self.lease(id).await;
        let outcome = {
            let _held = lease.lock().await;
            self.execute_exclusive(tenant_id, id).await
        };
        self.forget(id, lease).await;
        outcome
    }

    async fn execute_exclusive(&self, tenant_id: &str, id: Uuid) -> Result<ExecutionOutcome> {
        let simulation = self.load(tenant_id, id).await?;
        if simulation.executed {
            debug!(simulation_id = %id, "execution replayed");
            return ExecutionOutcome::replay(&simulation);
        }

        let now = self.clock.now();
        if simulation.is_expired_at(now) {
            self.store
                .mark_expired(id, now, self.engine.config().claim_lease())
                .await?;
            warn!(simulation_id = %id, expires_at = %simulation.expires_at, "execution refused, simulation expired");
            return Err(SimulationError::Expired {
                id,
                expires_at: simulation.expires_at,
            });
        }
        if !simulation.can_execute {
            return Err(not_executable(&simulation));
        }

        if let Some(replayed) = self.claim(tenant_id, id).await? {
            return Ok(replayed);
        }
        info!(simulation_id = %id, action_type = %simulation.action_type, "execution claimed");

        let revalidated = match self.engine.revalidate(&simulation).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.store.release_claim(id).await?;
                return Err(err);
            }
        };
        let applied = match self.stale_findings(&simulation, revalidated) {
            Ok(applied) => applied,
            Err(findings) => {
                self.store.mark_failed(id, findings.clone()).await?;
                warn!(simulation_id = %id, findings = findings.len(), "simulation stale at execution");
                return Err(SimulationError::Stale { id, findings });
            }
        };

        let receipt = match self.commit(&id.to_string(), &applied).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(simulation_id = %id, %err, "ledger rejected execution");
                self.store.release_claim(id).await?;
                return Err(err);
            }
        };

        let variance = simulation
            .preview
            .as_ref()
            .map(|previewed| VarianceReport::between(previewed, &applied));
        let executed_at = self.clock.now();
        let marked = self
            .store
            .mark_executed(id, receipt.id.clone(), executed_at, variance.clone())
            .await?;
        if !marked {
            return ExecutionOutcome::replay(&self.load(tenant_id, id).await?);
        }

        info!(
            simulation_id = %id,
            execution_result_id = %receipt.id,
            "execution committed"
        );
        Ok(ExecutionOutcome {
            simulation_id: id,
            execution_result_id: receipt.id,
            replayed: false,
            executed_at: Some(executed_at),
            variance,
        })
    }

    /// Claims the simulation. Returns the stored outcome instead when another
    /// caller executed it first.
    async fn claim(&self, tenant_id: &str, id: Uuid) -> Result<Option<ExecutionOutcome>> {
        let patience = tokio::time::Instant::now()
            + self.engine.config().claim_lease().to_std().unwrap_or_default()
            + Duration::from_secs(1);
        loop {
            match self
                .store
                .try_claim(id, self.clock.now(), self.engine.config().claim_lease())
                .await?
            {
                ClaimOutcome::Claimed => return Ok(None),
                ClaimOutcome::AlreadyExecuted(_) => {
                    let simulation = self.load(tenant_id, id).await?;
                    return ExecutionOutcome::replay(&simulation).map(Some);
                }
                ClaimOutcome::NotClaimable(_) => {
                    let simulation = self.load(tenant_id, id).await?;
                    return Err(not_executable(&simulation));
                }
                ClaimOutcome::Held => {
                    if tokio::time::Instant::now() >= patience {
                        return Err(SimulationError::ConcurrencyConflict { id });
                    }
                    debug!(simulation_id = %id, "claim held elsewhere, waiting");
                    tokio::time::sleep(CLAIM_POLL).await;
                }
            }
        }
    }

    /// The re-validated preview, or every finding that now blocks it.
    fn stale_findings(
        &self,
        simulation: &Simulation,
        revalidated: PreviewOutcome,
    ) -> std::result::Result<Preview, Vec<Finding>> {
        let (applied, mut blocking) = match revalidated {
            PreviewOutcome::Computed { preview, findings } => (preview, findings.errors),
            PreviewOutcome::Unrunnable { findings } => return Err(findings.errors),
        };
        if let (Some(Preview::Transfer(before)), Preview::Transfer(after)) = (&simulation.preview, &applied) {
            blocking.extend(self.transfer_drift(before, after));
        }
        if blocking.is_empty() {
            Ok(applied)
        } else {
            Err(blocking)
        }
    }

    fn transfer_drift(&self, before: &TransferPreview, after: &TransferPreview) -> Vec<Finding> {
        let mut findings = Vec::new();
        let tolerance = self.engine.config().fee_drift_tolerance;
        let allowed = before.total_fees * (Decimal::ONE + tolerance);
        if after.total_fees > allowed {
            findings.push(Finding::error(
                FindingCode::FeesChanged,
                format!(
                    "fees rose from {} to {} {}, beyond the {} tolerance",
                    before.total_fees, after.total_fees, after.currency, tolerance
                ),
                json!({
                    "previewed": before.total_fees,
                    "current": after.total_fees,
                    "change": after.total_fees - before.total_fees,
                    "tolerance": tolerance,
                }),
            ));
        }
        if after.destination_amount.is_none() {
            findings.push(Finding::error(
                FindingCode::RateUnavailable,
                format!(
                    "no {}/{} rate available to settle the transfer",
                    after.currency, after.destination_currency
                ),
                json!({ "from": after.currency, "to": after.destination_currency }),
            ));
        }
        findings
    }

    async fn commit(&self, idempotency_key: &str, applied: &Preview) -> Result<LedgerReceipt> {
        match applied {
            Preview::Transfer(t) => {
                let (Some(fx), Some(destination_amount)) = (&t.fx, t.destination_amount) else {
                    return Err(SimulationError::Ledger("transfer has no settlement rate".into()));
                };
                let instruction = TransferInstruction {
                    source_account: t.source_account.clone(),
                    destination_account: t.destination_account.clone(),
                    amount: Amount::new(t.amount)?,
                    currency: t.currency.clone(),
                    destination_currency: t.destination_currency.clone(),
                    destination_amount,
                    fx_rate: round_half_even(fx.rate, 8),
                    total_fees: t.total_fees,
                    corridor: t.corridor.clone(),
                    rail: t.rail.clone(),
                };
                self.ledger.create_transfer(idempotency_key, &instruction).await
            }
            Preview::Refund(r) => {
                let instruction = RefundInstruction {
                    transfer_id: r.transfer_id.clone(),
                    amount: Amount::new(r.refund_amount)?,
                    recipient_debit: r.recipient_debit,
                    reason: r.reason.clone(),
                };
                self.ledger.create_refund(idempotency_key, &instruction).await
            }
            Preview::Stream(s) => {
                let instruction = StreamInstruction {
                    source_account: s.source_account.clone(),
                    destination_account: s.destination_account.clone(),
                    rate_per_second: Amount::new(s.rate_per_second)?,
                    currency: s.currency.clone(),
                    duration_seconds: s.duration_seconds,
                };
                self.ledger.create_stream(idempotency_key, &instruction).await
            }
        }
    }

    async fn load(&self, tenant_id: &str, id: Uuid) -> Result<Simulation> {
        self.store
            .get(tenant_id, id)
            .await?
            .ok_or_else(|| SimulationError::NotFound {
                entity: "simulation",
                id: id.to_string(),
            })
    }

    async fn lease(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.leases.lock().await.entry(id).or_default().clone()
    }

    async fn forget(&self, id: Uuid, lease: Arc<Mutex<()>>) {
        let mut leases = self.leases.lock().await;
        drop(lease);
        if leases.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
            leases.remove(&id);
        }
    }
}

fn not_executable(simulation: &Simulation) -> SimulationError {
    SimulationError::NotExecutable {
        id: simulation.id,
        status: simulation.status,
        findings: simulation.blocking_findings(),
    }
}
