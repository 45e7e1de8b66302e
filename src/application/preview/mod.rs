//! Side-effect free preview computation for transfers, refunds and streams.

mod rates;
mod refund;
mod stream;
mod transfer;

pub use rates::RateMemory;

use crate::config::EngineConfig;
use crate::domain::clock::ClockRef;
use crate::domain::external::FxQuote;
use crate::domain::money::Balance;
use crate::domain::ports::{
    AccountDirectoryRef, ComplianceCheckerRef, FeeScheduleRef, FxQuoteSourceRef, LimitCheckerRef,
    RailDirectoryRef, TransferHistoryRef,
};
use crate::domain::preview::Preview;
use crate::domain::request::ActionRequest;
use crate::domain::simulation::{Findings, PreviewOutcome, Simulation};
use crate::error::{Result, SimulationError};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;

/// The read-only collaborators a preview consults.
#[derive(Clone)]
pub struct Adapters {
    pub accounts: AccountDirectoryRef,
    pub fx: FxQuoteSourceRef,
    pub fees: FeeScheduleRef,
    pub limits: LimitCheckerRef,
    pub compliance: ComplianceCheckerRef,
    pub rails: RailDirectoryRef,
    pub history: TransferHistoryRef,
}

/// Per-call overrides used by the batch coordinator and the execution gate.
#[derive(Debug, Clone, Default)]
pub struct PreviewContext {
    /// Replaces the snapshot balance of the debited account.
    pub balance_override: Option<Balance>,
    /// Refunds already simulated earlier in the same batch.
    pub pending_refunds: Decimal,
    /// A quote captured by an earlier preview, honored while unexpired.
    pub locked_quote: Option<FxQuote>,
}

#[derive(Clone)]
pub struct PreviewEngine {
    adapters: Adapters,
    config: Arc<EngineConfig>,
    clock: ClockRef,
    rates: Arc<RateMemory>,
}

impl PreviewEngine {
    pub fn new(adapters: Adapters, config: Arc<EngineConfig>, clock: ClockRef) -> Self {
        let rates = Arc::new(RateMemory::new(config.fx_reference_window));
        Self {
            adapters,
            config,
            clock,
            rates,
        }
    }

    /// Same engine over different adapters; the rate memory is shared.
    pub fn with_adapters(&self, adapters: Adapters) -> Self {
        Self {
            adapters,
            config: self.config.clone(),
            clock: self.clock.clone(),
            rates: self.rates.clone(),
        }
    }

    pub fn adapters(&self) -> &Adapters {
        &self.adapters
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn preview(&self, request: &ActionRequest, context: &PreviewContext) -> Result<PreviewOutcome> {
        match request {
            ActionRequest::Transfer(t) => self.preview_transfer(t, context).await,
            ActionRequest::Refund(r) => self.preview_refund(r, context).await,
            ActionRequest::Stream(s) => self.preview_stream(s, context).await,
        }
    }

    /// Re-runs the simulation's preview against current state, honoring the
    /// FX quote it captured while that quote is still valid.
    pub async fn revalidate(&self, simulation: &Simulation) -> Result<PreviewOutcome> {
        let now = self.clock.now();
        let locked_quote = match &simulation.preview {
            Some(Preview::Transfer(t)) => t
                .fx
                .as_ref()
                .and_then(|fx| fx.reusable_quote(now))
                .cloned(),
            _ => None,
        };
        let context = PreviewContext {
            locked_quote,
            ..PreviewContext::default()
        };
        self.preview(&simulation.request_payload, &context).await
    }

    /// Awaits an adapter call with the configured timeout.
    async fn bounded<T, F>(&self, adapter: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.adapter_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(SimulationError::adapter(
                adapter,
                format!("no answer within {}ms", self.config.adapter_timeout_ms),
            )),
        }
    }
}

fn not_found(entity: &'static str, id: &str) -> SimulationError {
    SimulationError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn unrunnable(findings: Findings) -> PreviewOutcome {
    PreviewOutcome::Unrunnable { findings }
}
