//! Application layer orchestrating simulations.
//!
//! The [`Simulator`] creates and reads simulations, the [`BatchCoordinator`]
//! previews many requests against a shared running balance, the
//! [`ExecutionGate`] is the single mutating path, and the [`CleanupWorker`]
//! expires and purges old records in the background.

pub mod batch;
pub mod cleanup;
pub mod gate;
pub mod preview;
pub mod service;

pub use batch::{BatchCoordinator, BatchRequest, BatchResult};
pub use cleanup::{CleanupReport, CleanupWorker};
pub use gate::{ExecutionGate, ExecutionOutcome};
pub use preview::{Adapters, PreviewContext, PreviewEngine};
pub use service::Simulator;

use crate::config::EngineConfig;
use crate::domain::clock::ClockRef;
use crate::domain::ports::{LedgerRef, SimulationStoreRef};
use std::sync::Arc;

/// Every engine service wired over one store, one set of collaborators and
/// one clock.
#[derive(Clone)]
pub struct Services {
    pub simulator: Simulator,
    pub batches: BatchCoordinator,
    pub gate: ExecutionGate,
    pub cleanup: CleanupWorker,
}

impl Services {
    pub fn new(
        config: EngineConfig,
        store: SimulationStoreRef,
        adapters: Adapters,
        ledger: LedgerRef,
        clock: ClockRef,
    ) -> Self {
        let config = Arc::new(config);
        let engine = PreviewEngine::new(adapters, config.clone(), clock.clone());
        let simulator = Simulator::new(store.clone(), engine.clone(), clock.clone());
        Self {
            batches: BatchCoordinator::new(simulator.clone()),
            gate: ExecutionGate::new(store.clone(), engine, ledger, clock.clone()),
            cleanup: CleanupWorker::new(store, config, clock),
            simulator,
        }
    }
}
