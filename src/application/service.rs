use super::preview::{PreviewContext, PreviewEngine};
use crate::domain::clock::ClockRef;
use crate::domain::ports::SimulationStoreRef;
use crate::domain::request::{ActionRequest, RawActionRequest};
use crate::domain::simulation::{PreviewOutcome, Simulation};
use crate::error::{Result, SimulationError};
use tracing::{debug, info};
use uuid::Uuid;

/// Creates simulations and serves them back, scoped by tenant.
#[derive(Clone)]
pub struct Simulator {
    store: SimulationStoreRef,
    engine: PreviewEngine,
    clock: ClockRef,
}

impl Simulator {
    pub fn new(store: SimulationStoreRef, engine: PreviewEngine, clock: ClockRef) -> Self {
        Self { store, engine, clock }
    }

    pub fn engine(&self) -> &PreviewEngine {
        &self.engine
    }

    /// Validates the request, runs the matching preview and stores the
    /// result. Malformed requests are rejected before anything is persisted.
    pub async fn create(&self, tenant_id: &str, raw: RawActionRequest) -> Result<Simulation> {
        require_tenant(tenant_id)?;
        let request = ActionRequest::parse(raw)?;
        let outcome = self
            .engine
            .preview(&request, &PreviewContext::default())
            .await?;
        self.persist(tenant_id, request, outcome).await
    }

    /// Stores an already computed preview as a new simulation.
    pub async fn persist(
        &self,
        tenant_id: &str,
        request: ActionRequest,
        outcome: PreviewOutcome,
    ) -> Result<Simulation> {
        let mut simulation = Simulation::new(
            tenant_id,
            request,
            self.clock.now(),
            self.engine.config().simulation_ttl(),
        );
        simulation.settle(outcome)?;
        self.store.insert(simulation.clone()).await?;

        info!(
            simulation_id = %simulation.id,
            tenant_id,
            action_type = %simulation.action_type,
            status = %simulation.status,
            can_execute = simulation.can_execute,
            warnings = simulation.warnings.len(),
            errors = simulation.errors.len(),
            "simulation created"
        );
        Ok(simulation)
    }

    /// Reads a simulation. Expired simulations stay readable.
    pub async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Simulation> {
        require_tenant(tenant_id)?;
        debug!(simulation_id = %id, tenant_id, "simulation lookup");
        self.store
            .get(tenant_id, id)
            .await?
            .ok_or_else(|| SimulationError::NotFound {
                entity: "simulation",
                id: id.to_string(),
            })
    }
}

pub(crate) fn require_tenant(tenant_id: &str) -> Result<()> {
    if tenant_id.trim().is_empty() {
        return Err(SimulationError::validation("tenant_id", "must not be blank"));
    }
    Ok(())
}
