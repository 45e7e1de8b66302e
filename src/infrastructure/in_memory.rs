use crate::domain::ports::SimulationStore;
use crate::domain::preview::VarianceReport;
use crate::domain::simulation::{ClaimOutcome, Finding, Simulation, SimulationStatus};
use crate::error::{Result, SimulationError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory simulation store.
///
/// Every conditional update runs under the write lock, so claims and
/// execution marks are single atomic steps.
#[derive(Default, Clone)]
pub struct InMemorySimulationStore {
    simulations: Arc<RwLock<HashMap<Uuid, Simulation>>>,
}

impl InMemorySimulationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.simulations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.simulations.read().await.is_empty()
    }

    async fn update<T>(&self, id: Uuid, apply: impl FnOnce(&mut Simulation) -> Result<T>) -> Result<T> {
        let mut simulations = self.simulations.write().await;
        let simulation = simulations.get_mut(&id).ok_or_else(|| SimulationError::NotFound {
            entity: "simulation",
            id: id.to_string(),
        })?;
        apply(simulation)
    }
}

#[async_trait]
impl SimulationStore for InMemorySimulationStore {
    async fn insert(&self, simulation: Simulation) -> Result<()> {
        let mut simulations = self.simulations.write().await;
        if simulations.contains_key(&simulation.id) {
            return Err(SimulationError::Storage(format!(
                "simulation {} already stored",
                simulation.id
            )));
        }
        simulations.insert(simulation.id, simulation);
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Simulation>> {
        let simulations = self.simulations.read().await;
        Ok(simulations
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn try_claim(&self, id: Uuid, now: DateTime<Utc>, lease: Duration) -> Result<ClaimOutcome> {
        self.update(id, |s| Ok(s.try_claim(now, lease))).await
    }

    async fn release_claim(&self, id: Uuid) -> Result<()> {
        self.update(id, |s| {
            s.release_claim();
            Ok(())
        })
        .await
    }

    async fn mark_executed(
        &self,
        id: Uuid,
        execution_result_id: String,
        at: DateTime<Utc>,
        variance: Option<VarianceReport>,
    ) -> Result<bool> {
        self.update(id, |s| s.mark_executed(execution_result_id, at, variance))
            .await
    }

    async fn mark_failed(&self, id: Uuid, findings: Vec<Finding>) -> Result<()> {
        self.update(id, |s| s.mark_stale(findings)).await
    }

    async fn mark_expired(&self, id: Uuid, now: DateTime<Utc>, lease: Duration) -> Result<bool> {
        self.update(id, |s| Ok(s.mark_expired(now, lease))).await
    }

    async fn lapsed(&self, now: DateTime<Utc>, lease: Duration) -> Result<Vec<Uuid>> {
        let simulations = self.simulations.read().await;
        Ok(simulations
            .values()
            .filter(|s| s.is_lapsed(now, lease))
            .map(|s| s.id)
            .collect())
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut simulations = self.simulations.write().await;
        let before = simulations.len();
        simulations.retain(|_, s| !(is_purgeable(s.status) && s.created_at < cutoff));
        Ok(before - simulations.len())
    }
}

pub(crate) fn is_purgeable(status: SimulationStatus) -> bool {
    matches!(status, SimulationStatus::Expired | SimulationStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::{ActionRequest, RefundRequest};
    use crate::domain::simulation::{FindingCode, Findings, PreviewOutcome};

    fn failed_simulation(tenant: &str, now: DateTime<Utc>) -> Simulation {
        let request = ActionRequest::Refund(RefundRequest {
            transfer_id: "tr_missing".to_string(),
            amount: None,
            reason: "duplicate".to_string(),
        });
        let mut findings = Findings::default();
        findings.fail(FindingCode::NotFound, "transfer tr_missing not found", serde_json::Value::Null);
        let mut simulation = Simulation::new(tenant, request, now, Duration::hours(1));
        simulation
            .settle(PreviewOutcome::Unrunnable { findings })
            .unwrap();
        simulation
    }

    #[tokio::test]
    async fn test_get_is_tenant_scoped() {
        let store = InMemorySimulationStore::new();
        let simulation = failed_simulation("tenant-a", Utc::now());
        let id = simulation.id;
        store.insert(simulation.clone()).await.unwrap();

        assert_eq!(store.get("tenant-a", id).await.unwrap(), Some(simulation));
        assert!(store.get("tenant-b", id).await.unwrap().is_none());
        assert!(store.get("tenant-a", Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = InMemorySimulationStore::new();
        let simulation = failed_simulation("t", Utc::now());
        store.insert(simulation.clone()).await.unwrap();
        assert!(matches!(
            store.insert(simulation).await,
            Err(SimulationError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_lapsed_expire_and_purge() {
        let store = InMemorySimulationStore::new();
        let created = Utc::now();
        let simulation = failed_simulation("t", created);
        let id = simulation.id;
        store.insert(simulation).await.unwrap();

        let lease = Duration::seconds(30);
        assert!(store.lapsed(created + Duration::minutes(30), lease).await.unwrap().is_empty());
        let later = created + Duration::hours(2);
        assert_eq!(store.lapsed(later, lease).await.unwrap(), vec![id]);
        assert!(store.mark_expired(id, later, lease).await.unwrap());
        assert!(!store.mark_expired(id, later, lease).await.unwrap());
        assert!(store.lapsed(later, lease).await.unwrap().is_empty());

        assert_eq!(store.purge_terminal(created).await.unwrap(), 0);
        assert_eq!(
            store
                .purge_terminal(created + Duration::seconds(1))
                .await
                .unwrap(),
            1
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_id_updates_are_not_found() {
        let store = InMemorySimulationStore::new();
        let err = store
            .try_claim(Uuid::new_v4(), Utc::now(), Duration::seconds(30))
            .await
            .unwrap_err();
        assert!(matches!(err, SimulationError::NotFound { entity: "simulation", .. }));
    }
}
