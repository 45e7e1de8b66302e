use super::in_memory::is_purgeable;
use crate::domain::ports::SimulationStore;
use crate::domain::preview::VarianceReport;
use crate::domain::simulation::{ClaimOutcome, Finding, Simulation};
use crate::error::{Result, SimulationError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family holding simulations keyed by id.
pub const CF_SIMULATIONS: &str = "simulations";

/// A persistent simulation store backed by RocksDB.
///
/// Values are JSON-encoded simulations. Read-modify-write updates are
/// serialized by a store-wide write lock, which makes each conditional update
/// (claim, execution mark, expiry) atomic for every clone of the store.
#[derive(Clone)]
pub struct RocksDbSimulationStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbSimulationStore {
    /// Opens or creates a RocksDB instance at `path` with the simulations
    /// column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf = ColumnFamilyDescriptor::new(CF_SIMULATIONS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_SIMULATIONS)
            .ok_or_else(|| SimulationError::Storage("simulations column family not found".into()))
    }

    fn read(&self, id: Uuid) -> Result<Option<Simulation>> {
        match self.db.get_cf(self.cf()?, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, simulation: &Simulation) -> Result<()> {
        let value = serde_json::to_vec(simulation)?;
        self.db.put_cf(self.cf()?, simulation.id.as_bytes(), value)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Simulation>> {
        let mut simulations = Vec::new();
        for item in self.db.iterator_cf(self.cf()?, IteratorMode::Start) {
            let (_key, value) = item?;
            simulations.push(serde_json::from_slice(&value)?);
        }
        Ok(simulations)
    }

    async fn update<T>(&self, id: Uuid, apply: impl FnOnce(&mut Simulation) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut simulation = self.read(id)?.ok_or_else(|| SimulationError::NotFound {
            entity: "simulation",
            id: id.to_string(),
        })?;
        let outcome = apply(&mut simulation)?;
        self.write(&simulation)?;
        Ok(outcome)
    }
}

#[async_trait]
impl SimulationStore for RocksDbSimulationStore {
    async fn insert(&self, simulation: Simulation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.db.get_pinned_cf(self.cf()?, simulation.id.as_bytes())?.is_some() {
            return Err(SimulationError::Storage(format!(
                "simulation {} already stored",
                simulation.id
            )));
        }
        self.write(&simulation)
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Simulation>> {
        Ok(self.read(id)?.filter(|s| s.tenant_id == tenant_id))
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
        Ok(self
            .scan()?
            .into_iter()
            .filter(|s| s.is_lapsed(now, lease))
            .map(|s| s.id)
            .collect())
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf()?;
        let mut purged = 0;
        for simulation in self.scan()? {
            if is_purgeable(simulation.status) && simulation.created_at < cutoff {
                self.db.delete_cf(cf, simulation.id.as_bytes())?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
