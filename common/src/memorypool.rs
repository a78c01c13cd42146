use crate::{
    Result,
    pool::{Pool, PoolRegistry, PoolStatus, Reservation},
};
use async_trait::async_trait;
use kube::ResourceExt;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};

/// In-process pool registry.
///
/// Every pool is guarded by its own mutex, the outer lock is only held to
/// find that mutex. Useful to run the reconciler without a cluster.
#[derive(Clone, Default)]
pub struct MemoryPoolRegistry {
    pools: Arc<RwLock<HashMap<String, Arc<Mutex<Pool>>>>>,
}

impl MemoryPoolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a pool, keeping the occupancy it carries in its status
    pub async fn insert(&self, pool: Pool) {
        let name = pool.name_any();
        self.pools.write().await.insert(name, Arc::new(Mutex::new(pool)));
    }

    pub async fn remove(&self, pool: &str) {
        self.pools.write().await.remove(pool);
    }

    async fn entry(&self, pool: &str) -> Option<Arc<Mutex<Pool>>> {
        self.pools.read().await.get(pool).cloned()
    }
}

#[async_trait]
impl PoolRegistry for MemoryPoolRegistry {
    async fn resolve(&self, pool: &str) -> Result<Option<Pool>> {
        match self.entry(pool).await {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn try_reserve(&self, pool: &str, app: &str) -> Result<Reservation> {
        let Some(entry) = self.entry(pool).await else {
            return Err(crate::Error::Other(format!("pool \"{pool}\" disappeared")));
        };
        let mut current = entry.lock().await;
        let reservation = current.check_reservation(app);
        if reservation == Reservation::Acquired {
            current
                .status
                .get_or_insert_with(PoolStatus::default)
                .apps
                .push(app.to_string());
        }
        Ok(reservation)
    }

    async fn release(&self, pool: &str, app: &str) -> Result<()> {
        if let Some(entry) = self.entry(pool).await {
            let mut current = entry.lock().await;
            if let Some(status) = current.status.as_mut() {
                status.apps.retain(|a| a != app);
            }
        }
        Ok(())
    }

    async fn holders(&self, app: &str) -> Result<Vec<String>> {
        let entries: Vec<_> = self.pools.read().await.values().cloned().collect();
        let mut holders = Vec::new();
        for entry in entries {
            let current = entry.lock().await;
            if current.has_app(app) {
                holders.push(current.name_any());
            }
        }
        Ok(holders)
    }
}
