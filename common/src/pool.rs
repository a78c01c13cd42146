use crate::{Error, Result, get_client_name};
use async_trait::async_trait;
use kube::{
    Client, CustomResource, ResourceExt,
    api::{Api, ListParams, Patch, PatchParams},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Number of read-modify-write attempts before giving up on a contended pool
const MAX_CONFLICT_RETRIES: usize = 5;

/// Ingress controller flavour installed in a pool
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngressControllerType {
    #[default]
    Traefik,
    Istio,
    Nginx,
}

/// IngressControllerSpec describe how applications of the pool are exposed
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerSpec {
    /// IngressClass to use
    pub class_name: Option<String>,
    /// Public endpoint of the ingress controller
    pub service_endpoint: Option<String>,
    /// Ingress controller flavour
    #[serde(default, rename = "type")]
    pub ingress_type: IngressControllerType,
}

/// Describe a pool where applications can be deployed
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "Pool",
    status = "PoolStatus",
    shortname = "pool",
    group = "skipper.io",
    version = "v1"
)]
#[kube(
    doc = "Custom resource representing a pool of applications",
    printcolumn = r#"
    {"name":"namespace", "type":"string",  "description":"Namespace", "jsonPath":".spec.namespaceName"},
    {"name":"quota",     "type":"integer", "description":"Maximum number of apps", "jsonPath":".spec.appQuotaLimit"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    /// Namespace where the applications of this pool are deployed
    pub namespace_name: String,
    /// Maximum number of applications in this pool
    pub app_quota_limit: u32,
    /// Ingress settings
    #[serde(default)]
    pub ingress_controller: IngressControllerSpec,
}

/// The status object of `Pool`
#[derive(Deserialize, Serialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
pub struct PoolStatus {
    /// Applications holding a slot in this pool
    #[serde(default)]
    pub apps: Vec<String>,
}

impl Pool {
    pub fn apps(&self) -> Vec<String> {
        self.status.as_ref().map(|s| s.apps.clone()).unwrap_or_default()
    }

    pub fn has_app(&self, app: &str) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.apps.iter().any(|a| a == app))
    }

    pub fn app_count(&self) -> usize {
        self.status.as_ref().map(|s| s.apps.len()).unwrap_or(0)
    }

    /// Decide whether `app` may get a slot, without changing anything
    pub fn check_reservation(&self, app: &str) -> Reservation {
        if self.has_app(app) {
            Reservation::AlreadyHeld
        } else if self.app_count() >= self.spec.app_quota_limit as usize {
            Reservation::QuotaExceeded
        } else {
            Reservation::Acquired
        }
    }
}

/// Result of a slot reservation
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum Reservation {
    /// A new slot was taken for the application
    Acquired,
    /// The application was already holding a slot
    AlreadyHeld,
    /// No slot left in the pool
    QuotaExceeded,
}

/// Knows pools and their occupancy.
///
/// `try_reserve` and `release` are linearizable per pool: concurrent callers
/// against the same pool never over-admit.
#[async_trait]
pub trait PoolRegistry: Send + Sync {
    async fn resolve(&self, pool: &str) -> Result<Option<Pool>>;
    async fn try_reserve(&self, pool: &str, app: &str) -> Result<Reservation>;
    /// Releasing a slot that is not held, or in a missing pool, is not an error
    async fn release(&self, pool: &str, app: &str) -> Result<()>;
    /// Names of every pool where `app` holds a slot
    async fn holders(&self, app: &str) -> Result<Vec<String>>;
}

/// Raw access to pool occupancy
#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn get(&self, pool: &str) -> Result<Option<Pool>>;
    async fn list(&self) -> Result<Vec<Pool>>;
    /// Replace the occupancy of `pool`. Fails with a 409 when `pool` is not
    /// the latest version of the resource.
    async fn write_apps(&self, pool: &Pool, apps: Vec<String>) -> Result<()>;
}

/// PoolStore over the `Pool` custom resources.
///
/// Occupancy lives in `status.apps`. Every change is a merge patch carrying the
/// resourceVersion it was computed from, so a concurrent writer makes the
/// apiserver answer 409.
#[derive(Clone)]
pub struct KubePoolStore {
    api: Api<Pool>,
}

impl KubePoolStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait]
impl PoolStore for KubePoolStore {
    async fn get(&self, pool: &str) -> Result<Option<Pool>> {
        self.api.get_opt(pool).await.map_err(Error::KubeError)
    }

    async fn list(&self) -> Result<Vec<Pool>> {
        let pools = self.api.list(&ListParams::default()).await.map_err(Error::KubeError)?;
        Ok(pools.items)
    }

    async fn write_apps(&self, pool: &Pool, apps: Vec<String>) -> Result<()> {
        let patch = Patch::Merge(json!({
            "apiVersion": "skipper.io/v1",
            "kind": "Pool",
            "metadata": {
                "resourceVersion": pool.resource_version(),
            },
            "status": PoolStatus { apps },
        }));
        self.api
            .patch_status(&pool.name_any(), &PatchParams::apply(&get_client_name()), &patch)
            .await
            .map(|_| ())
            .map_err(Error::KubeError)
    }
}

fn is_conflict(e: &Error) -> bool {
    matches!(e, Error::KubeError(kube::Error::Api(ae)) if ae.code == 409)
}

/// Pool registry doing optimistic read-modify-write cycles on a PoolStore.
///
/// A conflicting write is recomputed from a fresh read, up to
/// `MAX_CONFLICT_RETRIES` times.
#[derive(Clone)]
pub struct CasPoolRegistry<S> {
    store: S,
}

/// Pool registry backed by the cluster
pub type KubePoolRegistry = CasPoolRegistry<KubePoolStore>;

impl KubePoolRegistry {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self::with_store(KubePoolStore::new(client))
    }
}

impl<S: PoolStore> CasPoolRegistry<S> {
    pub fn with_store(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: PoolStore> PoolRegistry for CasPoolRegistry<S> {
    async fn resolve(&self, pool: &str) -> Result<Option<Pool>> {
        self.store.get(pool).await
    }

    async fn try_reserve(&self, pool: &str, app: &str) -> Result<Reservation> {
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let Some(current) = self.store.get(pool).await? else {
                return Err(Error::Other(format!("pool \"{pool}\" disappeared")));
            };
            let reservation = current.check_reservation(app);
            if reservation != Reservation::Acquired {
                return Ok(reservation);
            }
            let mut apps = current.apps();
            apps.push(app.to_string());
            match self.store.write_apps(&current, apps).await {
                Ok(()) => {
                    tracing::debug!("Reserved a slot in pool {pool} for {app}");
                    return Ok(reservation);
                }
                Err(e) if is_conflict(&e) => {
                    tracing::debug!("Conflict while reserving in pool {pool} (attempt {attempt})");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::PoolConflict(pool.to_string()))
    }

    async fn release(&self, pool: &str, app: &str) -> Result<()> {
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let Some(current) = self.store.get(pool).await? else {
                return Ok(());
            };
            if !current.has_app(app) {
                return Ok(());
            }
            let apps = current.apps().into_iter().filter(|a| a != app).collect();
            match self.store.write_apps(&current, apps).await {
                Ok(()) => {
                    tracing::debug!("Released the slot of {app} in pool {pool}");
                    return Ok(());
                }
                Err(e) if is_conflict(&e) => {
                    tracing::debug!("Conflict while releasing in pool {pool} (attempt {attempt})");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::PoolConflict(pool.to_string()))
    }

    async fn holders(&self, app: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .filter(|p| p.has_app(app))
            .map(|p| p.name_any())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn pool(limit: u32, apps: &[&str]) -> Pool {
        let mut p = Pool::new("pool", PoolSpec {
            namespace_name: "ns".to_string(),
            app_quota_limit: limit,
            ingress_controller: IngressControllerSpec::default(),
        });
        p.status = Some(PoolStatus {
            apps: apps.iter().map(|a| a.to_string()).collect(),
        });
        p
    }

    #[test]
    fn test_check_reservation_free_slot() {
        assert_eq!(pool(2, &["a"]).check_reservation("b"), Reservation::Acquired);
    }

    #[test]
    fn test_check_reservation_full() {
        assert_eq!(pool(1, &["a"]).check_reservation("b"), Reservation::QuotaExceeded);
    }

    #[test]
    fn test_check_reservation_holder_is_not_counted_twice() {
        assert_eq!(pool(1, &["a"]).check_reservation("a"), Reservation::AlreadyHeld);
    }

    #[test]
    fn test_check_reservation_zero_quota() {
        let mut p = pool(0, &[]);
        p.status = None;
        assert_eq!(p.check_reservation("a"), Reservation::QuotaExceeded);
    }

    #[test]
    fn test_quota_lowered_below_usage_keeps_holders() {
        let p = pool(1, &["a", "b"]);
        assert_eq!(p.check_reservation("b"), Reservation::AlreadyHeld);
        assert_eq!(p.check_reservation("c"), Reservation::QuotaExceeded);
    }

    #[test]
    fn test_spec_field_names() {
        let spec: PoolSpec = serde_json::from_value(json!({
            "namespaceName": "apps",
            "appQuotaLimit": 3,
            "ingressController": {"className": "traefik", "type": "istio"}
        }))
        .unwrap();
        assert_eq!(spec.app_quota_limit, 3);
        assert_eq!(spec.ingress_controller.ingress_type, IngressControllerType::Istio);
    }

    /// In-memory PoolStore with resourceVersion checks and injectable conflicts
    #[derive(Default)]
    struct StoreMock {
        pools: std::sync::Mutex<std::collections::HashMap<String, Pool>>,
        forced_conflicts: AtomicUsize,
        writes: AtomicUsize,
    }

    impl StoreMock {
        fn with(pools: Vec<Pool>) -> Self {
            let store = Self::default();
            for mut p in pools {
                p.metadata.resource_version = Some("1".to_string());
                store.pools.lock().unwrap().insert(p.name_any(), p);
            }
            store
        }

        fn occupants(&self, pool: &str) -> Vec<String> {
            self.pools.lock().unwrap()[pool].apps()
        }
    }

    fn conflict() -> Error {
        Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    #[async_trait]
    impl PoolStore for StoreMock {
        async fn get(&self, pool: &str) -> Result<Option<Pool>> {
            Ok(self.pools.lock().unwrap().get(pool).cloned())
        }

        async fn list(&self) -> Result<Vec<Pool>> {
            Ok(self.pools.lock().unwrap().values().cloned().collect())
        }

        async fn write_apps(&self, pool: &Pool, apps: Vec<String>) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self
                .forced_conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(conflict());
            }
            let mut pools = self.pools.lock().unwrap();
            let Some(stored) = pools.get_mut(&pool.name_any()) else {
                return Err(Error::Other("gone".to_string()));
            };
            if stored.metadata.resource_version != pool.metadata.resource_version {
                return Err(conflict());
            }
            let version: u64 = stored.resource_version().unwrap_or_default().parse().unwrap_or(0);
            stored.metadata.resource_version = Some((version + 1).to_string());
            stored.status = Some(PoolStatus { apps });
            Ok(())
        }
    }

    fn named(name: &str, limit: u32, apps: &[&str]) -> Pool {
        let mut p = pool(limit, apps);
        p.metadata.name = Some(name.to_string());
        p
    }

    #[tokio::test]
    async fn test_reserve_retries_after_conflict() {
        let store = StoreMock::with(vec![named("p", 2, &[])]);
        store.forced_conflicts.store(1, Ordering::SeqCst);
        let reg = CasPoolRegistry::with_store(store);
        assert_eq!(reg.try_reserve("p", "a").await.unwrap(), Reservation::Acquired);
        assert_eq!(reg.store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(reg.store.occupants("p"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_reserve_gives_up_after_repeated_conflicts() {
        let store = StoreMock::with(vec![named("p", 2, &[])]);
        store.forced_conflicts.store(MAX_CONFLICT_RETRIES, Ordering::SeqCst);
        let reg = CasPoolRegistry::with_store(store);
        let err = reg.try_reserve("p", "a").await.unwrap_err();
        assert!(matches!(err, Error::PoolConflict(ref p) if p == "p"));
        assert_eq!(reg.store.writes.load(Ordering::SeqCst), MAX_CONFLICT_RETRIES);
        assert!(reg.store.occupants("p").is_empty());
    }

    #[tokio::test]
    async fn test_release_retries_after_conflict() {
        let store = StoreMock::with(vec![named("p", 2, &["a", "b"])]);
        store.forced_conflicts.store(2, Ordering::SeqCst);
        let reg = CasPoolRegistry::with_store(store);
        reg.release("p", "a").await.unwrap();
        assert_eq!(reg.store.occupants("p"), vec!["b"]);
    }

    #[tokio::test]
    async fn test_release_in_missing_pool_is_noop() {
        let reg = CasPoolRegistry::with_store(StoreMock::default());
        reg.release("missing", "a").await.unwrap();
        assert_eq!(reg.store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reserve_in_full_pool_does_not_write() {
        let reg = CasPoolRegistry::with_store(StoreMock::with(vec![named("p", 1, &["a"])]));
        assert_eq!(reg.try_reserve("p", "b").await.unwrap(), Reservation::QuotaExceeded);
        assert_eq!(reg.try_reserve("p", "a").await.unwrap(), Reservation::AlreadyHeld);
        assert_eq!(reg.store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_holders_lists_every_pool_with_the_app() {
        let reg = CasPoolRegistry::with_store(StoreMock::with(vec![
            named("p1", 2, &["a"]),
            named("p2", 2, &["b"]),
            named("p3", 2, &["a", "b"]),
        ]));
        let mut holders = reg.holders("a").await.unwrap();
        holders.sort();
        assert_eq!(holders, vec!["p1", "p3"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cas_reservations_never_over_admit() {
        let reg = Arc::new(CasPoolRegistry::with_store(StoreMock::with(vec![named("p", 3, &[])])));
        let mut handles = Vec::new();
        for i in 0..20 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move { reg.try_reserve("p", &format!("app-{i}")).await }));
        }
        let mut acquired = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(Reservation::Acquired) => acquired += 1,
                Ok(_) | Err(Error::PoolConflict(_)) => {}
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert!(acquired <= 3);
        assert_eq!(reg.store.occupants("p").len(), acquired);
    }
}
