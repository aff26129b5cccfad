//! Tenant run scheduling.
//!
//! At most one run per tenant is in flight at a time. Different tenants
//! share nothing and run in parallel on a [`JoinSet`].

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use mailsync_core::TenantId;

use crate::error::{ReconcileResult, SchedulerError};

/// Single-flight registry of tenants with a run in progress.
#[derive(Debug, Clone, Default)]
pub struct TenantScheduler {
    in_flight: Arc<Mutex<HashSet<TenantId>>>,
}

/// Holds a tenant's run slot; releases it on drop.
#[derive(Debug)]
pub struct FlightGuard {
    tenant: TenantId,
    in_flight: Arc<Mutex<HashSet<TenantId>>>,
}

impl FlightGuard {
    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.tenant);
        debug!(tenant_id = %self.tenant, "Run slot released");
    }
}

fn lock(set: &Mutex<HashSet<TenantId>>) -> MutexGuard<'_, HashSet<TenantId>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TenantScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the run slot for `tenant`.
    ///
    /// # Errors
    /// `SchedulerError::AlreadyRunning` if the tenant's previous run is still
    /// in flight.
    pub fn try_acquire(&self, tenant: &TenantId) -> Result<FlightGuard, SchedulerError> {
        if !lock(&self.in_flight).insert(tenant.clone()) {
            return Err(SchedulerError::AlreadyRunning {
                tenant: tenant.clone(),
            });
        }
        Ok(FlightGuard {
            tenant: tenant.clone(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Whether `tenant` has a run in flight.
    #[must_use]
    pub fn is_running(&self, tenant: &TenantId) -> bool {
        lock(&self.in_flight).contains(tenant)
    }

    /// Run `job` while holding `tenant`'s slot.
    pub async fn run_exclusive<Fut, T>(&self, tenant: &TenantId, job: Fut) -> Result<T, SchedulerError>
    where
        Fut: Future<Output = ReconcileResult<T>>,
    {
        let _guard = self.try_acquire(tenant)?;
        Ok(job.await?)
    }

    /// Run `job` once per distinct tenant, in parallel.
    ///
    /// Results come back sorted by tenant. A tenant whose slot is taken
    /// reports `AlreadyRunning`; a panicking job reports `TaskFailed`.
    pub async fn run_tenants<F, Fut, T>(
        &self,
        tenants: impl IntoIterator<Item = TenantId>,
        job: F,
    ) -> Vec<(TenantId, Result<T, SchedulerError>)>
    where
        F: Fn(TenantId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReconcileResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let tenants: BTreeSet<TenantId> = tenants.into_iter().collect();
        let job = Arc::new(job);
        let mut join_set = JoinSet::new();

        for tenant in &tenants {
            let scheduler = self.clone();
            let job = Arc::clone(&job);
            let tenant = tenant.clone();
            join_set.spawn(async move {
                let result = match scheduler.try_acquire(&tenant) {
                    Ok(_guard) => job(tenant.clone()).await.map_err(SchedulerError::from),
                    Err(e) => Err(e),
                };
                (tenant, result)
            });
        }

        let mut results = Vec::with_capacity(tenants.len());
        let mut join_failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => {
                    warn!(error = %e, "Tenant run task failed");
                    join_failures.push(e.to_string());
                }
            }
        }

        if !join_failures.is_empty() {
            let message = join_failures.join("; ");
            let reported: HashSet<TenantId> =
                results.iter().map(|(tenant, _)| tenant.clone()).collect();
            for tenant in tenants.into_iter().filter(|t| !reported.contains(t)) {
                results.push((
                    tenant.clone(),
                    Err(SchedulerError::TaskFailed {
                        tenant,
                        message: message.clone(),
                    }),
                ));
            }
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}
