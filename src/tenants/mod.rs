//! Tenant directory access and the cross-tenant fan-out.
//!
//! Each tenant is an isolated event site with its own store. The aggregator
//! queries every tenant through a bounded worker pool and degrades instead
//! of aborting: one tenant's failure becomes a [`TenantError`] while the
//! rest of the fleet still contributes records.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::record::{RawRecord, RecordKind};

/// Numeric tenant (site) identifier as assigned by the platform directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TenantId(u64);

impl TenantId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why one tenant's query produced no records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantQueryError {
    #[error("tenant store unreachable: {0}")]
    Unreachable(String),
    #[error("query did not complete before the deadline")]
    Timeout,
    #[error("tenant returned an unreadable response: {0}")]
    Malformed(String),
}

/// A per-tenant failure captured during a fan-out. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantError {
    pub tenant: TenantId,
    pub error: TenantQueryError,
}

impl fmt::Display for TenantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tenant {}: {}", self.tenant, self.error)
    }
}

impl std::error::Error for TenantError {}

/// Which records one tenant query should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordScope {
    /// Financial records of the listed kinds, tagged by kind.
    Financial(Vec<RecordKind>),
    /// Event entities with their status logs and detail fields.
    Events,
}

/// Everything a tenant store needs to answer one report's query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub scope: RecordScope,
    pub start_ts: i64,
    pub end_ts: i64,
    pub public: bool,
    pub search: Option<String>,
}

/// Access to the tenant directory and per-tenant stores. Implementations
/// wrap whatever actually holds the data; the engine only sees raw records.
pub trait TenantSource: Send + Sync {
    /// Lists every tenant the engine should query.
    fn tenants(&self) -> Result<Vec<TenantId>, TenantQueryError>;

    /// Runs one query against one tenant's store.
    fn query(&self, tenant: TenantId, spec: &QuerySpec) -> Result<Vec<RawRecord>, TenantQueryError>;
}

/// Result of one fan-out: records from every tenant that answered, tagged
/// with their tenant, plus the failures.
///
/// Records from one tenant stay contiguous and in store order; blocks from
/// different tenants land in completion order, which is not deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateOutcome<T> {
    pub merged: Vec<(TenantId, T)>,
    pub failures: Vec<TenantError>,
}

impl<T> AggregateOutcome<T> {
    pub fn all_failed(&self, tenant_count: usize) -> bool {
        tenant_count > 0 && self.failures.len() == tenant_count
    }
}

/// Fans `query` out across tenants on a bounded worker pool.
///
/// Every tenant is attempted regardless of other tenants' failures. When a
/// `deadline` is given it caps the whole fan-out: once it passes, workers
/// stop picking up tenants, in-flight queries are abandoned, and each tenant
/// without an answer is recorded as timed out. Results already collected are
/// kept.
pub fn aggregate<T, F>(
    tenants: &[TenantId],
    workers: usize,
    deadline: Option<Duration>,
    query: F,
) -> AggregateOutcome<T>
where
    T: Send + 'static,
    F: Fn(TenantId) -> Result<Vec<T>, TenantQueryError> + Send + Sync + 'static,
{
    let mut merged = Vec::new();
    let mut failures = Vec::new();
    if tenants.is_empty() {
        return AggregateOutcome { merged, failures };
    }

    let tenants_shared: Arc<Vec<TenantId>> = Arc::new(tenants.to_vec());
    let query = Arc::new(query);
    let next_index = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let worker_count = workers.max(1).min(tenants_shared.len());
    for worker in 0..worker_count {
        let tenants_shared = Arc::clone(&tenants_shared);
        let query = Arc::clone(&query);
        let next_index = Arc::clone(&next_index);
        let cancelled = Arc::clone(&cancelled);
        let tx = tx.clone();
        thread::Builder::new()
            .name(format!("tenant-query-{worker}"))
            .spawn(move || loop {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let index = next_index.fetch_add(1, Ordering::Relaxed);
                let Some(tenant) = tenants_shared.get(index).copied() else {
                    break;
                };
                let result = query(tenant);
                if tx.send((tenant, result)).is_err() {
                    break;
                }
            })
            .ok();
    }
    drop(tx);

    let cutoff = deadline.map(|limit| Instant::now() + limit);
    let mut answered = BTreeSet::new();
    for _ in 0..tenants_shared.len() {
        let received = match cutoff {
            Some(cutoff) => {
                let remaining = cutoff.saturating_duration_since(Instant::now());
                rx.recv_timeout(remaining)
            }
            None => rx.recv().map_err(mpsc::RecvTimeoutError::from),
        };
        match received {
            Ok((tenant, Ok(records))) => {
                answered.insert(tenant);
                merged.extend(records.into_iter().map(|record| (tenant, record)));
            }
            Ok((tenant, Err(err))) => {
                answered.insert(tenant);
                warn!("tenant `{}` query failed: {}", tenant, err);
                failures.push(TenantError { tenant, error: err });
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!("fan-out deadline reached, abandoning in-flight tenant queries");
                cancelled.store(true, Ordering::Relaxed);
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    for tenant in tenants_shared.iter() {
        if !answered.contains(tenant) {
            failures.push(TenantError {
                tenant: *tenant,
                error: TenantQueryError::Timeout,
            });
        }
    }
    failures.sort_by_key(|failure| failure.tenant);

    AggregateOutcome { merged, failures }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[u64]) -> Vec<TenantId> {
        ids.iter().copied().map(TenantId::new).collect()
    }

    #[test]
    fn merges_every_tenant_and_keeps_blocks_contiguous() {
        let tenants = ids(&[1, 2, 3]);
        let outcome = aggregate(&tenants, 3, None, |tenant| {
            Ok(vec![
                format!("{}-a", tenant.as_u64()),
                format!("{}-b", tenant.as_u64()),
            ])
        });

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.merged.len(), 6);
        for pair in outcome.merged.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert!(pair[0].1.ends_with("-a"));
            assert!(pair[1].1.ends_with("-b"));
        }
    }

    #[test]
    fn one_failure_does_not_abort_the_rest() {
        let tenants = ids(&[1, 2, 3]);
        let outcome = aggregate(&tenants, 2, None, |tenant| {
            if tenant.as_u64() == 2 {
                Err(TenantQueryError::Unreachable("connection refused".into()))
            } else {
                Ok(vec![tenant.as_u64()])
            }
        });

        assert_eq!(outcome.merged.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].tenant, TenantId::new(2));
        assert!(matches!(
            outcome.failures[0].error,
            TenantQueryError::Unreachable(_)
        ));
    }

    #[test]
    fn all_failures_surface_with_an_empty_merge() {
        let tenants = ids(&[4, 5]);
        let outcome = aggregate::<u64, _>(&tenants, 2, None, |_| {
            Err(TenantQueryError::Unreachable("down".into()))
        });

        assert!(outcome.merged.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.all_failed(tenants.len()));
    }

    #[test]
    fn deadline_keeps_partials_and_times_out_stragglers() {
        let tenants = ids(&[1, 2, 3]);
        let outcome = aggregate(&tenants, 3, Some(Duration::from_millis(200)), |tenant| {
            if tenant.as_u64() == 3 {
                thread::sleep(Duration::from_secs(5));
            }
            Ok(vec![tenant.as_u64()])
        });

        let answered: BTreeSet<u64> = outcome
            .merged
            .iter()
            .map(|(tenant, _)| tenant.as_u64())
            .collect();
        assert_eq!(answered, BTreeSet::from([1, 2]));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].tenant, TenantId::new(3));
        assert_eq!(outcome.failures[0].error, TenantQueryError::Timeout);
    }

    #[test]
    fn empty_tenant_list_is_a_quiet_noop() {
        let outcome = aggregate::<u64, _>(&[], 4, None, |tenant| Ok(vec![tenant.as_u64()]));
        assert!(outcome.merged.is_empty());
        assert!(outcome.failures.is_empty());
        assert!(!outcome.all_failed(0));
    }
}
