// Tenant index store
// One flat vector index plus its parallel chunk log per tenant, persisted on disk

#[cfg(test)]
mod tests;

pub mod consistency;
pub mod disk;
pub mod flat_index;
pub mod metadata;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::{Result, RetrievalError};

pub use consistency::ConsistencyReport;
pub use flat_index::{FlatIndex, IndexError};
pub use metadata::ChunkRecord;

const MAX_TENANT_ID_LEN: usize = 128;

/// A tenant's index and chunk log as of one point in time.
///
/// Position `i` in the index belongs to record `i` in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantSnapshot {
    index: FlatIndex,
    records: Vec<ChunkRecord>,
}

impl TenantSnapshot {
    /// A fresh, empty snapshot for vectors of `dimension`
    #[inline]
    pub fn empty(dimension: usize) -> Result<Self> {
        let index = FlatIndex::new(dimension).map_err(|e| {
            RetrievalError::InvalidInput(format!("cannot create index: {}", e))
        })?;
        Ok(Self {
            index,
            records: Vec::new(),
        })
    }

    #[inline]
    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    #[inline]
    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    /// Chunk texts in position order
    #[inline]
    pub fn texts(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.text.as_str()).collect()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// One ranked search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Position of the chunk in the tenant's index
    pub position: usize,
    /// Squared Euclidean distance to the query
    pub distance: f32,
    pub text: String,
}

/// Durable per-tenant nearest-neighbour store.
///
/// Each tenant lives in `<root>/<tenant>/`. Writers to one tenant are
/// serialized by a per-tenant lock, and readers of that tenant hold the
/// same lock shared, so a reader never observes the index of one write
/// next to the log of another. Different tenants never contend.
#[derive(Debug)]
pub struct TenantIndexStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl TenantIndexStore {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Store rooted at the configured tenants directory
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tenants_dir())
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load a tenant's persisted state, or start an empty one.
    ///
    /// Fails with [`RetrievalError::DimensionMismatch`] when the persisted
    /// index was built for a different dimension.
    #[inline]
    pub async fn open_or_create(&self, tenant: &str, dimension: usize) -> Result<TenantSnapshot> {
        validate_tenant_id(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.read().await;

        let snapshot = match self.load_reconciled(tenant).await? {
            Some(snapshot) => {
                if snapshot.dimension() != dimension {
                    return Err(RetrievalError::DimensionMismatch {
                        tenant: tenant.to_string(),
                        stored: snapshot.dimension(),
                        requested: dimension,
                    });
                }
                debug!(
                    "Opened tenant {} with {} chunks",
                    tenant,
                    snapshot.len()
                );
                snapshot
            }
            None => {
                debug!(
                    "Creating new {}-dimensional index for tenant {}",
                    dimension, tenant
                );
                TenantSnapshot::empty(dimension)?
            }
        };

        Ok(snapshot)
    }

    /// Append chunk texts and their vectors, then persist.
    ///
    /// See [`TenantIndexStore::append_records`].
    #[inline]
    pub async fn append(
        &self,
        tenant: &str,
        handle: TenantSnapshot,
        vectors: Vec<Vec<f32>>,
        texts: Vec<String>,
    ) -> Result<TenantSnapshot> {
        let records = texts
            .into_iter()
            .map(|text| ChunkRecord::new(text, None))
            .collect();
        self.append_records(tenant, handle, vectors, records).await
    }

    /// Append records and their vectors at the end of the tenant's index, then persist.
    ///
    /// The tenant's persisted state is re-read under the write lock and the
    /// new rows go on top of it, so a `handle` that went stale because
    /// another writer appended in the meantime loses nothing. Returns the
    /// snapshot that was written. Empty input returns `handle` untouched.
    #[inline]
    pub async fn append_records(
        &self,
        tenant: &str,
        handle: TenantSnapshot,
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<TenantSnapshot> {
        validate_tenant_id(tenant)?;

        if vectors.len() != records.len() {
            return Err(RetrievalError::InvalidInput(format!(
                "got {} vectors for {} chunks",
                vectors.len(),
                records.len()
            )));
        }
        if vectors.is_empty() {
            return Ok(handle);
        }

        let dimension = handle.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(RetrievalError::DimensionMismatch {
                tenant: tenant.to_string(),
                stored: dimension,
                requested: bad.len(),
            });
        }

        let lock = self.lock_for(tenant);
        let _guard = lock.write().await;

        let handle_len = handle.len();
        let added = vectors.len();
        let mut current = match self.load_reconciled(tenant).await? {
            Some(current) => current,
            None => TenantSnapshot::empty(dimension)?,
        };

        if current.dimension() != dimension {
            return Err(RetrievalError::DimensionMismatch {
                tenant: tenant.to_string(),
                stored: current.dimension(),
                requested: dimension,
            });
        }
        if current.len() != handle_len {
            debug!(
                "Handle for tenant {} had {} chunks but {} are stored; appending onto stored state",
                tenant,
                handle_len,
                current.len()
            );
        }

        current
            .index
            .add(&vectors)
            .map_err(|e| index_error(tenant, e))?;
        current.records.extend(records);

        let dir = self.tenant_dir(tenant);
        let written = run_blocking(move || {
            disk::write(&dir, &current.index, &current.records)?;
            Ok(current)
        })
        .await?;

        info!(
            "Added {} chunks to tenant {}. Total: {}",
            added,
            tenant,
            written.len()
        );
        Ok(written)
    }

    /// Texts of the `k` stored chunks nearest to `query`, closest first.
    ///
    /// A tenant with nothing persisted yields an empty result.
    #[inline]
    pub async fn search(&self, tenant: &str, query: &[f32], k: usize) -> Result<Vec<String>> {
        Ok(self
            .search_scored(tenant, query, k)
            .await?
            .into_iter()
            .map(|hit| hit.text)
            .collect())
    }

    /// Like [`TenantIndexStore::search`], keeping positions and distances
    #[inline]
    pub async fn search_scored(
        &self,
        tenant: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        validate_tenant_id(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.read().await;

        let Some(snapshot) = self.load_reconciled(tenant).await? else {
            debug!("No index found for tenant {}", tenant);
            return Ok(Vec::new());
        };

        let hits = snapshot
            .index
            .search(query, k)
            .map_err(|e| index_error(tenant, e))?;

        let results: Vec<SearchHit> = hits
            .into_iter()
            .filter_map(|(position, distance)| {
                snapshot.records.get(position).map(|record| SearchHit {
                    position,
                    distance,
                    text: record.text.clone(),
                })
            })
            .collect();

        debug!(
            "Search for tenant {} returned {} of {} chunks",
            tenant,
            results.len(),
            snapshot.len()
        );
        Ok(results)
    }

    /// Consistency report for a tenant, `None` when nothing is persisted
    #[inline]
    pub async fn status(&self, tenant: &str) -> Result<Option<ConsistencyReport>> {
        validate_tenant_id(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.read().await;

        let tenant_owned = tenant.to_string();
        let dir = self.tenant_dir(tenant);
        run_blocking(move || {
            Ok(disk::load(&dir, &tenant_owned)?
                .map(|raw| ConsistencyReport::check(&tenant_owned, &raw)))
        })
        .await
    }

    /// Truncate a torn tenant to the rows both artifacts agree on and persist it.
    ///
    /// Returns the report from before the repair, `None` when nothing is
    /// persisted. Consistent tenants are left untouched.
    #[inline]
    pub async fn repair(&self, tenant: &str) -> Result<Option<ConsistencyReport>> {
        validate_tenant_id(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.write().await;

        let tenant_owned = tenant.to_string();
        let dir = self.tenant_dir(tenant);
        run_blocking(move || {
            let Some(raw) = disk::load(&dir, &tenant_owned)? else {
                return Ok(None);
            };
            let (snapshot, report) = consistency::reconcile(&tenant_owned, raw);
            if !report.is_consistent() {
                disk::write(&dir, &snapshot.index, &snapshot.records)?;
                info!(
                    "Repaired tenant {}: dropped {} rows, {} remain",
                    tenant_owned,
                    report.dropped_rows(),
                    snapshot.len()
                );
            } else {
                disk::sweep_pending(&dir)?;
            }
            Ok(Some(report))
        })
        .await
    }

    /// Tenants with a persisted index, sorted
    #[inline]
    pub async fn tenants(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        run_blocking(move || {
            let entries = match std::fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut tenants = Vec::new();
            for entry in entries {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if validate_tenant_id(&name).is_ok() && disk::exists(&entry.path()) {
                    tenants.push(name);
                }
            }
            tenants.sort();
            Ok(tenants)
        })
        .await
    }

    fn tenant_dir(&self, tenant: &str) -> PathBuf {
        self.root.join(tenant)
    }

    fn lock_for(&self, tenant: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(tenant.to_string()).or_default())
    }

    /// Load and reconcile; callers hold the tenant lock
    async fn load_reconciled(&self, tenant: &str) -> Result<Option<TenantSnapshot>> {
        let tenant_owned = tenant.to_string();
        let dir = self.tenant_dir(tenant);
        run_blocking(move || {
            Ok(disk::load(&dir, &tenant_owned)?
                .map(|raw| consistency::reconcile(&tenant_owned, raw).0))
        })
        .await
    }
}

/// Tenant ids name directories, so only a conservative character set is allowed
#[inline]
pub fn validate_tenant_id(tenant: &str) -> Result<()> {
    let valid = !tenant.is_empty()
        && tenant.len() <= MAX_TENANT_ID_LEN
        && tenant != "."
        && tenant != ".."
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(RetrievalError::InvalidInput(format!(
            "invalid tenant id '{}': use 1-{} ASCII letters, digits, '-', '_' or '.'",
            tenant, MAX_TENANT_ID_LEN
        )))
    }
}

fn index_error(tenant: &str, error: IndexError) -> RetrievalError {
    match error {
        IndexError::DimensionMismatch { expected, found } => RetrievalError::DimensionMismatch {
            tenant: tenant.to_string(),
            stored: expected,
            requested: found,
        },
        other => RetrievalError::StorageCorruption {
            tenant: tenant.to_string(),
            reason: other.to_string(),
        },
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RetrievalError::Other(anyhow::anyhow!("storage task failed: {}", e)))?
}
