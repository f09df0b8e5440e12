// On-disk layout of one tenant: `faiss_index.bin` and `metadata.txt`

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::flat_index::FlatIndex;
use super::metadata::{self, ChunkRecord};
use crate::{Result, RetrievalError};

pub const INDEX_FILE: &str = "faiss_index.bin";
/// JSON Lines, one `ChunkRecord` per line
pub const METADATA_FILE: &str = "metadata.txt";
/// Prefix of temporary files that have not been renamed into place yet
pub const PENDING_PREFIX: &str = ".pending-";

/// Both artifacts exactly as read, before any length reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct RawTenantState {
    pub index: FlatIndex,
    pub records: Vec<ChunkRecord>,
}

/// Whether `dir` holds a persisted index
#[inline]
pub fn exists(dir: &Path) -> bool {
    dir.join(INDEX_FILE).is_file()
}

/// Read both artifacts of a tenant.
///
/// Returns `None` when the index file is absent. A missing metadata log
/// next to an existing index reads as an empty log.
pub fn load(dir: &Path, tenant: &str) -> Result<Option<RawTenantState>> {
    let index_path = dir.join(INDEX_FILE);
    let metadata_path = dir.join(METADATA_FILE);

    let index_bytes = match fs::read(&index_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if metadata_path.exists() {
                warn!(
                    "Tenant {} has a metadata log but no index; treating it as empty",
                    tenant
                );
            }
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let index = FlatIndex::from_bytes(&index_bytes).map_err(|e| corruption(tenant, &e))?;

    let records = match fs::read_to_string(&metadata_path) {
        Ok(content) => metadata::decode_log(&content).map_err(|e| corruption(tenant, &e))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Tenant {} has an index but no metadata log", tenant);
            Vec::new()
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(corruption(tenant, &e));
        }
        Err(e) => return Err(e.into()),
    };

    debug!(
        "Loaded tenant {}: {} vectors, {} records",
        tenant,
        index.len(),
        records.len()
    );

    Ok(Some(RawTenantState { index, records }))
}

/// Replace both artifacts.
///
/// Each artifact is written and synced to a temporary file in `dir`, then
/// renamed over the live file, the metadata log first and the index second.
/// A crash between the two renames leaves a length disagreement that
/// loading detects and reconciles. Temporary files left behind by an
/// interrupted earlier write are removed first, so callers must hold the
/// tenant's write lock.
pub fn write(dir: &Path, index: &FlatIndex, records: &[ChunkRecord]) -> Result<()> {
    fs::create_dir_all(dir)?;
    sweep_pending(dir)?;

    let metadata_bytes =
        metadata::encode_log(records).map_err(|e| RetrievalError::Other(e.into()))?;
    let index_bytes = index.to_bytes();

    let metadata_tmp = write_pending(dir, &metadata_bytes)?;
    let index_tmp = write_pending(dir, &index_bytes)?;

    metadata_tmp
        .persist(dir.join(METADATA_FILE))
        .map_err(io::Error::from)?;
    index_tmp
        .persist(dir.join(INDEX_FILE))
        .map_err(io::Error::from)?;

    sync_dir(dir);

    debug!(
        "Persisted {} vectors and {} records to {}",
        index.len(),
        records.len(),
        dir.display()
    );
    Ok(())
}

fn write_pending(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(PENDING_PREFIX)
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    Ok(file)
}

/// Delete `.pending-*` files in `dir`, returning how many were removed
pub fn sweep_pending(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let stale = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(PENDING_PREFIX));
        if !stale || !entry.file_type()?.is_file() {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    if removed > 0 {
        warn!(
            "Removed {} stale pending file(s) from {}",
            removed,
            dir.display()
        );
    }
    Ok(removed)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Failed to sync directory {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn corruption(tenant: &str, error: &dyn std::fmt::Display) -> RetrievalError {
    RetrievalError::StorageCorruption {
        tenant: tenant.to_string(),
        reason: error.to_string(),
    }
}
