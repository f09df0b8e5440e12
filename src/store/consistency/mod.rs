// Index/log consistency checks
// Detects and reconciles length disagreements between the two tenant artifacts


use tracing::{info, warn};

use super::TenantSnapshot;
use super::disk::RawTenantState;

/// Consistency check results for one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub tenant: String,
    /// Dimension of the stored index
    pub dimension: usize,
    /// Number of vectors in the index blob
    pub index_rows: usize,
    /// Number of records in the metadata log
    pub log_rows: usize,
}

impl ConsistencyReport {
    #[inline]
    pub fn check(tenant: &str, raw: &RawTenantState) -> Self {
        Self {
            tenant: tenant.to_string(),
            dimension: raw.index.dimension(),
            index_rows: raw.index.len(),
            log_rows: raw.records.len(),
        }
    }

    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.index_rows == self.log_rows
    }

    /// Rows that survive reconciliation
    #[inline]
    pub fn usable_rows(&self) -> usize {
        self.index_rows.min(self.log_rows)
    }

    /// Rows dropped by reconciliation
    #[inline]
    pub fn dropped_rows(&self) -> usize {
        self.index_rows.abs_diff(self.log_rows)
    }

    fn log_issue(&self) {
        if self.index_rows > self.log_rows {
            warn!(
                "Integrity warning for tenant {}: index has {} vectors but metadata log has {} records; ignoring {} trailing vectors",
                self.tenant,
                self.index_rows,
                self.log_rows,
                self.dropped_rows()
            );
        } else {
            warn!(
                "Integrity warning for tenant {}: metadata log has {} records but index has {} vectors; ignoring {} trailing records",
                self.tenant,
                self.log_rows,
                self.index_rows,
                self.dropped_rows()
            );
        }
    }
}

/// Turn raw artifacts into a snapshot whose index and log agree.
///
/// The longer artifact is truncated to the shorter one's length. Trailing
/// rows are the ones a torn write leaves behind, so the common prefix is
/// the last state both artifacts agreed on.
#[inline]
pub fn reconcile(tenant: &str, raw: RawTenantState) -> (TenantSnapshot, ConsistencyReport) {
    let report = ConsistencyReport::check(tenant, &raw);
    let RawTenantState {
        mut index,
        mut records,
    } = raw;

    if !report.is_consistent() {
        report.log_issue();
        index.truncate(report.usable_rows());
        records.truncate(report.usable_rows());
        info!(
            "Tenant {} reconciled to {} rows",
            tenant,
            report.usable_rows()
        );
    }

    (TenantSnapshot { index, records }, report)
}
