use std::collections::BTreeMap;

use serde::Serialize;

use crate::crosscheck::CrossCheckReport;
use crate::defects::{CoercionWarning, DefectMatrix};
use crate::orphans::OrphanSet;
use crate::quality::{FamilyMetric, QualityMetric, Scope};
use crate::reconcile::KeySets;
use crate::snapshot::{RowCounts, Snapshot};
use crate::variance::VarianceReport;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Both snapshots of one dataset.
#[derive(Debug, Clone)]
pub struct SnapshotPair {
    pub source: Snapshot,
    pub target: Snapshot,
}

/// Pre-loaded snapshots keyed by dataset name.
#[derive(Debug, Default)]
pub struct AuditInput {
    pub datasets: BTreeMap<String, SnapshotPair>,
}

impl AuditInput {
    pub fn insert(&mut self, source: Snapshot, target: Snapshot) {
        self.datasets.insert(source.dataset.clone(), SnapshotPair { source, target });
    }
}

// ---------------------------------------------------------------------------
// Per-dataset output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DatasetAudit {
    pub dataset: String,
    pub key_fields: Vec<String>,
    pub row_counts: RowCounts,
    pub keys: KeySets,
    /// Cell-level matrix. Large; exported as a table, not embedded in JSON.
    #[serde(skip)]
    pub defects: DefectMatrix,
    pub quality: QualityMetric,
    pub families: Vec<FamilyMetric>,
    pub fields: Vec<QualityMetric>,
    pub variance: VarianceReport,
    pub orphans: Vec<OrphanSet>,
    pub coercion_warnings: Vec<CoercionWarning>,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AuditResult {
    pub meta: AuditMeta,
    pub summary: AuditSummary,
    /// In dataset name order.
    pub datasets: Vec<DatasetAudit>,
    /// In config order.
    pub cross_checks: Vec<CrossCheckReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub scope: Scope,
    pub numeric_tolerance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub datasets: usize,
    pub missing: usize,
    pub extra: usize,
    pub matched: usize,
    pub coercion_warnings: usize,
    /// Cross-check groups that disagree, both sides counted.
    pub cross_check_mismatches: usize,
    /// All datasets' opportunities pooled.
    pub overall: QualityMetric,
}

impl AuditSummary {
    /// No defective cells, no orphans under the primary key, and every
    /// cross-check group agrees.
    pub fn is_clean(&self) -> bool {
        self.overall.total_defects == 0 && self.missing == 0 && self.extra == 0 && self.cross_check_mismatches == 0
    }
}
