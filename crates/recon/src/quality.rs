//! Six Sigma scoring of a defect matrix: DPMO, yield, sigma level.
//!
//! `sigma_level = Φ⁻¹(yield) + 1.5`, using the exact inverse normal CDF.
//! Metrics that cannot be computed are reported in-band as `None` with a
//! reason, never clamped and never dropped.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::defects::DefectMatrix;
use crate::reconcile::KeyStatus;

/// Long-term process drift added to the short-term z score.
pub const SIGMA_SHIFT: f64 = 1.5;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which keys count as audited units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every key on either side; orphans count with all fields defective.
    #[default]
    Union,
    Matched,
}

impl Scope {
    pub fn includes(self, status: KeyStatus) -> bool {
        match self {
            Self::Union => true,
            Self::Matched => status == KeyStatus::Matched,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Union => write!(f, "union"),
            Self::Matched => write!(f, "matched"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metric
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedMetric {
    /// Zero opportunities: nothing was audited.
    NoOpportunities,
    /// Yield is 0 or 1; the inverse normal is unbounded there.
    YieldOutOfRange,
}

impl std::fmt::Display for UndefinedMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOpportunities => write!(f, "no_opportunities"),
            Self::YieldOutOfRange => write!(f, "yield_out_of_range"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectLevel {
    /// Every dataset of a run pooled together.
    Audit,
    Dataset,
    Family,
    Field,
}

impl std::fmt::Display for SubjectLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audit => write!(f, "audit"),
            Self::Dataset => write!(f, "dataset"),
            Self::Family => write!(f, "family"),
            Self::Field => write!(f, "field"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetric {
    pub subject: String,
    pub level: SubjectLevel,
    pub total_units: usize,
    pub total_defects: usize,
    /// Units with at least one defect.
    pub defective_units: usize,
    pub total_opportunities: usize,
    pub dpmo: Option<f64>,
    #[serde(rename = "yield")]
    pub yield_: Option<f64>,
    pub sigma_level: Option<f64>,
    /// Why `sigma_level` (and possibly `dpmo`/`yield`) is absent.
    pub undefined: Option<UndefinedMetric>,
}

impl QualityMetric {
    pub fn is_defined(&self) -> bool {
        self.undefined.is_none()
    }

    pub fn with_defective_units(mut self, units: usize) -> Self {
        self.defective_units = units;
        self
    }
}

/// Family metric with its share of the dataset's defects (Pareto order).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyMetric {
    #[serde(flatten)]
    pub metric: QualityMetric,
    pub running_pct_of_defects: Option<f64>,
}

/// `Φ⁻¹(yield) + 1.5`; `None` unless `0 < yield < 1`.
pub fn sigma_level(yield_: f64) -> Option<f64> {
    if !(yield_ > 0.0 && yield_ < 1.0) {
        return None;
    }
    let normal = Normal::new(0.0, 1.0).ok()?;
    let z = normal.inverse_cdf(yield_);
    z.is_finite().then_some(z + SIGMA_SHIFT)
}

/// Metric for `units` audited on `fields` fields each.
pub fn score(subject: impl Into<String>, level: SubjectLevel, units: usize, defects: usize, fields: usize) -> QualityMetric {
    score_opportunities(subject, level, units, defects, units * fields)
}

/// Metric from an explicit opportunity count, for subjects whose units do
/// not share one field count.
pub fn score_opportunities(
    subject: impl Into<String>,
    level: SubjectLevel,
    units: usize,
    defects: usize,
    opportunities: usize,
) -> QualityMetric {
    let mut metric = QualityMetric {
        subject: subject.into(),
        level,
        total_units: units,
        total_defects: defects,
        defective_units: 0,
        total_opportunities: opportunities,
        dpmo: None,
        yield_: None,
        sigma_level: None,
        undefined: None,
    };
    if opportunities == 0 {
        metric.undefined = Some(UndefinedMetric::NoOpportunities);
        return metric;
    }

    let rate = defects as f64 / opportunities as f64;
    let y = 1.0 - rate;
    metric.dpmo = Some(rate * 1_000_000.0);
    metric.yield_ = Some(y);
    metric.sigma_level = sigma_level(y);
    if metric.sigma_level.is_none() {
        metric.undefined = Some(UndefinedMetric::YieldOutOfRange);
    }
    metric
}

// ---------------------------------------------------------------------------
// Aggregation levels
// ---------------------------------------------------------------------------

fn included_rows(matrix: &DefectMatrix, scope: Scope) -> impl Iterator<Item = &crate::defects::DefectRow> {
    matrix.rows.iter().filter(move |r| scope.includes(r.status))
}

pub fn score_dataset(matrix: &DefectMatrix, scope: Scope) -> QualityMetric {
    let (units, defects, defective) = included_rows(matrix, scope).fold((0, 0, 0), |(u, d, n), r| {
        let row_defects = r.defects();
        (u + 1, d + row_defects, n + usize::from(row_defects > 0))
    });
    score(matrix.dataset.clone(), SubjectLevel::Dataset, units, defects, matrix.fields.len())
        .with_defective_units(defective)
}

/// Per-field metrics, in field order.
pub fn score_fields(matrix: &DefectMatrix, scope: Scope) -> Vec<QualityMetric> {
    let units = included_rows(matrix, scope).count();
    matrix
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let defects = included_rows(matrix, scope).filter(|r| r.flags[i].is_defect()).count();
            score(field.name.clone(), SubjectLevel::Field, units, defects, 1).with_defective_units(defects)
        })
        .collect()
}

/// Per-family metrics, Pareto ordered: defects desc, dpmo desc, family asc.
pub fn score_families(matrix: &DefectMatrix, scope: Scope) -> Vec<FamilyMetric> {
    let mut families: Vec<(&str, Vec<usize>)> = Vec::new();
    for (i, f) in matrix.fields.iter().enumerate() {
        match families.iter_mut().find(|(name, _)| *name == f.family) {
            Some((_, idxs)) => idxs.push(i),
            None => families.push((f.family.as_str(), vec![i])),
        }
    }

    let units = included_rows(matrix, scope).count();
    let mut metrics: Vec<QualityMetric> = families
        .iter()
        .map(|(family, idxs)| {
            let (defects, defective) = included_rows(matrix, scope)
                .map(|r| idxs.iter().filter(|&&i| r.flags[i].is_defect()).count())
                .fold((0, 0), |(d, n), row_defects| (d + row_defects, n + usize::from(row_defects > 0)));
            score(*family, SubjectLevel::Family, units, defects, idxs.len()).with_defective_units(defective)
        })
        .collect();

    metrics.sort_by(|a, b| {
        b.total_defects
            .cmp(&a.total_defects)
            .then_with(|| cmp_desc(a.dpmo, b.dpmo))
            .then_with(|| a.subject.cmp(&b.subject))
    });

    let total: usize = metrics.iter().map(|m| m.total_defects).sum();
    let mut running = 0usize;
    metrics
        .into_iter()
        .map(|metric| {
            running += metric.total_defects;
            FamilyMetric {
                running_pct_of_defects: (total > 0).then(|| running as f64 / total as f64),
                metric,
            }
        })
        .collect()
}

fn cmp_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    let a = a.unwrap_or(f64::NEG_INFINITY);
    let b = b.unwrap_or(f64::NEG_INFINITY);
    b.total_cmp(&a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defects::{CellFlag, DefectRow};
    use crate::schema::{Field, FieldType};
    use crate::snapshot::Key;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    fn matrix(fields: &[&str], rows: Vec<(&str, KeyStatus, Vec<CellFlag>)>) -> DefectMatrix {
        DefectMatrix {
            dataset: "claims".into(),
            fields: fields.iter().map(|f| Field::new(*f, FieldType::Numeric)).collect(),
            rows: rows
                .into_iter()
                .map(|(k, status, flags)| DefectRow { key: Key::new([k]), status, flags })
                .collect(),
            warnings: vec![],
        }
    }

    #[test]
    fn sigma_reference_values() {
        // 3.4 DPMO is the six sigma benchmark.
        assert!(close(sigma_level(0.9999966).unwrap(), 6.0, 0.01));
        assert!(close(sigma_level(0.9332).unwrap(), 3.0, 0.01));
        assert!(close(sigma_level(0.5).unwrap(), 1.5, 1e-9));
        // Above 3.4 DPMO quality, the exact transform lands past six.
        assert!(sigma_level(0.9999997).unwrap() > 6.0);
    }

    #[test]
    fn sigma_undefined_at_bounds() {
        assert_eq!(sigma_level(1.0), None);
        assert_eq!(sigma_level(0.0), None);
        assert_eq!(sigma_level(-0.1), None);
        assert_eq!(sigma_level(f64::NAN), None);
    }

    #[test]
    fn zero_opportunities_is_undefined_not_zero() {
        let m = score("empty", SubjectLevel::Dataset, 0, 0, 5);
        assert_eq!(m.undefined, Some(UndefinedMetric::NoOpportunities));
        assert_eq!(m.dpmo, None);
        assert_eq!(m.yield_, None);
        assert_eq!(m.sigma_level, None);
    }

    #[test]
    fn perfect_yield_keeps_dpmo_but_not_sigma() {
        let m = score("clean", SubjectLevel::Dataset, 10, 0, 3);
        assert_eq!(m.dpmo, Some(0.0));
        assert_eq!(m.yield_, Some(1.0));
        assert_eq!(m.sigma_level, None);
        assert_eq!(m.undefined, Some(UndefinedMetric::YieldOutOfRange));
    }

    #[test]
    fn dpmo_and_opportunities() {
        let m = score("x", SubjectLevel::Field, 2, 1, 1);
        assert_eq!(m.total_opportunities, 2);
        assert_eq!(m.dpmo, Some(500_000.0));
        assert!(close(m.sigma_level.unwrap(), 1.5, 1e-9));
    }

    #[test]
    fn scope_filters_units() {
        use CellFlag::*;
        let m = matrix(
            &["value"],
            vec![
                ("1", KeyStatus::Matched, vec![Clean]),
                ("2", KeyStatus::Matched, vec![Defect]),
                ("3", KeyStatus::Missing, vec![Defect]),
                ("4", KeyStatus::Extra, vec![Defect]),
            ],
        );
        let matched = score_dataset(&m, Scope::Matched);
        assert_eq!((matched.total_units, matched.total_defects), (2, 1));
        assert_eq!(matched.dpmo, Some(500_000.0));

        let union = score_dataset(&m, Scope::Union);
        assert_eq!((union.total_units, union.total_defects, union.total_opportunities), (4, 3, 4));
    }

    #[test]
    fn gated_cells_count_as_opportunities_only() {
        use CellFlag::*;
        let m = matrix(&["amt"], vec![("1", KeyStatus::Matched, vec![Gated]), ("2", KeyStatus::Matched, vec![Defect])]);
        let fields = score_fields(&m, Scope::Matched);
        assert_eq!(fields[0].total_opportunities, 2);
        assert_eq!(fields[0].total_defects, 1);
    }

    #[test]
    fn families_pareto_ordered() {
        use CellFlag::*;
        let m = matrix(
            &["PMT_1", "PMT_2", "DX", "CODE"],
            vec![
                ("1", KeyStatus::Matched, vec![Defect, Defect, Clean, Defect]),
                ("2", KeyStatus::Matched, vec![Clean, Defect, Clean, Defect]),
            ],
        );
        let fams = score_families(&m, Scope::Matched);
        let order: Vec<&str> = fams.iter().map(|f| f.metric.subject.as_str()).collect();
        // PMT has 3 defects over 4 opportunities; CODE 2 over 2; DX none.
        assert_eq!(order, vec!["PMT", "CODE", "DX"]);
        assert_eq!(fams[0].metric.total_opportunities, 4);
        assert!(close(fams[0].running_pct_of_defects.unwrap(), 0.6, 1e-12));
        assert!(close(fams[2].running_pct_of_defects.unwrap(), 1.0, 1e-12));
    }

    #[test]
    fn family_ties_break_on_dpmo_then_name() {
        use CellFlag::*;
        let m = matrix(
            &["B", "A", "C_1", "C_2"],
            vec![("1", KeyStatus::Matched, vec![Defect, Defect, Defect, Clean])],
        );
        let fams = score_families(&m, Scope::Matched);
        let order: Vec<&str> = fams.iter().map(|f| f.metric.subject.as_str()).collect();
        // All have one defect; A and B share dpmo 1e6, C has 5e5.
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn defective_units_count_rows_not_cells() {
        use CellFlag::*;
        let m = matrix(
            &["PMT_1", "PMT_2", "DX"],
            vec![
                ("1", KeyStatus::Matched, vec![Defect, Defect, Clean]),
                ("2", KeyStatus::Matched, vec![Clean, Gated, Defect]),
                ("3", KeyStatus::Matched, vec![Clean, Clean, Clean]),
                ("4", KeyStatus::Missing, vec![Defect, Defect, Defect]),
            ],
        );
        let matched = score_dataset(&m, Scope::Matched);
        assert_eq!((matched.total_defects, matched.defective_units), (3, 2));
        assert_eq!(score_dataset(&m, Scope::Union).defective_units, 3);

        let fams = score_families(&m, Scope::Matched);
        let pmt = fams.iter().find(|f| f.metric.subject == "PMT").unwrap();
        // Two defective slots on one claim line is one defective record.
        assert_eq!((pmt.metric.total_defects, pmt.metric.defective_units), (2, 1));
        let dx = fams.iter().find(|f| f.metric.subject == "DX").unwrap();
        assert_eq!(dx.metric.defective_units, 1);

        let fields = score_fields(&m, Scope::Matched);
        assert_eq!(fields.iter().map(|f| f.defective_units).collect::<Vec<_>>(), vec![1, 1, 1]);
    }

    #[test]
    fn no_defects_means_no_running_pct() {
        let m = matrix(&["A"], vec![("1", KeyStatus::Matched, vec![CellFlag::Clean])]);
        let fams = score_families(&m, Scope::Union);
        assert_eq!(fams[0].running_pct_of_defects, None);
    }
}
