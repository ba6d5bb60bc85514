//! Aggregate-versus-detail cross-checks.
//!
//! A summary dataset carries pre-aggregated amounts (beneficiary annual
//! `MEDREIMB_CAR`); a detail dataset carries the line items they are built
//! from (carrier `LINE_NCH_PMT_AMT_n`). For each side independently, the
//! detail family is summed over rule-valid slots per group key and compared
//! with the aggregate field summed over the same key.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::DatasetConfig;
use crate::defects::normalize_number;
use crate::error::ReconError;
use crate::model::SnapshotPair;
use crate::rules::{Expr, RuleContext, RuleSet, Verdict};
use crate::schema::{DatasetSchema, Field};
use crate::snapshot::{Key, Record, Side, Snapshot};

/// Default absolute tolerance: half a cent.
pub const DEFAULT_TOLERANCE: f64 = 0.005;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// One component of a cross-check group key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// A column's value as-is.
    Field(String),
    /// Year prefix of a `YYYYMMDD` date column.
    YearOf { year_of: String },
}

impl KeyPart {
    fn column(&self) -> &str {
        match self {
            Self::Field(f) => f,
            Self::YearOf { year_of } => year_of,
        }
    }

    fn value(&self, record: &Record<'_>) -> String {
        let raw = record.get(self.column()).as_key_part().unwrap_or_default();
        match self {
            Self::Field(_) => raw,
            Self::YearOf { .. } => raw.get(..4).unwrap_or(raw.as_str()).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateSpec {
    pub dataset: String,
    /// Numeric field holding the pre-aggregated amount.
    pub field: String,
    pub key: Vec<KeyPart>,
    /// Rows for which this is false are left out of the totals.
    #[serde(default)]
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailSpec {
    pub dataset: String,
    /// Numeric family whose slots add up to the aggregate.
    pub family: String,
    pub key: Vec<KeyPart>,
    #[serde(default)]
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrossCheck {
    pub name: String,
    pub aggregate: AggregateSpec,
    pub detail: DetailSpec,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

impl CrossCheck {
    pub fn validate(&self, datasets: &BTreeMap<String, DatasetConfig>) -> Result<(), ReconError> {
        let fail = |msg: String| ReconError::ConfigValidation(format!("cross check '{}': {msg}", self.name));

        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(fail(format!("tolerance must be a non-negative number, got {}", self.tolerance)));
        }
        if self.aggregate.key.is_empty() {
            return Err(fail("group key is empty".into()));
        }
        if self.aggregate.key.len() != self.detail.key.len() {
            return Err(fail(format!(
                "aggregate key has {} parts, detail key has {}",
                self.aggregate.key.len(),
                self.detail.key.len()
            )));
        }

        let schema_of = |name: &str| -> Result<DatasetSchema, ReconError> {
            datasets
                .get(name)
                .ok_or_else(|| ReconError::UnknownDataset(format!("cross check '{}' reads '{name}'", self.name)))?
                .schema(name)
        };

        let aggregate = schema_of(&self.aggregate.dataset)?;
        let field = aggregate.field(&self.aggregate.field)?;
        if !field.is_numeric() {
            return Err(fail(format!("aggregate field '{}' is not numeric", field.name)));
        }
        for part in &self.aggregate.key {
            aggregate.require_column(part.column())?;
        }
        if let Some(ref filter) = self.aggregate.filter {
            filter.validate(&aggregate, &format!("cross check '{}'", self.name), &[])?;
        }

        let detail = schema_of(&self.detail.dataset)?;
        let members = detail_fields(&detail, &self.detail.family);
        if members.is_empty() {
            return Err(ReconError::UnknownField {
                dataset: detail.name.clone(),
                field: self.detail.family.clone(),
            });
        }
        if let Some(f) = members.iter().find(|f| !f.is_numeric()) {
            return Err(fail(format!("detail field '{}' is not numeric", f.name)));
        }
        for part in &self.detail.key {
            detail.require_column(part.column())?;
        }
        if let Some(ref filter) = self.detail.filter {
            filter.validate(&detail, &format!("cross check '{}'", self.name), &[])?;
        }
        Ok(())
    }
}

/// Fields of `family`, matching the family name or a single field name.
pub fn detail_fields(schema: &DatasetSchema, family: &str) -> Vec<Field> {
    schema
        .fields
        .iter()
        .filter(|f| f.family == family || f.name == family)
        .cloned()
        .collect()
}

/// Cross-check names must be unique within a config.
pub fn validate_all(checks: &[CrossCheck], datasets: &BTreeMap<String, DatasetConfig>) -> Result<(), ReconError> {
    let mut names = HashSet::new();
    for check in checks {
        if !names.insert(check.name.as_str()) {
            return Err(ReconError::ConfigValidation(format!(
                "cross check '{}' declared twice",
                check.name
            )));
        }
        check.validate(datasets)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One group whose aggregate and recomputed totals disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDelta {
    pub key: Key,
    pub aggregate: f64,
    pub computed: f64,
    /// `computed − aggregate`.
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideCheck {
    pub side: Side,
    /// Distinct group keys seen on either the aggregate or the detail rows.
    pub groups: usize,
    pub aggregate_total: f64,
    pub computed_total: f64,
    /// Largest absolute delta first, key ascending on ties.
    pub mismatches: Vec<GroupDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossCheckReport {
    pub name: String,
    pub aggregate_dataset: String,
    pub aggregate_field: String,
    pub detail_dataset: String,
    pub detail_family: String,
    /// Source first, then target.
    pub sides: Vec<SideCheck>,
}

impl CrossCheckReport {
    pub fn mismatches(&self) -> usize {
        self.sides.iter().map(|s| s.mismatches.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

fn group_key(parts: &[KeyPart], record: &Record<'_>) -> Key {
    Key(parts.iter().map(|p| p.value(record)).collect())
}

fn passes(filter: Option<&Expr>, record: Record<'_>) -> bool {
    filter.map_or(true, |f| f.eval(&RuleContext::new(record, None)))
}

fn aggregate_totals(check: &CrossCheck, snapshot: &Snapshot) -> BTreeMap<Key, f64> {
    let mut totals = BTreeMap::new();
    for row in 0..snapshot.len() {
        let record = snapshot.record(row);
        if !passes(check.aggregate.filter.as_ref(), record) {
            continue;
        }
        let amount = normalize_number(snapshot.get(row, &check.aggregate.field)).unwrap_or(0.0);
        *totals.entry(group_key(&check.aggregate.key, &record)).or_insert(0.0) += amount;
    }
    totals
}

/// Rule-valid slot amounts per group. Rules are judged on the same record.
fn detail_totals(check: &CrossCheck, snapshot: &Snapshot, fields: &[Field], rules: &RuleSet) -> BTreeMap<Key, f64> {
    let mut totals = BTreeMap::new();
    for row in 0..snapshot.len() {
        let record = snapshot.record(row);
        if !passes(check.detail.filter.as_ref(), record) {
            continue;
        }
        let amount: f64 = fields
            .iter()
            .filter(|f| !rules.gates(f) || rules.verdict_on(f, record) == Verdict::Valid)
            .map(|f| normalize_number(snapshot.get(row, &f.name)).unwrap_or(0.0))
            .sum();
        *totals.entry(group_key(&check.detail.key, &record)).or_insert(0.0) += amount;
    }
    totals
}

fn check_side(
    check: &CrossCheck,
    side: Side,
    aggregate: &Snapshot,
    detail: &Snapshot,
    fields: &[Field],
    rules: &RuleSet,
) -> SideCheck {
    let agg = aggregate_totals(check, aggregate);
    let det = detail_totals(check, detail, fields, rules);

    let keys: Vec<&Key> = {
        let mut keys: Vec<&Key> = agg.keys().chain(det.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    };

    let mut mismatches: Vec<GroupDelta> = keys
        .iter()
        .filter_map(|&key| {
            let aggregate = agg.get(key).copied().unwrap_or(0.0);
            let computed = det.get(key).copied().unwrap_or(0.0);
            let delta = computed - aggregate;
            (delta.abs() > check.tolerance).then(|| GroupDelta {
                key: key.clone(),
                aggregate,
                computed,
                delta,
            })
        })
        .collect();
    mismatches.sort_by(|a, b| b.delta.abs().total_cmp(&a.delta.abs()).then_with(|| a.key.cmp(&b.key)));

    if !mismatches.is_empty() {
        log::warn!(
            "cross check '{}' ({side}): {} of {} groups disagree",
            check.name,
            mismatches.len(),
            keys.len()
        );
    }

    SideCheck {
        side,
        groups: keys.len(),
        aggregate_total: agg.values().sum(),
        computed_total: det.values().sum(),
        mismatches,
    }
}

/// Compare aggregate and detail on both sides. `detail_schema` and `rules`
/// belong to the detail dataset.
pub fn run_cross_check(
    check: &CrossCheck,
    aggregate: &SnapshotPair,
    detail: &SnapshotPair,
    detail_schema: &DatasetSchema,
    rules: &RuleSet,
) -> CrossCheckReport {
    let fields = detail_fields(detail_schema, &check.detail.family);
    let sides = vec![
        check_side(check, Side::Source, &aggregate.source, &detail.source, &fields, rules),
        check_side(check, Side::Target, &aggregate.target, &detail.target, &fields, rules),
    ];
    CrossCheckReport {
        name: check.name.clone(),
        aggregate_dataset: check.aggregate.dataset.clone(),
        aggregate_field: check.aggregate.field.clone(),
        detail_dataset: check.detail.dataset.clone(),
        detail_family: check.detail.family.clone(),
        sides,
    }
}
