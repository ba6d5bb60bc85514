//! Defect matrix: one flag per (key, field) over the audited keys.
//!
//! Values are null-normalized before comparison (text → `''`, numeric → `0`).
//! A key present on only one side is maximally defective: every field is
//! flagged without consulting rules. On matched keys, a field gated by a
//! business rule that denies the record is flagged `Gated` and does not count
//! as a defect.

use rayon::prelude::*;
use serde::Serialize;

use crate::reconcile::{IndexedPair, KeyStatus};
use crate::rules::{RuleSet, Verdict};
use crate::schema::{Field, FieldType};
use crate::snapshot::{Key, Side, Snapshot, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellFlag {
    Clean,
    Defect,
    /// Discrepancy excused by a business rule.
    Gated,
}

impl CellFlag {
    pub fn is_defect(self) -> bool {
        self == Self::Defect
    }

    pub fn bit(self) -> u8 {
        u8::from(self.is_defect())
    }
}

impl std::fmt::Display for CellFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Defect => write!(f, "defect"),
            Self::Gated => write!(f, "gated"),
        }
    }
}

/// A value that did not fit its declared type and was null-normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionWarning {
    pub dataset: String,
    pub side: Side,
    pub key: String,
    pub field: String,
    pub value: String,
    pub declared: FieldType,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

pub fn normalize_text(value: &Value) -> String {
    if value.is_null() {
        return String::new();
    }
    match value {
        Value::Text(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
    }
}

/// Null → 0. Text that does not parse as a number is returned as `Err`
/// carrying the raw value; callers treat it as 0.
pub fn normalize_number(value: &Value) -> Result<f64, &str> {
    if value.is_null() {
        return Ok(0.0);
    }
    match value {
        Value::Number(n) => Ok(*n),
        Value::Text(s) => crate::ingest::parse_financial_number(s).ok_or(s.as_str()),
        Value::Null => Ok(0.0),
    }
}

pub(crate) fn numbers_differ(a: f64, b: f64, tolerance: f64) -> bool {
    if tolerance > 0.0 {
        (a - b).abs() > tolerance
    } else {
        a != b
    }
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefectRow {
    pub key: Key,
    pub status: KeyStatus,
    /// One flag per field, in matrix field order.
    pub flags: Vec<CellFlag>,
}

impl DefectRow {
    pub fn defects(&self) -> usize {
        self.flags.iter().filter(|f| f.is_defect()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DefectMatrix {
    pub dataset: String,
    pub fields: Vec<Field>,
    /// Sorted by key.
    pub rows: Vec<DefectRow>,
    pub warnings: Vec<CoercionWarning>,
}

impl DefectMatrix {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn row(&self, key: &Key) -> Option<&DefectRow> {
        self.rows
            .binary_search_by(|r| r.key.cmp(key))
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Defect count for one field across all rows.
    pub fn defects_for(&self, field: &str) -> usize {
        match self.field_index(field) {
            Some(i) => self.rows.iter().filter(|r| r.flags[i].is_defect()).count(),
            None => 0,
        }
    }

    pub fn total_defects(&self) -> usize {
        self.rows.iter().map(DefectRow::defects).sum()
    }

    /// Flat (key, field, flag) view in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (&Key, &Field, CellFlag)> + '_ {
        self.rows.iter().flat_map(move |row| {
            row.flags
                .iter()
                .zip(&self.fields)
                .map(move |(flag, field)| (&row.key, field, *flag))
        })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct Column {
    field_idx: usize,
    flags: Vec<CellFlag>,
    warnings: Vec<CoercionWarning>,
}

/// Build the matrix over `keys` (sorted, typically the key union).
pub fn build_defects(
    pair: &IndexedPair<'_>,
    keys: &[Key],
    fields: &[Field],
    rules: &RuleSet,
    tolerance: f64,
) -> DefectMatrix {
    let rows_of: Vec<(Option<usize>, Option<usize>)> = keys.iter().map(|k| pair.rows_of(k)).collect();

    // Group field indices by family, first appearance order.
    let mut families: Vec<(&str, Vec<usize>)> = Vec::new();
    for (i, f) in fields.iter().enumerate() {
        match families.iter_mut().find(|(name, _)| *name == f.family) {
            Some((_, idxs)) => idxs.push(i),
            None => families.push((f.family.as_str(), vec![i])),
        }
    }

    let mut columns: Vec<Column> = families
        .par_iter()
        .flat_map_iter(|(_, idxs)| {
            idxs.iter()
                .map(|&i| compare_column(pair, keys, &rows_of, i, &fields[i], rules, tolerance))
                .collect::<Vec<_>>()
        })
        .collect();
    columns.sort_by_key(|c| c.field_idx);

    let mut warnings = Vec::new();
    let mut rows: Vec<DefectRow> = keys
        .iter()
        .zip(&rows_of)
        .map(|(key, rows)| DefectRow {
            key: key.clone(),
            status: status_of(*rows),
            flags: Vec::with_capacity(fields.len()),
        })
        .collect();
    for col in columns {
        for (row, flag) in rows.iter_mut().zip(col.flags) {
            row.flags.push(flag);
        }
        warnings.extend(col.warnings);
    }

    DefectMatrix {
        dataset: pair.source.dataset.clone(),
        fields: fields.to_vec(),
        rows,
        warnings,
    }
}

fn status_of(rows: (Option<usize>, Option<usize>)) -> KeyStatus {
    match rows {
        (Some(_), Some(_)) => KeyStatus::Matched,
        (Some(_), None) => KeyStatus::Missing,
        _ => KeyStatus::Extra,
    }
}

fn compare_column(
    pair: &IndexedPair<'_>,
    keys: &[Key],
    rows_of: &[(Option<usize>, Option<usize>)],
    field_idx: usize,
    field: &Field,
    rules: &RuleSet,
    tolerance: f64,
) -> Column {
    let gated = rules.gates(field);
    let mut warnings = Vec::new();
    let flags = keys
        .iter()
        .zip(rows_of)
        .map(|(key, rows)| {
            let (s, t) = match rows {
                (Some(s), Some(t)) => (*s, *t),
                _ => return CellFlag::Defect,
            };
            if gated && rules.verdict(field, pair.source.record(s), pair.target.record(t)) == Verdict::Denied {
                return CellFlag::Gated;
            }
            let differ = match field.field_type {
                FieldType::Text => {
                    normalize_text(pair.source.get(s, &field.name)) != normalize_text(pair.target.get(t, &field.name))
                }
                FieldType::Numeric => {
                    let a = number_cell(pair.source, s, key, field, &mut warnings);
                    let b = number_cell(pair.target, t, key, field, &mut warnings);
                    numbers_differ(a, b, tolerance)
                }
            };
            if differ {
                CellFlag::Defect
            } else {
                CellFlag::Clean
            }
        })
        .collect();
    Column { field_idx, flags, warnings }
}

/// Numeric cell value, recording a coercion warning when it does not parse.
pub(crate) fn number_cell(
    snap: &Snapshot,
    row: usize,
    key: &Key,
    field: &Field,
    warnings: &mut Vec<CoercionWarning>,
) -> f64 {
    match normalize_number(snap.get(row, &field.name)) {
        Ok(n) => n,
        Err(raw) => {
            log::warn!(
                "dataset '{}' ({}): key {key} field {}: '{raw}' is not numeric, read as 0",
                snap.dataset,
                snap.side,
                field.name
            );
            warnings.push(CoercionWarning {
                dataset: snap.dataset.clone(),
                side: snap.side,
                key: key.to_string(),
                field: field.name.clone(),
                value: raw.to_string(),
                declared: field.field_type,
            });
            0.0
        }
    }
}
