//! CSV ingestion into snapshots.
//!
//! Only columns the dataset schema declares are kept. Numeric fields are
//! parsed with [`parse_financial_number`]; a value that does not parse is
//! kept as text so the comparison step can report the coercion.

use std::io::Read;
use std::path::Path;

use crate::error::ReconError;
use crate::schema::{DatasetSchema, FieldType};
use crate::snapshot::{is_null_token, Side, Snapshot, Value};

/// Load a snapshot from in-memory CSV text.
pub fn load_csv_snapshot(schema: &DatasetSchema, side: Side, csv_data: &str) -> Result<Snapshot, ReconError> {
    read_csv_snapshot(schema, side, csv_data.as_bytes())
}

/// Load a snapshot from a CSV file on disk.
pub fn load_csv_snapshot_file(schema: &DatasetSchema, side: Side, path: &Path) -> Result<Snapshot, ReconError> {
    let file = std::fs::File::open(path)
        .map_err(|e| ReconError::Io(format!("{}: {e}", path.display())))?;
    read_csv_snapshot(schema, side, std::io::BufReader::new(file))
}

pub fn read_csv_snapshot<R: Read>(schema: &DatasetSchema, side: Side, reader: R) -> Result<Snapshot, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Io(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    // (csv index, declared type) for every schema column present in the file.
    let mut keep: Vec<(usize, String, Option<FieldType>)> = Vec::new();
    for key_field in &schema.key.fields {
        if let Some(i) = headers.iter().position(|h| h == key_field) {
            keep.push((i, key_field.clone(), None));
        }
    }
    for field in &schema.fields {
        match headers.iter().position(|h| *h == field.name) {
            Some(i) => keep.push((i, field.name.clone(), Some(field.field_type))),
            None => log::warn!(
                "dataset '{}' ({side}): column '{}' absent, reading as null",
                schema.name,
                field.name
            ),
        }
    }

    let mut snapshot = Snapshot::new(
        schema.name.clone(),
        side,
        keep.iter().map(|(_, name, _)| name.clone()).collect(),
    );

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| ReconError::Io(format!("row {}: {e}", row_idx + 1)))?;
        let row = keep
            .iter()
            .map(|(i, _, ty)| {
                let raw = record.get(*i).unwrap_or("");
                match ty {
                    Some(FieldType::Numeric) => numeric_value(raw),
                    _ => Value::from_raw(raw),
                }
            })
            .collect();
        snapshot.push_row(row)?;
    }

    log::debug!(
        "dataset '{}' ({side}): loaded {} rows, {} columns",
        schema.name,
        snapshot.len(),
        snapshot.columns().len()
    );
    Ok(snapshot)
}

fn numeric_value(raw: &str) -> Value {
    // Blank padding around a number is formatting, not data.
    if is_null_token(raw.trim()) {
        return Value::Null;
    }
    match parse_financial_number(raw) {
        Some(n) => Value::Number(n),
        None => Value::Text(raw.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Financial number parsing
// ---------------------------------------------------------------------------

/// Parse a financial number string, handling common formats:
/// - Currency symbols: $1,234.56
/// - Thousands separators: 1,234,567
/// - Parenthesized negatives: (1,234.56) → -1234.56
/// - Exponent forms written by dataframe exports: 1.5e-05
///
/// Returns None for null markers and anything non-finite.
pub fn parse_financial_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if is_null_token(trimmed) {
        return None;
    }

    let (is_negative, inner) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let cleaned: String = inner
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let mut prev = None;
    for (i, c) in cleaned.chars().enumerate() {
        match c {
            '0'..='9' | '.' => {}
            'e' | 'E' if i > 0 => {}
            '-' | '+' if i == 0 && !is_negative => {}
            '-' | '+' if matches!(prev, Some('e' | 'E')) => {}
            _ => return None,
        }
        prev = Some(c);
    }

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if is_negative { -value } else { value })
}
