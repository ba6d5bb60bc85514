use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::schema::KeySpec;

// ---------------------------------------------------------------------------
// Side + Value
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Target,
}

impl Default for Side {
    fn default() -> Self {
        Self::Target
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Number(f64),
}

static NULL: Value = Value::Null;

impl Value {
    /// Raw CSV cell → Value. Null markers left behind by upstream tooling read as Null.
    pub fn from_raw(raw: &str) -> Self {
        if is_null_token(raw) {
            Self::Null
        } else {
            Self::Text(raw.to_string())
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => is_null_token(s),
            Self::Number(n) => n.is_nan(),
        }
    }

    /// Key component form. `None` for null.
    pub fn as_key_part(&self) -> Option<String> {
        if self.is_null() {
            return None;
        }
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Null => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::from_raw(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// Cell spellings that mean "no value". Matched exactly: surrounding
/// whitespace and other casings are data.
pub const NULL_TOKENS: &[&str] = &["", "nan", "NaN", "null", "NULL"];

pub fn is_null_token(s: &str) -> bool {
    NULL_TOKENS.contains(&s)
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Composite key tuple, ordered by component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Key(pub Vec<String>);

impl Key {
    pub fn new<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Self(parts.into_iter().map(Into::into).collect())
    }
}

/// Components joined by `|`. A `|` or `\` inside a component gets a leading
/// `\`, so distinct keys never display the same.
impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            for c in part.chars() {
                if c == '|' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable point-in-time instance of one dataset, as loaded by ingestion.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dataset: String,
    pub side: Side,
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Snapshot {
    pub fn new(dataset: impl Into<String>, side: Side, columns: Vec<String>) -> Self {
        let column_index = columns.iter().enumerate().map(|(i, c)| (c.clone(), i)).collect();
        Self {
            dataset: dataset.into(),
            side,
            columns,
            column_index,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(
        dataset: impl Into<String>,
        side: Side,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, ReconError> {
        let mut snap = Self::new(dataset, side, columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            snap.push_row(row)?;
        }
        Ok(snap)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), ReconError> {
        if row.len() != self.columns.len() {
            return Err(ReconError::Io(format!(
                "dataset '{}' ({}): row {} has {} cells, expected {}",
                self.dataset,
                self.side,
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell lookup. A column this snapshot does not carry reads as Null.
    pub fn get(&self, row: usize, column: &str) -> &Value {
        self.column_index
            .get(column)
            .and_then(|&c| self.rows.get(row).and_then(|r| r.get(c)))
            .unwrap_or(&NULL)
    }

    pub fn record(&self, row: usize) -> Record<'_> {
        Record { snapshot: self, row }
    }

    fn require_key_columns(&self, spec: &KeySpec) -> Result<(), ReconError> {
        for f in &spec.fields {
            if !self.has_column(f) {
                return Err(ReconError::MissingColumn {
                    dataset: self.dataset.clone(),
                    side: self.side,
                    column: f.clone(),
                });
            }
        }
        Ok(())
    }

    /// Key of one row; `None` if any component is null.
    pub fn key_of(&self, row: usize, spec: &KeySpec) -> Option<Key> {
        spec.fields
            .iter()
            .map(|f| self.get(row, f).as_key_part())
            .collect::<Option<Vec<_>>>()
            .map(Key)
    }

    /// Distinct keys under `spec`. Null components read as `''`, so wider keys
    /// built from non-key fields still produce a key for every row.
    pub fn key_set(&self, spec: &KeySpec) -> Result<HashSet<Key>, ReconError> {
        Ok(self.group_by(spec)?.into_keys().collect())
    }

    /// Rows per key under `spec`, with the same null handling as [`Self::key_set`].
    pub fn group_by(&self, spec: &KeySpec) -> Result<HashMap<Key, Vec<usize>>, ReconError> {
        self.require_key_columns(spec)?;
        let mut groups: HashMap<Key, Vec<usize>> = HashMap::new();
        for row in 0..self.rows.len() {
            let key = Key(spec
                .fields
                .iter()
                .map(|f| self.get(row, f).as_key_part().unwrap_or_default())
                .collect());
            groups.entry(key).or_default().push(row);
        }
        Ok(groups)
    }

    /// Primary-key index. Null components and duplicate keys are rejected.
    pub fn index_by(&self, spec: &KeySpec) -> Result<HashMap<Key, usize>, ReconError> {
        self.require_key_columns(spec)?;

        let mut index: HashMap<Key, usize> = HashMap::with_capacity(self.rows.len());
        let mut counts: HashMap<Key, usize> = HashMap::new();
        for row in 0..self.rows.len() {
            let key = match self.key_of(row, spec) {
                Some(k) => k,
                None => {
                    let field = spec
                        .fields
                        .iter()
                        .find(|f| self.get(row, f).is_null())
                        .cloned()
                        .unwrap_or_default();
                    return Err(ReconError::NullKey {
                        dataset: self.dataset.clone(),
                        side: self.side,
                        row,
                        field,
                    });
                }
            };
            if index.contains_key(&key) {
                *counts.entry(key).or_insert(1) += 1;
            } else {
                index.insert(key, row);
            }
        }

        if let Some((key, count)) = counts.into_iter().min_by(|a, b| a.0.cmp(&b.0)) {
            return Err(ReconError::DuplicateKey {
                dataset: self.dataset.clone(),
                side: self.side,
                key: key.to_string(),
                count,
            });
        }
        Ok(index)
    }
}

/// One row of a snapshot, addressed by column name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    snapshot: &'a Snapshot,
    row: usize,
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> &'a Value {
        self.snapshot.get(self.row, column)
    }

    pub fn side(&self) -> Side {
        self.snapshot.side
    }

    pub fn row(&self) -> usize {
        self.row
    }
}

// ---------------------------------------------------------------------------
// Row counts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub source: usize,
    pub target: usize,
    /// target − source
    pub diff: i64,
}

impl RowCounts {
    pub fn of(source: &Snapshot, target: &Snapshot) -> Self {
        Self {
            source: source.len(),
            target: target.len(),
            diff: target.len() as i64 - source.len() as i64,
        }
    }
}
