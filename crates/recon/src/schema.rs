//! Schema registry: key fields, comparable value fields, and field families.
//!
//! Repeated line-item slots (`LINE_NCH_PMT_AMT_1..13`) are declared once as a
//! `(base, count)` spec and expanded here. Each slot is compared on its own,
//! but scored and ranked as one family.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Numeric,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Numeric => write!(f, "numeric"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Field {
    pub name: String,
    pub family: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let family = family_of(&name).to_string();
        Self { name, family, field_type }
    }

    /// Trailing line-item index, if the field name carries one.
    pub fn slot(&self) -> Option<u32> {
        slot_of(&self.name)
    }

    pub fn is_numeric(&self) -> bool {
        self.field_type == FieldType::Numeric
    }
}

/// Strip a trailing `_<digits>` suffix: `LINE_NCH_PMT_AMT_13` → `LINE_NCH_PMT_AMT`.
pub fn family_of(name: &str) -> &str {
    match split_slot(name) {
        Some((base, _)) => base,
        None => name,
    }
}

fn slot_of(name: &str) -> Option<u32> {
    split_slot(name).and_then(|(_, digits)| digits.parse().ok())
}

fn split_slot(name: &str) -> Option<(&str, &str)> {
    let (base, digits) = name.rsplit_once('_')?;
    if base.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((base, digits))
}

// ---------------------------------------------------------------------------
// Field specs (config form)
// ---------------------------------------------------------------------------

/// One entry of a dataset's `fields` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    Repeated {
        base: String,
        count: u32,
        #[serde(rename = "type")]
        field_type: FieldType,
    },
    Single {
        name: String,
        #[serde(rename = "type")]
        field_type: FieldType,
    },
}

impl FieldSpec {
    pub fn expand(&self) -> Vec<Field> {
        match self {
            Self::Single { name, field_type } => vec![Field::new(name.clone(), *field_type)],
            Self::Repeated { base, count, field_type } => (1..=*count)
                .map(|i| Field::new(format!("{base}_{i}"), *field_type))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeySpec {
    pub name: String,
    pub fields: Vec<String>,
}

impl KeySpec {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn validate(&self, dataset: &str) -> Result<(), ReconError> {
        if self.fields.is_empty() {
            return Err(ReconError::MalformedKey {
                dataset: dataset.into(),
                reason: format!("key '{}' has no fields", self.name),
            });
        }
        let mut seen = HashSet::new();
        for f in &self.fields {
            if f.trim().is_empty() {
                return Err(ReconError::MalformedKey {
                    dataset: dataset.into(),
                    reason: format!("key '{}' has an empty field name", self.name),
                });
            }
            if !seen.insert(f.as_str()) {
                return Err(ReconError::MalformedKey {
                    dataset: dataset.into(),
                    reason: format!("key '{}' repeats field '{f}'", self.name),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dataset schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSchema {
    pub name: String,
    pub key: KeySpec,
    pub fields: Vec<Field>,
}

impl DatasetSchema {
    pub fn new(name: impl Into<String>, key: KeySpec, specs: &[FieldSpec]) -> Result<Self, ReconError> {
        let schema = Self {
            name: name.into(),
            key,
            fields: specs.iter().flat_map(FieldSpec::expand).collect(),
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        self.key.validate(&self.name)?;

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ReconError::ConfigValidation(format!(
                    "dataset '{}': field '{}' declared twice",
                    self.name, field.name
                )));
            }
            if self.key.fields.contains(&field.name) {
                return Err(ReconError::MalformedKey {
                    dataset: self.name.clone(),
                    reason: format!("'{}' is both a key field and a value field", field.name),
                });
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Result<&Field, ReconError> {
        self.fields.iter().find(|f| f.name == name).ok_or_else(|| ReconError::UnknownField {
            dataset: self.name.clone(),
            field: name.into(),
        })
    }

    /// Key fields and value fields: every column the engine may read.
    pub fn has_column(&self, name: &str) -> bool {
        self.key.fields.iter().any(|k| k == name) || self.fields.iter().any(|f| f.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<(), ReconError> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(ReconError::UnknownField {
                dataset: self.name.clone(),
                field: name.into(),
            })
        }
    }

    /// Family names in order of first appearance.
    pub fn families(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for f in &self.fields {
            if !out.contains(&f.family.as_str()) {
                out.push(&f.family);
            }
        }
        out
    }

    pub fn fields_in_family<'a>(&'a self, family: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.family == family)
    }

    pub fn numeric_fields(&self) -> Vec<Field> {
        self.fields.iter().filter(|f| f.is_numeric()).cloned().collect()
    }
}
