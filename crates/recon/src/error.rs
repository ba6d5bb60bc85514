use std::fmt;

use crate::snapshot::Side;

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (empty dataset list, bad field spec, etc.).
    ConfigValidation(String),
    /// A field name that the dataset schema does not declare.
    UnknownField { dataset: String, field: String },
    /// Key spec is empty, repeats a field, or overlaps the value fields.
    MalformedKey { dataset: String, reason: String },
    /// Input was supplied for a dataset the config does not declare (or vice versa).
    UnknownDataset(String),
    /// Missing required column in input data.
    MissingColumn { dataset: String, side: Side, column: String },
    /// A primary key component is null.
    NullKey { dataset: String, side: Side, row: usize, field: String },
    /// The same primary key appears more than once in one snapshot.
    DuplicateKey { dataset: String, side: Side, key: String, count: usize },
    /// IO error (file read, CSV framing, etc.).
    Io(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::UnknownField { dataset, field } => {
                write!(f, "dataset '{dataset}': unknown field '{field}'")
            }
            Self::MalformedKey { dataset, reason } => {
                write!(f, "dataset '{dataset}': malformed key spec: {reason}")
            }
            Self::UnknownDataset(name) => write!(f, "unknown dataset: {name}"),
            Self::MissingColumn { dataset, side, column } => {
                write!(f, "dataset '{dataset}' ({side}): missing column '{column}'")
            }
            Self::NullKey { dataset, side, row, field } => {
                write!(f, "dataset '{dataset}' ({side}), row {row}: key field '{field}' is null")
            }
            Self::DuplicateKey { dataset, side, key, count } => {
                write!(f, "dataset '{dataset}' ({side}): key '{key}' appears {count} times")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}

impl ReconError {
    /// Configuration problems are detected before any computation starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse(_)
                | Self::ConfigValidation(_)
                | Self::UnknownField { .. }
                | Self::MalformedKey { .. }
                | Self::UnknownDataset(_)
        )
    }
}
