//! `fidelity-recon`: migration fidelity engine.
//!
//! Compares a source and a target snapshot of each dataset: key
//! reconciliation, a per-cell defect matrix, Six Sigma scoring, a financial
//! variance Pareto, orphan analysis under several key widths, and
//! aggregate-versus-detail cross-checks between datasets.
//!
//! Pure engine crate: receives pre-loaded snapshots, returns results and flat
//! tables. CSV loading helpers live in [`ingest`]; file layout and exit codes
//! belong to the CLI.

pub mod config;
pub mod crosscheck;
pub mod defects;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod model;
pub mod orphans;
pub mod quality;
pub mod reconcile;
pub mod rules;
pub mod schema;
pub mod snapshot;
pub mod tables;
pub mod variance;

pub use config::AuditConfig;
pub use engine::{audit_dataset, run, run_plans, AuditOptions, DatasetPlan};
pub use error::ReconError;
pub use model::{AuditInput, AuditResult, DatasetAudit, SnapshotPair};
pub use quality::{QualityMetric, Scope};
pub use rules::{BusinessRule, Expr, Verdict};
pub use snapshot::{Key, Side, Snapshot, Value};
