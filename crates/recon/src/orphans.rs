//! Orphan analysis under several key widths.
//!
//! The same dataset reconciled under a narrow key (claim id) and a wide key
//! (id + dates) yields different orphan populations; a record whose dates were
//! corrupted is matched under the narrow key and orphaned under the wide one.
//! Every width is reported side by side.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::ReconError;
use crate::reconcile::reconcile;
use crate::rules::{Expr, RuleContext};
use crate::schema::KeySpec;
use crate::snapshot::{Key, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanSet {
    pub key_width: String,
    pub key_fields: Vec<String>,
    pub missing: Vec<Key>,
    pub extra: Vec<Key>,
    /// Orphans the filter rejected.
    pub suppressed_missing: usize,
    pub suppressed_extra: usize,
}

/// Reconcile under each width in order. With a filter, an orphan is reported
/// only if at least one of its rows satisfies it.
pub fn find_orphans(
    source: &Snapshot,
    target: &Snapshot,
    widths: &[KeySpec],
    filter: Option<&Expr>,
) -> Result<Vec<OrphanSet>, ReconError> {
    widths
        .iter()
        .map(|width| {
            let source_groups = source.group_by(width)?;
            let target_groups = target.group_by(width)?;
            let source_keys: HashSet<Key> = source_groups.keys().cloned().collect();
            let target_keys: HashSet<Key> = target_groups.keys().cloned().collect();
            let sets = reconcile(&source_keys, &target_keys);

            let (missing, suppressed_missing) = apply_filter(sets.missing, source, &source_groups, filter);
            let (extra, suppressed_extra) = apply_filter(sets.extra, target, &target_groups, filter);
            if suppressed_missing + suppressed_extra > 0 {
                log::debug!(
                    "dataset '{}' width '{}': filter suppressed {suppressed_missing} missing, {suppressed_extra} extra",
                    source.dataset,
                    width.name
                );
            }

            Ok(OrphanSet {
                key_width: width.name.clone(),
                key_fields: width.fields.clone(),
                missing,
                extra,
                suppressed_missing,
                suppressed_extra,
            })
        })
        .collect()
}

fn apply_filter(
    keys: Vec<Key>,
    snap: &Snapshot,
    groups: &HashMap<Key, Vec<usize>>,
    filter: Option<&Expr>,
) -> (Vec<Key>, usize) {
    let Some(expr) = filter else {
        return (keys, 0);
    };
    let before = keys.len();
    let kept: Vec<Key> = keys
        .into_iter()
        .filter(|k| {
            groups
                .get(k)
                .map(|rows| rows.iter().any(|&r| expr.eval(&RuleContext::new(snap.record(r), None))))
                .unwrap_or(false)
        })
        .collect();
    let suppressed = before - kept.len();
    (kept, suppressed)
}

/// An orphan counts iff it has no death date, or its death year is on or
/// before the record year (`year(death) <= YEAR`).
pub fn death_year_filter(death_field: &str, year_field: &str) -> Expr {
    Expr::Any {
        of: vec![
            Expr::IsEmpty {
                field: death_field.into(),
            },
            Expr::YearLe {
                date_field: death_field.into(),
                year_field: year_field.into(),
            },
        ],
    }
}
