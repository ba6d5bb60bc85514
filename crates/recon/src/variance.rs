//! Financial variance Pareto over matched keys.
//!
//! For every matched key and numeric field: `|target − source|`, nulls read
//! as 0. Summed per family, sorted descending (family name breaks ties), with
//! a cumulative share of the total. Orphans have no meaningful delta and are
//! never zero-filled into the sums.

use rayon::prelude::*;
use serde::Serialize;

use crate::defects::normalize_number;
use crate::reconcile::IndexedPair;
use crate::rules::{RuleSet, Verdict};
use crate::schema::Field;
use crate::snapshot::Key;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarianceRow {
    pub field_family: String,
    pub financial_variance: f64,
    /// `None` when total variance is zero.
    pub running_pct_of_total: Option<f64>,
}

/// Summed absolute delta of one matched key across all numeric fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyVariance {
    pub key: Key,
    pub abs_delta: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VarianceReport {
    pub rows: Vec<VarianceRow>,
    /// Keys with non-zero delta, largest first.
    pub by_key: Vec<KeyVariance>,
    pub total: f64,
}

pub fn analyze_variance(pair: &IndexedPair<'_>, matched: &[Key], fields: &[Field], rules: &RuleSet) -> VarianceReport {
    // Keys without a row on both sides have no delta.
    let rows_of: Vec<(&Key, usize, usize)> = matched
        .iter()
        .filter_map(|k| match pair.rows_of(k) {
            (Some(s), Some(t)) => Some((k, s, t)),
            _ => None,
        })
        .collect();

    let mut families: Vec<(&str, Vec<&Field>)> = Vec::new();
    for f in fields.iter().filter(|f| f.is_numeric()) {
        match families.iter_mut().find(|(name, _)| *name == f.family) {
            Some((_, members)) => members.push(f),
            None => families.push((f.family.as_str(), vec![f])),
        }
    }

    // Per family: per-key absolute delta.
    let per_family: Vec<(&str, Vec<f64>)> = families
        .par_iter()
        .map(|(family, members)| {
            let deltas = rows_of
                .iter()
                .map(|&(_, s, t)| {
                    members
                        .iter()
                        .filter(|f| {
                            !rules.gates(f)
                                || rules.verdict(f, pair.source.record(s), pair.target.record(t)) == Verdict::Valid
                        })
                        .map(|f| {
                            let a = normalize_number(pair.source.get(s, &f.name)).unwrap_or(0.0);
                            let b = normalize_number(pair.target.get(t, &f.name)).unwrap_or(0.0);
                            (b - a).abs()
                        })
                        .sum::<f64>()
                })
                .collect();
            (*family, deltas)
        })
        .collect();

    let mut rows: Vec<VarianceRow> = per_family
        .iter()
        .map(|(family, deltas)| VarianceRow {
            field_family: family.to_string(),
            financial_variance: deltas.iter().sum(),
            running_pct_of_total: None,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.financial_variance
            .total_cmp(&a.financial_variance)
            .then_with(|| a.field_family.cmp(&b.field_family))
    });

    let total: f64 = rows.iter().map(|r| r.financial_variance).sum();
    if total > 0.0 {
        let mut running = 0.0;
        for row in &mut rows {
            running += row.financial_variance;
            row.running_pct_of_total = Some(running / total);
        }
    }

    let mut by_key: Vec<KeyVariance> = rows_of
        .iter()
        .enumerate()
        .map(|(i, &(key, _, _))| KeyVariance {
            key: key.clone(),
            abs_delta: per_family.iter().map(|(_, d)| d[i]).sum(),
        })
        .filter(|kv| kv.abs_delta != 0.0)
        .collect();
    by_key.sort_by(|a, b| b.abs_delta.total_cmp(&a.abs_delta).then_with(|| a.key.cmp(&b.key)));

    VarianceReport { rows, by_key, total }
}
