//! Flat tabular projection of an audit result, one table per output.
//!
//! Every per-dataset table carries a `dataset` column so all datasets of a run
//! share one file per table; the cross-check tables carry the check name
//! instead. Undefined metrics render as empty cells.

use std::io::Write;

use crate::crosscheck::CrossCheckReport;
use crate::error::ReconError;
use crate::model::{AuditResult, DatasetAudit};
use crate::quality::QualityMetric;

pub const TABLE_NAMES: &[&str] = &[
    "missing_keys",
    "extra_keys",
    "defect_matrix",
    "quality_metrics",
    "variance_rows",
    "financial_differences",
    "orphan_sets",
    "row_counts",
    "coercion_warnings",
    "cross_checks",
    "cross_check_groups",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn new(name: &str, headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ReconError> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(&self.headers).map_err(|e| ReconError::Io(e.to_string()))?;
        for row in &self.rows {
            w.write_record(row).map_err(|e| ReconError::Io(e.to_string()))?;
        }
        w.flush().map_err(|e| ReconError::Io(e.to_string()))?;
        Ok(())
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

impl AuditResult {
    /// All output tables, in [`TABLE_NAMES`] order.
    pub fn tables(&self) -> Vec<Table> {
        vec![
            key_table("missing_keys", &self.datasets, |d| &d.keys.missing),
            key_table("extra_keys", &self.datasets, |d| &d.keys.extra),
            defect_matrix(&self.datasets),
            quality_metrics(&self.datasets),
            variance_rows(&self.datasets),
            financial_differences(&self.datasets),
            orphan_sets(&self.datasets),
            row_counts(&self.datasets),
            coercion_warnings(&self.datasets),
            cross_checks(&self.cross_checks),
            cross_check_groups(&self.cross_checks),
        ]
    }
}

fn key_table<'a, F>(name: &str, datasets: &'a [DatasetAudit], keys: F) -> Table
where
    F: Fn(&'a DatasetAudit) -> &'a Vec<crate::snapshot::Key>,
{
    let mut t = Table::new(name, &["dataset", "key"]);
    for d in datasets {
        for k in keys(d) {
            t.rows.push(vec![d.dataset.clone(), k.to_string()]);
        }
    }
    t
}

fn defect_matrix(datasets: &[DatasetAudit]) -> Table {
    let mut t = Table::new(
        "defect_matrix",
        &["dataset", "key", "status", "field", "family", "flag", "defect"],
    );
    for d in datasets {
        for row in &d.defects.rows {
            for (field, flag) in d.defects.fields.iter().zip(&row.flags) {
                t.rows.push(vec![
                    d.dataset.clone(),
                    row.key.to_string(),
                    row.status.to_string(),
                    field.name.clone(),
                    field.family.clone(),
                    flag.to_string(),
                    flag.bit().to_string(),
                ]);
            }
        }
    }
    t
}

fn metric_row(dataset: &str, m: &QualityMetric, running_pct: Option<f64>) -> Vec<String> {
    vec![
        dataset.to_string(),
        m.level.to_string(),
        m.subject.clone(),
        m.total_units.to_string(),
        m.total_defects.to_string(),
        m.defective_units.to_string(),
        m.total_opportunities.to_string(),
        opt(m.dpmo),
        opt(m.yield_),
        opt(m.sigma_level),
        m.undefined.map(|u| u.to_string()).unwrap_or_default(),
        opt(running_pct),
    ]
}

fn quality_metrics(datasets: &[DatasetAudit]) -> Table {
    let mut t = Table::new(
        "quality_metrics",
        &[
            "dataset",
            "level",
            "subject",
            "total_units",
            "total_defects",
            "defective_units",
            "total_opportunities",
            "dpmo",
            "yield",
            "sigma_level",
            "undefined",
            "running_pct_of_defects",
        ],
    );
    for d in datasets {
        t.rows.push(metric_row(&d.dataset, &d.quality, None));
        for f in &d.families {
            t.rows.push(metric_row(&d.dataset, &f.metric, f.running_pct_of_defects));
        }
        for f in &d.fields {
            t.rows.push(metric_row(&d.dataset, f, None));
        }
    }
    t
}

fn variance_rows(datasets: &[DatasetAudit]) -> Table {
    let mut t = Table::new(
        "variance_rows",
        &["dataset", "field_family", "financial_variance", "running_pct_of_total"],
    );
    for d in datasets {
        for r in &d.variance.rows {
            t.rows.push(vec![
                d.dataset.clone(),
                r.field_family.clone(),
                r.financial_variance.to_string(),
                opt(r.running_pct_of_total),
            ]);
        }
    }
    t
}

fn financial_differences(datasets: &[DatasetAudit]) -> Table {
    let mut t = Table::new("financial_differences", &["dataset", "key", "abs_delta"]);
    for d in datasets {
        for kv in &d.variance.by_key {
            t.rows.push(vec![d.dataset.clone(), kv.key.to_string(), kv.abs_delta.to_string()]);
        }
    }
    t
}

fn orphan_sets(datasets: &[DatasetAudit]) -> Table {
    let mut t = Table::new("orphan_sets", &["dataset", "key_width", "key_fields", "status", "key"]);
    for d in datasets {
        for set in &d.orphans {
            let fields = set.key_fields.join("|");
            for (status, keys) in [("missing", &set.missing), ("extra", &set.extra)] {
                for k in keys {
                    t.rows.push(vec![
                        d.dataset.clone(),
                        set.key_width.clone(),
                        fields.clone(),
                        status.to_string(),
                        k.to_string(),
                    ]);
                }
            }
        }
    }
    t
}

fn row_counts(datasets: &[DatasetAudit]) -> Table {
    let mut t = Table::new("row_counts", &["dataset", "source", "target", "diff"]);
    for d in datasets {
        t.rows.push(vec![
            d.dataset.clone(),
            d.row_counts.source.to_string(),
            d.row_counts.target.to_string(),
            d.row_counts.diff.to_string(),
        ]);
    }
    t
}

fn coercion_warnings(datasets: &[DatasetAudit]) -> Table {
    let mut t = Table::new(
        "coercion_warnings",
        &["dataset", "side", "key", "field", "value", "declared"],
    );
    for d in datasets {
        for w in &d.coercion_warnings {
            t.rows.push(vec![
                w.dataset.clone(),
                w.side.to_string(),
                w.key.clone(),
                w.field.clone(),
                w.value.clone(),
                w.declared.to_string(),
            ]);
        }
    }
    t
}

fn cross_checks(reports: &[CrossCheckReport]) -> Table {
    let mut t = Table::new(
        "cross_checks",
        &[
            "check",
            "side",
            "aggregate",
            "detail",
            "groups",
            "aggregate_total",
            "computed_total",
            "mismatched_groups",
        ],
    );
    for r in reports {
        for side in &r.sides {
            t.rows.push(vec![
                r.name.clone(),
                side.side.to_string(),
                format!("{}.{}", r.aggregate_dataset, r.aggregate_field),
                format!("{}.{}", r.detail_dataset, r.detail_family),
                side.groups.to_string(),
                side.aggregate_total.to_string(),
                side.computed_total.to_string(),
                side.mismatches.len().to_string(),
            ]);
        }
    }
    t
}

fn cross_check_groups(reports: &[CrossCheckReport]) -> Table {
    let mut t = Table::new("cross_check_groups", &["check", "side", "key", "aggregate", "computed", "delta"]);
    for r in reports {
        for side in &r.sides {
            for g in &side.mismatches {
                t.rows.push(vec![
                    r.name.clone(),
                    side.side.to_string(),
                    g.key.to_string(),
                    g.aggregate.to_string(),
                    g.computed.to_string(),
                    g.delta.to_string(),
                ]);
            }
        }
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{run_plans, AuditOptions, DatasetPlan};
    use crate::model::AuditInput;
    use crate::schema::{DatasetSchema, FieldSpec, FieldType, KeySpec};
    use crate::snapshot::{Side, Snapshot};

    fn result() -> AuditResult {
        let schema = DatasetSchema::new(
            "d",
            KeySpec::new("primary", &["id"]),
            &[FieldSpec::Single { name: "value".into(), field_type: FieldType::Text }],
        )
        .unwrap();
        let cols = &["id", "value"];
        let s = Snapshot::from_rows("d", Side::Source, cols, vec![vec!["1".into(), "A".into()], vec!["3".into(), "C".into()]]).unwrap();
        let t = Snapshot::from_rows("d", Side::Target, cols, vec![vec!["1".into(), "A".into()], vec!["4".into(), "D".into()]]).unwrap();
        let mut input = AuditInput::default();
        input.insert(s, t);
        run_plans("t", &[DatasetPlan::new(schema)], &input, AuditOptions::default()).unwrap()
    }

    #[test]
    fn projects_every_table() {
        let tables = result().tables();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, TABLE_NAMES);

        let missing = &tables[0];
        assert_eq!(missing.rows, vec![vec!["d".to_string(), "3".to_string()]]);

        let matrix = &tables[2];
        // Three keys × one field.
        assert_eq!(matrix.len(), 3);
        assert!(matrix.rows.iter().all(|r| r.len() == matrix.headers.len()));
    }

    #[test]
    fn undefined_metrics_render_empty() {
        let tables = result().tables();
        let quality = &tables[3];
        // value field: 1 clean of 3 -> defined; nothing here is at yield 1.
        let field_row = quality.rows.iter().find(|r| r[1] == "field").unwrap();
        assert_eq!(field_row[10], "");
        let variance = &tables[4];
        assert!(variance.is_empty());
    }

    #[test]
    fn csv_output_has_header() {
        let tables = result().tables();
        let mut buf = Vec::new();
        tables[7].write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "dataset,source,target,diff\nd,2,2,0\n");
    }
}
