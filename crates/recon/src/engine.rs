use rayon::prelude::*;

use crate::config::{AuditConfig, DatasetConfig};
use crate::crosscheck::run_cross_check;
use crate::defects::build_defects;
use crate::error::ReconError;
use crate::model::{AuditInput, AuditMeta, AuditResult, AuditSummary, DatasetAudit};
use crate::orphans::find_orphans;
use crate::quality::{score_dataset, score_families, score_fields, score_opportunities, Scope, SubjectLevel};
use crate::reconcile::IndexedPair;
use crate::rules::{BusinessRule, Expr, RuleSet};
use crate::schema::{DatasetSchema, KeySpec};
use crate::snapshot::{RowCounts, Snapshot};
use crate::variance::analyze_variance;

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// Everything needed to audit one dataset: schema, rules, key widths, filter.
#[derive(Debug)]
pub struct DatasetPlan {
    pub schema: DatasetSchema,
    pub rules: RuleSet,
    /// Primary width first.
    pub widths: Vec<KeySpec>,
    pub orphan_filter: Option<Expr>,
}

impl DatasetPlan {
    /// Plan with the primary key as the only width and no rules.
    pub fn new(schema: DatasetSchema) -> Self {
        let widths = vec![schema.key.clone()];
        Self {
            schema,
            rules: RuleSet::new(),
            widths,
            orphan_filter: None,
        }
    }

    pub fn from_config(name: &str, config: &DatasetConfig) -> Result<Self, ReconError> {
        let schema = config.schema(name)?;
        let mut rules = RuleSet::new();
        for rule in config.expr_rules() {
            rule.validate(&schema)?;
            rules.push(Box::new(rule));
        }
        Ok(Self {
            widths: config.key_widths(&schema),
            orphan_filter: config.orphan_filter.clone(),
            schema,
            rules,
        })
    }

    pub fn with_rule(mut self, rule: impl BusinessRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn with_width(mut self, width: KeySpec) -> Self {
        self.widths.push(width);
        self
    }

    pub fn with_orphan_filter(mut self, filter: Expr) -> Self {
        self.orphan_filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditOptions {
    pub scope: Scope,
    pub numeric_tolerance: f64,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Reconcile, build the defect matrix, score it, rank variance, and analyze
/// orphans for one dataset.
pub fn audit_dataset(
    plan: &DatasetPlan,
    source: &Snapshot,
    target: &Snapshot,
    options: AuditOptions,
) -> Result<DatasetAudit, ReconError> {
    let schema = &plan.schema;
    log::info!(
        "dataset '{}': auditing {} source rows against {} target rows",
        schema.name,
        source.len(),
        target.len()
    );

    for field in &schema.fields {
        if !source.has_column(&field.name) && !target.has_column(&field.name) {
            return Err(ReconError::UnknownField {
                dataset: schema.name.clone(),
                field: field.name.clone(),
            });
        }
    }

    let pair = IndexedPair::new(source, target, &schema.key)?;
    let keys = pair.key_sets();

    let mut defects = build_defects(&pair, &keys.union(), &schema.fields, &plan.rules, options.numeric_tolerance);
    let quality = score_dataset(&defects, options.scope);
    let families = score_families(&defects, options.scope);
    let fields = score_fields(&defects, options.scope);
    let variance = analyze_variance(&pair, &keys.matched, &schema.fields, &plan.rules);
    let orphans = find_orphans(source, target, &plan.widths, plan.orphan_filter.as_ref())?;
    let coercion_warnings = std::mem::take(&mut defects.warnings);

    log::info!(
        "dataset '{}': {} matched, {} missing, {} extra, {} defects, sigma {}",
        schema.name,
        keys.matched.len(),
        keys.missing.len(),
        keys.extra.len(),
        quality.total_defects,
        quality
            .sigma_level
            .map(|s| format!("{s:.2}"))
            .unwrap_or_else(|| "undefined".into())
    );

    Ok(DatasetAudit {
        dataset: schema.name.clone(),
        key_fields: schema.key.fields.clone(),
        row_counts: RowCounts::of(source, target),
        keys,
        defects,
        quality,
        families,
        fields,
        variance,
        orphans,
        coercion_warnings,
    })
}

/// Run the audit per config. Every configured dataset must have input.
pub fn run(config: &AuditConfig, input: &AuditInput) -> Result<AuditResult, ReconError> {
    for name in input.datasets.keys() {
        if !config.datasets.contains_key(name) {
            return Err(ReconError::UnknownDataset(format!("input for '{name}' has no config")));
        }
    }

    let plans = config
        .datasets
        .iter()
        .map(|(name, ds)| DatasetPlan::from_config(name, ds))
        .collect::<Result<Vec<_>, _>>()?;

    let options = AuditOptions {
        scope: config.scoring.scope,
        numeric_tolerance: config.comparison.numeric_tolerance,
    };
    let mut result = run_plans(&config.name, &plans, input, options)?;

    for check in &config.cross_checks {
        let pair_of = |name: &str| {
            input.datasets.get(name).ok_or_else(|| {
                ReconError::UnknownDataset(format!("cross check '{}': dataset '{name}' has no input", check.name))
            })
        };
        let detail = plans
            .iter()
            .find(|p| p.schema.name == check.detail.dataset)
            .ok_or_else(|| ReconError::UnknownDataset(check.detail.dataset.clone()))?;
        let report = run_cross_check(
            check,
            pair_of(&check.aggregate.dataset)?,
            pair_of(&check.detail.dataset)?,
            &detail.schema,
            &detail.rules,
        );
        result.summary.cross_check_mismatches += report.mismatches();
        result.cross_checks.push(report);
    }
    Ok(result)
}

/// Run pre-built plans. Datasets are audited in parallel and reported in
/// name order.
pub fn run_plans(
    name: &str,
    plans: &[DatasetPlan],
    input: &AuditInput,
    options: AuditOptions,
) -> Result<AuditResult, ReconError> {
    let mut datasets = plans
        .par_iter()
        .map(|plan| {
            let pair = input.datasets.get(&plan.schema.name).ok_or_else(|| {
                ReconError::UnknownDataset(format!("dataset '{}' has no input", plan.schema.name))
            })?;
            audit_dataset(plan, &pair.source, &pair.target, options)
        })
        .collect::<Result<Vec<_>, _>>()?;
    datasets.sort_by(|a, b| a.dataset.cmp(&b.dataset));

    let summary = summarize(name, &datasets);
    Ok(AuditResult {
        meta: AuditMeta {
            config_name: name.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            scope: options.scope,
            numeric_tolerance: options.numeric_tolerance,
        },
        summary,
        datasets,
        cross_checks: Vec::new(),
    })
}

fn summarize(name: &str, datasets: &[DatasetAudit]) -> AuditSummary {
    let units = datasets.iter().map(|d| d.quality.total_units).sum();
    let defects = datasets.iter().map(|d| d.quality.total_defects).sum();
    let opportunities = datasets.iter().map(|d| d.quality.total_opportunities).sum();
    let defective = datasets.iter().map(|d| d.quality.defective_units).sum();
    AuditSummary {
        datasets: datasets.len(),
        missing: datasets.iter().map(|d| d.keys.missing.len()).sum(),
        extra: datasets.iter().map(|d| d.keys.extra.len()).sum(),
        matched: datasets.iter().map(|d| d.keys.matched.len()).sum(),
        coercion_warnings: datasets.iter().map(|d| d.coercion_warnings.len()).sum(),
        cross_check_mismatches: 0,
        overall: score_opportunities(name, SubjectLevel::Audit, units, defects, opportunities)
            .with_defective_units(defective),
    }
}
