use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::crosscheck::{self, CrossCheck};
use crate::error::ReconError;
use crate::quality::Scope;
use crate::rules::{Expr, ExprRule};
use crate::schema::{DatasetSchema, FieldSpec, KeySpec};
use crate::snapshot::Side;

/// Name of the width built from a dataset's own key.
pub const PRIMARY_WIDTH: &str = "primary";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuditConfig {
    pub name: String,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    pub datasets: BTreeMap<String, DatasetConfig>,
    /// Aggregate-versus-detail checks across datasets.
    #[serde(default)]
    pub cross_checks: Vec<CrossCheck>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComparisonConfig {
    /// Absolute tolerance for numeric fields. 0 means exact equality.
    #[serde(default)]
    pub numeric_tolerance: f64,
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// Source snapshot CSV, relative to the config file.
    pub source: String,
    /// Target snapshot CSV, relative to the config file.
    pub target: String,
    /// Primary key fields; order is significant.
    pub key: Vec<String>,
    pub fields: Vec<FieldSpec>,
    /// Additional key widths for orphan analysis.
    #[serde(default)]
    pub orphan_keys: Vec<KeySpec>,
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
    /// Which orphans count. Evaluated against the orphan's own record.
    #[serde(default)]
    pub orphan_filter: Option<Expr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Family names or field names the rule gates.
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub side: Side,
    pub valid_when: Expr,
}

impl DatasetConfig {
    pub fn schema(&self, name: &str) -> Result<DatasetSchema, ReconError> {
        let key_fields: Vec<&str> = self.key.iter().map(String::as_str).collect();
        DatasetSchema::new(name, KeySpec::new(PRIMARY_WIDTH, &key_fields), &self.fields)
    }

    /// Primary width first, then the declared orphan widths in order.
    pub fn key_widths(&self, schema: &DatasetSchema) -> Vec<KeySpec> {
        std::iter::once(schema.key.clone())
            .chain(self.orphan_keys.iter().cloned())
            .collect()
    }

    pub fn expr_rules(&self) -> Vec<ExprRule> {
        self.rules
            .iter()
            .map(|(name, rule)| ExprRule {
                name: name.clone(),
                applies_to: rule.applies_to.clone(),
                side: rule.side,
                valid_when: rule.valid_when.clone(),
            })
            .collect()
    }

    fn validate(&self, name: &str) -> Result<(), ReconError> {
        let schema = self.schema(name)?;
        if schema.fields.is_empty() {
            return Err(ReconError::ConfigValidation(format!(
                "dataset '{name}': at least one field is required"
            )));
        }

        let mut widths = HashSet::new();
        for width in &self.orphan_keys {
            if width.name == PRIMARY_WIDTH {
                return Err(ReconError::MalformedKey {
                    dataset: name.into(),
                    reason: format!("orphan key name '{PRIMARY_WIDTH}' is reserved"),
                });
            }
            if !widths.insert(width.name.as_str()) {
                return Err(ReconError::MalformedKey {
                    dataset: name.into(),
                    reason: format!("orphan key '{}' declared twice", width.name),
                });
            }
            width.validate(name)?;
            for f in &width.fields {
                schema.require_column(f)?;
            }
        }

        for rule in self.expr_rules() {
            rule.validate(&schema)?;
        }

        if let Some(ref filter) = self.orphan_filter {
            filter.validate(&schema, "orphan filter", &[])?;
        }
        Ok(())
    }
}

impl AuditConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: AuditConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.datasets.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least 1 dataset is required".into(),
            ));
        }

        let tol = self.comparison.numeric_tolerance;
        if !tol.is_finite() || tol < 0.0 {
            return Err(ReconError::ConfigValidation(format!(
                "numeric_tolerance must be a non-negative number, got {tol}"
            )));
        }

        for (name, dataset) in &self.datasets {
            dataset.validate(name)?;
        }

        crosscheck::validate_all(&self.cross_checks, &self.datasets)
    }

    pub fn dataset(&self, name: &str) -> Result<&DatasetConfig, ReconError> {
        self.datasets
            .get(name)
            .ok_or_else(|| ReconError::UnknownDataset(name.into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::carrier_payment_rule;

    const CARRIER: &str = r#"
name = "Carrier Claims 2008"

[scoring]
scope = "matched"

[datasets.carrier]
source = "src/carrier.csv"
target = "new/carrier.csv"
key = ["DESYNPUF_ID", "CLM_ID", "CLM_FROM_DT", "CLM_THRU_DT"]
fields = [
    { base = "LINE_NCH_PMT_AMT", count = 13, type = "numeric" },
    { base = "LINE_PRCSG_IND_CD", count = 13, type = "text" },
    { base = "LINE_ALOWD_CHRG_AMT", count = 13, type = "numeric" },
    { name = "CLM_PMT_AMT", type = "numeric" },
]

[[datasets.carrier.orphan_keys]]
name = "claim_id"
fields = ["CLM_ID"]

[datasets.carrier.rules.line_payment]
applies_to = ["LINE_NCH_PMT_AMT"]
valid_when = { op = "any", of = [{ op = "eq", field = "LINE_PRCSG_IND_CD_{n}", value = "A" }, { op = "all", of = [{ op = "in", field = "LINE_PRCSG_IND_CD_{n}", values = ["R", "S"] }, { op = "gt", field = "LINE_ALOWD_CHRG_AMT_{n}", value = 0 }] }] }
"#;

    const BENE: &str = r#"
name = "Beneficiary Summary"

[datasets.beneficiary]
source = "src/bene.csv"
target = "new/bene.csv"
key = ["DESYNPUF_ID", "YEAR"]
fields = [
    { name = "BENE_BIRTH_DT", type = "text" },
    { name = "BENE_DEATH_DT", type = "text" },
    { name = "MEDREIMB_IP", type = "numeric" },
]

[datasets.beneficiary.orphan_filter]
op = "any"
of = [
    { op = "is_empty", field = "BENE_DEATH_DT" },
    { op = "year_le", date_field = "BENE_DEATH_DT", year_field = "YEAR" },
]
"#;

    #[test]
    fn parse_carrier() {
        let config = AuditConfig::from_toml(CARRIER).unwrap();
        assert_eq!(config.name, "Carrier Claims 2008");
        assert_eq!(config.scoring.scope, Scope::Matched);
        assert_eq!(config.comparison.numeric_tolerance, 0.0);

        let ds = config.dataset("carrier").unwrap();
        let schema = ds.schema("carrier").unwrap();
        assert_eq!(schema.fields.len(), 40);
        assert_eq!(schema.key.fields.len(), 4);

        let widths = ds.key_widths(&schema);
        assert_eq!(widths[0].name, PRIMARY_WIDTH);
        assert_eq!(widths[1].fields, vec!["CLM_ID"]);

        let rules = ds.expr_rules();
        assert_eq!(rules[0].name, "line_payment");
        assert_eq!(rules[0].side, Side::Target);
        assert_eq!(rules[0].valid_when, carrier_payment_rule());
    }

    #[test]
    fn parse_orphan_filter() {
        let config = AuditConfig::from_toml(BENE).unwrap();
        assert_eq!(config.scoring.scope, Scope::Union);
        let ds = config.dataset("beneficiary").unwrap();
        assert_eq!(
            ds.orphan_filter,
            Some(crate::orphans::death_year_filter("BENE_DEATH_DT", "YEAR"))
        );
    }

    #[test]
    fn reject_no_datasets() {
        let err = AuditConfig::from_toml("name = \"x\"\n[datasets]\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }

    #[test]
    fn reject_unknown_rule_reference() {
        let input = CARRIER.replace("LINE_ALOWD_CHRG_AMT_{n}", "LINE_ALLOWED_{n}");
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::UnknownField { ref field, .. } if field == "LINE_ALLOWED_1"));
        assert!(err.is_configuration());
    }

    #[test]
    fn reject_unknown_orphan_width_field() {
        let input = CARRIER.replace("fields = [\"CLM_ID\"]", "fields = [\"CLAIM\"]");
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::UnknownField { .. }));
    }

    #[test]
    fn reject_reserved_width_name() {
        let input = CARRIER.replace("name = \"claim_id\"", "name = \"primary\"");
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::MalformedKey { .. }));
    }

    #[test]
    fn reject_negative_tolerance() {
        let input = format!("{BENE}\n[comparison]\nnumeric_tolerance = -0.5\n");
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("numeric_tolerance"));
    }

    #[test]
    fn reject_bad_scope() {
        let input = CARRIER.replace("scope = \"matched\"", "scope = \"everything\"");
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    const CROSS_CHECK: &str = r#"
[datasets.beneficiary]
source = "src/bene.csv"
target = "new/bene.csv"
key = ["DESYNPUF_ID", "YEAR"]
fields = [{ name = "MEDREIMB_CAR", type = "numeric" }]

[[cross_checks]]
name = "carrier_reimbursement"

[cross_checks.aggregate]
dataset = "beneficiary"
field = "MEDREIMB_CAR"
key = ["DESYNPUF_ID", "YEAR"]

[cross_checks.detail]
dataset = "carrier"
family = "LINE_NCH_PMT_AMT"
key = ["DESYNPUF_ID", { year_of = "CLM_FROM_DT" }]
"#;

    #[test]
    fn parse_cross_check() {
        let config = AuditConfig::from_toml(&format!("{CARRIER}{CROSS_CHECK}")).unwrap();
        let check = &config.cross_checks[0];
        assert_eq!(check.name, "carrier_reimbursement");
        assert_eq!(check.tolerance, crate::crosscheck::DEFAULT_TOLERANCE);
        assert_eq!(
            check.detail.key[1],
            crate::crosscheck::KeyPart::YearOf { year_of: "CLM_FROM_DT".into() }
        );
    }

    #[test]
    fn reject_cross_check_on_text_family() {
        let input = format!("{CARRIER}{CROSS_CHECK}").replace(
            "family = \"LINE_NCH_PMT_AMT\"",
            "family = \"LINE_PRCSG_IND_CD\"",
        );
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("not numeric"));
    }

    #[test]
    fn reject_cross_check_key_arity() {
        let input = format!("{CARRIER}{CROSS_CHECK}").replace("key = [\"DESYNPUF_ID\", \"YEAR\"]\n\n", "key = [\"DESYNPUF_ID\"]\n\n");
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("parts"));
    }

    #[test]
    fn reject_cross_check_unknown_dataset() {
        let input = format!("{CARRIER}{CROSS_CHECK}").replace("dataset = \"carrier\"", "dataset = \"outpatient\"");
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::UnknownDataset(_)));
    }

    #[test]
    fn reject_empty_key() {
        let input = BENE.replace("key = [\"DESYNPUF_ID\", \"YEAR\"]", "key = []");
        let err = AuditConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::MalformedKey { .. }));
    }
}
