//! Business rule classifier.
//!
//! A rule decides, per record, whether a discrepancy on the fields it gates
//! is a real defect (`Valid`) or an expected non-payment (`Denied`). Rules are
//! data: either an [`Expr`] tree read from config or a registered closure.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::ingest::parse_financial_number;
use crate::schema::{DatasetSchema, Field};
use crate::snapshot::{Record, Side, Value};

/// Placeholder for the gated field's line-item slot.
pub const SLOT_PLACEHOLDER: &str = "{n}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Denied,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule context
// ---------------------------------------------------------------------------

/// One side's record, plus the slot of the field being judged.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    record: Record<'a>,
    slot: Option<u32>,
}

impl<'a> RuleContext<'a> {
    pub fn new(record: Record<'a>, slot: Option<u32>) -> Self {
        Self { record, slot }
    }

    pub fn resolve<'r>(&self, field_ref: &'r str) -> Cow<'r, str> {
        match self.slot {
            Some(n) if field_ref.contains(SLOT_PLACEHOLDER) => {
                Cow::Owned(field_ref.replace(SLOT_PLACEHOLDER, &n.to_string()))
            }
            _ => Cow::Borrowed(field_ref),
        }
    }

    pub fn value(&self, field_ref: &str) -> &'a Value {
        self.record.get(&self.resolve(field_ref))
    }

    /// Null reads as `''`.
    pub fn text(&self, field_ref: &str) -> String {
        let v = self.value(field_ref);
        if v.is_null() {
            return String::new();
        }
        match v {
            Value::Text(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
        }
    }

    /// Null and non-numeric text read as 0.
    pub fn number(&self, field_ref: &str) -> f64 {
        match self.value(field_ref) {
            Value::Number(n) if !n.is_nan() => *n,
            Value::Text(s) => parse_financial_number(s).unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Rule trait
// ---------------------------------------------------------------------------

pub trait BusinessRule: Send + Sync {
    fn name(&self) -> &str;

    /// True if this rule judges discrepancies on `field`.
    fn gates(&self, field: &Field) -> bool;

    /// Which side's record the rule reads.
    fn side(&self) -> Side {
        Side::Target
    }

    fn classify(&self, ctx: &RuleContext<'_>) -> Verdict;
}

fn applies(applies_to: &[String], field: &Field) -> bool {
    applies_to.iter().any(|a| *a == field.family || *a == field.name)
}

// ---------------------------------------------------------------------------
// Expression trees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    All { of: Vec<Expr> },
    Any { of: Vec<Expr> },
    Not { expr: Box<Expr> },
    Eq { field: String, value: String },
    Ne { field: String, value: String },
    In { field: String, values: Vec<String> },
    Gt { field: String, value: f64 },
    Ge { field: String, value: f64 },
    Lt { field: String, value: f64 },
    Le { field: String, value: f64 },
    IsEmpty { field: String },
    /// Year prefix of a date (`YYYYMMDD`) on or before a year field.
    YearLe { date_field: String, year_field: String },
}

impl Expr {
    pub fn eval(&self, ctx: &RuleContext<'_>) -> bool {
        match self {
            Self::All { of } => of.iter().all(|e| e.eval(ctx)),
            Self::Any { of } => of.iter().any(|e| e.eval(ctx)),
            Self::Not { expr } => !expr.eval(ctx),
            Self::Eq { field, value } => ctx.text(field) == *value,
            Self::Ne { field, value } => ctx.text(field) != *value,
            Self::In { field, values } => {
                let v = ctx.text(field);
                values.iter().any(|x| *x == v)
            }
            Self::Gt { field, value } => ctx.number(field) > *value,
            Self::Ge { field, value } => ctx.number(field) >= *value,
            Self::Lt { field, value } => ctx.number(field) < *value,
            Self::Le { field, value } => ctx.number(field) <= *value,
            Self::IsEmpty { field } => ctx.value(field).is_null(),
            Self::YearLe { date_field, year_field } => {
                let date = ctx.text(date_field);
                let year = ctx.text(year_field);
                match (date.get(..4).and_then(|y| y.parse::<i64>().ok()), parse_year(&year)) {
                    (Some(d), Some(y)) => d <= y,
                    _ => false,
                }
            }
        }
    }

    /// Every field reference in the tree, unresolved.
    pub fn field_refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::All { of } | Self::Any { of } => of.iter().for_each(|e| e.collect_refs(out)),
            Self::Not { expr } => expr.collect_refs(out),
            Self::Eq { field, .. }
            | Self::Ne { field, .. }
            | Self::In { field, .. }
            | Self::Gt { field, .. }
            | Self::Ge { field, .. }
            | Self::Lt { field, .. }
            | Self::Le { field, .. }
            | Self::IsEmpty { field } => out.push(field),
            Self::YearLe { date_field, year_field } => {
                out.push(date_field);
                out.push(year_field);
            }
        }
    }

    /// Reject references the schema does not declare. `slots` are the slots of
    /// the fields this expression will be judged for; empty means no `{n}`.
    pub fn validate(&self, schema: &DatasetSchema, owner: &str, slots: &[Option<u32>]) -> Result<(), ReconError> {
        for r in self.field_refs() {
            if !r.contains(SLOT_PLACEHOLDER) {
                schema.require_column(r)?;
                continue;
            }
            if slots.is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "dataset '{}': {owner}: '{r}' uses {SLOT_PLACEHOLDER} but judges no slotted field",
                    schema.name
                )));
            }
            for slot in slots {
                let n = slot.ok_or_else(|| {
                    ReconError::ConfigValidation(format!(
                        "dataset '{}': {owner}: '{r}' uses {SLOT_PLACEHOLDER} but gates a field without a slot",
                        schema.name
                    ))
                })?;
                schema.require_column(&r.replace(SLOT_PLACEHOLDER, &n.to_string()))?;
            }
        }
        Ok(())
    }
}

fn parse_year(s: &str) -> Option<i64> {
    let t = s.trim();
    t.parse::<i64>()
        .ok()
        .or_else(|| t.parse::<f64>().ok().filter(|y| y.fract() == 0.0).map(|y| y as i64))
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Config-driven rule: `Valid` iff `valid_when` holds.
#[derive(Debug, Clone)]
pub struct ExprRule {
    pub name: String,
    pub applies_to: Vec<String>,
    pub side: Side,
    pub valid_when: Expr,
}

impl ExprRule {
    pub fn validate(&self, schema: &DatasetSchema) -> Result<(), ReconError> {
        for a in &self.applies_to {
            let known = schema.fields.iter().any(|f| f.family == *a || f.name == *a);
            if !known {
                return Err(ReconError::UnknownField {
                    dataset: schema.name.clone(),
                    field: a.clone(),
                });
            }
        }
        let slots: Vec<Option<u32>> = schema.fields.iter().filter(|f| self.gates(f)).map(Field::slot).collect();
        self.valid_when.validate(schema, &format!("rule '{}'", self.name), &slots)
    }
}

impl BusinessRule for ExprRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn gates(&self, field: &Field) -> bool {
        applies(&self.applies_to, field)
    }

    fn side(&self) -> Side {
        self.side
    }

    fn classify(&self, ctx: &RuleContext<'_>) -> Verdict {
        if self.valid_when.eval(ctx) {
            Verdict::Valid
        } else {
            Verdict::Denied
        }
    }
}

/// Rule backed by a closure, for callers embedding the engine.
pub struct FnRule<F> {
    name: String,
    applies_to: Vec<String>,
    side: Side,
    f: F,
}

impl<F> FnRule<F>
where
    F: Fn(&RuleContext<'_>) -> Verdict + Send + Sync,
{
    pub fn new(name: impl Into<String>, applies_to: &[&str], side: Side, f: F) -> Self {
        Self {
            name: name.into(),
            applies_to: applies_to.iter().map(|a| a.to_string()).collect(),
            side,
            f,
        }
    }
}

impl<F> BusinessRule for FnRule<F>
where
    F: Fn(&RuleContext<'_>) -> Verdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn gates(&self, field: &Field) -> bool {
        applies(&self.applies_to, field)
    }

    fn side(&self) -> Side {
        self.side
    }

    fn classify(&self, ctx: &RuleContext<'_>) -> Verdict {
        (self.f)(ctx)
    }
}

/// All rules for one dataset.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn BusinessRule>>,
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.iter().map(|r| r.name())).finish()
    }
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: impl BusinessRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn push(&mut self, rule: Box<dyn BusinessRule>) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn gates(&self, field: &Field) -> bool {
        self.rules.iter().any(|r| r.gates(field))
    }

    /// `Denied` if any rule gating `field` denies the record.
    pub fn verdict(&self, field: &Field, source: Record<'_>, target: Record<'_>) -> Verdict {
        let slot = field.slot();
        let denied = self.rules.iter().filter(|r| r.gates(field)).any(|r| {
            let record = match r.side() {
                Side::Source => source,
                Side::Target => target,
            };
            r.classify(&RuleContext::new(record, slot)) == Verdict::Denied
        });
        if denied {
            Verdict::Denied
        } else {
            Verdict::Valid
        }
    }

    /// Verdict with every rule reading `record`, whatever its side.
    pub fn verdict_on(&self, field: &Field, record: Record<'_>) -> Verdict {
        self.verdict(field, record, record)
    }
}

// ---------------------------------------------------------------------------
// Ready-made rules
// ---------------------------------------------------------------------------

/// Carrier-claims line payment: valid iff the line was approved (`A`), or
/// was reduced/sent back (`R`, `S`) with a positive allowed charge.
pub fn carrier_payment_rule() -> Expr {
    Expr::Any {
        of: vec![
            Expr::Eq {
                field: "LINE_PRCSG_IND_CD_{n}".into(),
                value: "A".into(),
            },
            Expr::All {
                of: vec![
                    Expr::In {
                        field: "LINE_PRCSG_IND_CD_{n}".into(),
                        values: vec!["R".into(), "S".into()],
                    },
                    Expr::Gt {
                        field: "LINE_ALOWD_CHRG_AMT_{n}".into(),
                        value: 0.0,
                    },
                ],
            },
        ],
    }
}
