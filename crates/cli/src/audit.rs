//! `fidelity run|validate|schema`: config-driven fidelity audits.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde::Serialize;

use fidelity_recon::ingest::load_csv_snapshot_file;
use fidelity_recon::model::AuditResult;
use fidelity_recon::{AuditConfig, AuditInput, ReconError, Side};

use crate::exit_codes::{
    EXIT_AUDIT_DEFECTS, EXIT_AUDIT_INVALID_CONFIG, EXIT_AUDIT_RUNTIME, EXIT_ERROR, EXIT_USAGE,
};
use crate::CliError;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Run a fidelity audit from a TOML config file
    #[command(after_help = "\
Examples:
  fidelity run migration.toml
  fidelity run migration.toml --json
  fidelity run migration.toml --output result.json --tables-dir out/
  fidelity run migration.toml --fail-on-defects")]
    Run {
        /// Path to the audit config (.toml)
        config: PathBuf,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write one CSV file per output table into this directory
        #[arg(long)]
        tables_dir: Option<PathBuf>,

        /// Exit 62 when any defect or primary-key orphan is found
        #[arg(long)]
        fail_on_defects: bool,
    },

    /// Validate an audit config without loading any snapshot
    #[command(after_help = "\
Examples:
  fidelity validate migration.toml")]
    Validate {
        /// Path to the audit config (.toml)
        config: PathBuf,
    },

    /// Print datasets, keys, fields and families after slot expansion
    #[command(after_help = "\
Examples:
  fidelity schema migration.toml
  fidelity schema migration.toml --dataset carrier --json")]
    Schema {
        /// Path to the audit config (.toml)
        config: PathBuf,

        /// Only show this dataset
        #[arg(long)]
        dataset: Option<String>,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

pub fn cmd_audit(cmd: AuditCommands) -> Result<(), CliError> {
    match cmd {
        AuditCommands::Run { config, json, output, tables_dir, fail_on_defects } => {
            cmd_run(config, json, output, tables_dir, fail_on_defects)
        }
        AuditCommands::Validate { config } => cmd_validate(config),
        AuditCommands::Schema { config, dataset, json } => cmd_schema(config, dataset, json),
    }
}

fn audit_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError::new(code, msg)
}

/// Configuration problems exit 60, everything else found while running exits 61.
fn engine_err(err: ReconError) -> CliError {
    if err.is_configuration() {
        audit_err(EXIT_AUDIT_INVALID_CONFIG, err.to_string())
            .with_hint("run `fidelity validate <config>` to check the config")
    } else {
        audit_err(EXIT_AUDIT_RUNTIME, err.to_string())
    }
}

fn load_config(config_path: &Path) -> Result<AuditConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path).map_err(|e| {
        audit_err(EXIT_USAGE, format!("cannot read config {}: {e}", config_path.display()))
    })?;
    AuditConfig::from_toml(&config_str).map_err(engine_err)
}

/// Load both snapshots of every dataset. Paths resolve against the config
/// file's directory.
fn load_input(config: &AuditConfig, config_path: &Path) -> Result<AuditInput, CliError> {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut input = AuditInput::default();
    for (name, dataset) in &config.datasets {
        let schema = dataset.schema(name).map_err(engine_err)?;
        let source = load_csv_snapshot_file(&schema, Side::Source, &base_dir.join(&dataset.source))
            .map_err(engine_err)?;
        let target = load_csv_snapshot_file(&schema, Side::Target, &base_dir.join(&dataset.target))
            .map_err(engine_err)?;
        log::info!(
            "dataset '{}': loaded {} source rows, {} target rows",
            name,
            source.len(),
            target.len()
        );
        input.insert(source, target);
    }
    Ok(input)
}

fn cmd_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    tables_dir: Option<PathBuf>,
    fail_on_defects: bool,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let input = load_input(&config, &config_path)?;

    let result = fidelity_recon::run(&config, &input).map_err(engine_err)?;

    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| audit_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| audit_err(EXIT_AUDIT_RUNTIME, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref dir) = tables_dir {
        let written = crate::export::write_tables(&result, dir)?;
        eprintln!("wrote {} tables to {}", written.len(), dir.display());
    }

    if json_output {
        println!("{json_str}");
    }

    print_summary(&result);

    if fail_on_defects && !result.summary.is_clean() {
        let s = &result.summary;
        return Err(audit_err(
            EXIT_AUDIT_DEFECTS,
            format!(
                "{} defects, {} missing keys, {} extra keys, {} cross-check mismatches",
                s.overall.total_defects, s.missing, s.extra, s.cross_check_mismatches
            ),
        ));
    }

    Ok(())
}

fn fmt_metric(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(x) => format!("{x:.precision$}"),
        None => "n/a".to_string(),
    }
}

/// Human summary to stderr.
fn print_summary(result: &AuditResult) {
    let s = &result.summary;
    eprintln!(
        "audit '{}': {} datasets, {} matched, {} missing, {} extra, {} defects / {} opportunities",
        result.meta.config_name,
        s.datasets,
        s.matched,
        s.missing,
        s.extra,
        s.overall.total_defects,
        s.overall.total_opportunities,
    );
    eprintln!(
        "overall: DPMO {}, yield {}, sigma {}",
        fmt_metric(s.overall.dpmo, 1),
        fmt_metric(s.overall.yield_, 6),
        fmt_metric(s.overall.sigma_level, 2),
    );

    for d in &result.datasets {
        eprintln!(
            "  {}: {} rows source, {} rows target, {} defects, DPMO {}, sigma {}",
            d.dataset,
            d.row_counts.source,
            d.row_counts.target,
            d.quality.total_defects,
            fmt_metric(d.quality.dpmo, 1),
            fmt_metric(d.quality.sigma_level, 2),
        );
        if let Some(top) = d.variance.rows.first() {
            eprintln!(
                "    largest variance: {} ({:.2})",
                top.field_family, top.financial_variance
            );
        }
    }

    for check in &result.cross_checks {
        for side in &check.sides {
            eprintln!(
                "  cross check {} ({}): {} of {} groups disagree, {:.2} aggregate vs {:.2} recomputed",
                check.name,
                side.side,
                side.mismatches.len(),
                side.groups,
                side.aggregate_total,
                side.computed_total,
            );
        }
    }

    if s.coercion_warnings > 0 {
        eprintln!("{} values could not be coerced to their declared type", s.coercion_warnings);
    }
}

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    for (name, dataset) in &config.datasets {
        // Building the schema also expands slots and checks the key.
        dataset.schema(name).map_err(engine_err)?;
    }
    eprintln!(
        "config '{}' is valid: {} datasets, {} cross checks",
        config.name,
        config.datasets.len(),
        config.cross_checks.len()
    );
    Ok(())
}

#[derive(Serialize)]
struct SchemaView {
    dataset: String,
    key: Vec<String>,
    orphan_keys: Vec<WidthView>,
    families: Vec<FamilyView>,
}

#[derive(Serialize)]
struct WidthView {
    name: String,
    fields: Vec<String>,
}

#[derive(Serialize)]
struct FamilyView {
    family: String,
    fields: Vec<String>,
    #[serde(rename = "type")]
    field_type: String,
}

fn cmd_schema(config_path: PathBuf, only: Option<String>, json_output: bool) -> Result<(), CliError> {
    let config = load_config(&config_path)?;

    let names: Vec<&String> = match only {
        Some(ref name) => {
            let (name, _) = config.datasets.get_key_value(name).ok_or_else(|| {
                audit_err(EXIT_USAGE, format!("unknown dataset '{name}'")).with_hint(format!(
                    "configured datasets: {}",
                    config.datasets.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })?;
            vec![name]
        }
        None => config.datasets.keys().collect(),
    };

    let mut views = Vec::new();
    for name in names {
        let dataset = &config.datasets[name];
        let schema = dataset.schema(name).map_err(engine_err)?;
        let families = schema
            .families()
            .into_iter()
            .map(|family| {
                let fields: Vec<_> = schema.fields_in_family(family).collect();
                FamilyView {
                    family: family.to_string(),
                    field_type: fields
                        .first()
                        .map(|f| f.field_type.to_string())
                        .unwrap_or_default(),
                    fields: fields.iter().map(|f| f.name.clone()).collect(),
                }
            })
            .collect();
        views.push(SchemaView {
            dataset: name.clone(),
            key: schema.key.fields.clone(),
            orphan_keys: dataset
                .key_widths(&schema)
                .into_iter()
                .map(|w| WidthView { name: w.name, fields: w.fields })
                .collect(),
            families,
        });
    }

    if json_output {
        let json_str = serde_json::to_string_pretty(&views)
            .map_err(|e| audit_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
        return Ok(());
    }

    for view in &views {
        println!("{}", view.dataset);
        println!("  key: {}", view.key.join(", "));
        for width in &view.orphan_keys {
            println!("  orphan key {}: {}", width.name, width.fields.join(", "));
        }
        for family in &view.families {
            println!("  {} ({}): {}", family.family, family.field_type, family.fields.join(", "));
        }
    }
    Ok(())
}
