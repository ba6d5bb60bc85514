//! Table export for `fidelity run --tables-dir`.
//!
//! Writes `<dir>/<table>.csv` for every output table. Each file is written to
//! a `.tmp` sibling first and renamed over the previous file, so a rerun
//! replaces old output instead of appending to it.

use std::fs::File;
use std::path::{Path, PathBuf};

use fidelity_recon::model::AuditResult;
use fidelity_recon::tables::Table;

use crate::exit_codes::EXIT_AUDIT_RUNTIME;
use crate::CliError;

pub fn write_tables(result: &AuditResult, dir: &Path) -> Result<Vec<PathBuf>, CliError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        CliError::new(EXIT_AUDIT_RUNTIME, format!("cannot create {}: {e}", dir.display()))
    })?;

    let mut written = Vec::new();
    for table in result.tables() {
        written.push(write_table(&table, dir)?);
    }
    Ok(written)
}

fn write_table(table: &Table, dir: &Path) -> Result<PathBuf, CliError> {
    let out = dir.join(format!("{}.csv", table.name));
    write_atomic(&out, |file| {
        table.write_csv(std::io::BufWriter::new(file)).map_err(|e| e.to_string())
    })?;
    log::info!("wrote {} ({} rows)", out.display(), table.len());
    Ok(out)
}

/// Write through a `.tmp` sibling, then rename over `out`. On failure the
/// `.tmp` file is removed and any previous `out` is left as it was.
fn write_atomic<F>(out: &Path, write: F) -> Result<(), CliError>
where
    F: FnOnce(File) -> Result<(), String>,
{
    let tmp_path = out.with_extension("csv.tmp");
    let file = File::create(&tmp_path).map_err(|e| {
        CliError::new(EXIT_AUDIT_RUNTIME, format!("cannot write {}: {e}", tmp_path.display()))
    })?;

    let result = write(file)
        .map_err(|e| CliError::new(EXIT_AUDIT_RUNTIME, format!("{}: {e}", out.display())))
        .and_then(|()| {
            std::fs::rename(&tmp_path, out).map_err(|e| {
                CliError::new(EXIT_AUDIT_RUNTIME, format!("failed to rename tmp to output: {e}"))
            })
        });
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_write_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("quality_metrics.csv");

        let err = write_atomic(&out, |_| Err("disk full".to_string())).unwrap_err();
        assert_eq!(err.code, EXIT_AUDIT_RUNTIME);
        assert!(err.message.contains("disk full"));
        assert!(!dir.path().join("quality_metrics.csv.tmp").exists());
        assert!(!out.exists());
    }

    #[test]
    fn failed_write_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("row_counts.csv");
        std::fs::write(&out, "dataset,source,target,diff\n").unwrap();

        assert!(write_atomic(&out, |_| Err("interrupted".to_string())).is_err());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "dataset,source,target,diff\n");
        assert!(!dir.path().join("row_counts.csv.tmp").exists());
    }

    #[test]
    fn successful_write_replaces_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("t.csv");
        std::fs::write(&out, "old").unwrap();
        write_atomic(&out, |mut f| {
            use std::io::Write;
            f.write_all(b"new").map_err(|e| e.to_string())
        })
        .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "new");
    }
}
