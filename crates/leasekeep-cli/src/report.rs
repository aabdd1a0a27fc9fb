//! Operator-facing summaries with `[ok]`, `[warn]` and `[fail]` markers.

use std::fmt::Write as _;

use leasekeep_backup::{BackupError, ExportReport, ImportStats, Warning, WipeMode, WipeResult};
use leasekeep_core::ModelCount;

const OK: &str = "[ok]";
const WARN: &str = "[warn]";
const FAIL: &str = "[fail]";

/// Summary lines for a finished export.
pub fn export(report: &ExportReport) -> String {
    let mut out = String::new();
    let manifest = &report.manifest;
    for model in &manifest.schema.models {
        if let Some(count) = manifest.count_by_model.get(model) {
            let _ = writeln!(out, "{OK} exported {model}: {count} row(s)");
        }
    }
    warnings(&mut out, &report.warnings);
    let _ = writeln!(out, "{OK} archive written to {}", report.archive_path.display());
    out
}

/// Summary lines for a finished import.
pub fn import(stats: &ImportStats) -> String {
    let mut out = String::new();
    let verb = if stats.dry_run { "would import" } else { "imported" };
    counts(&mut out, verb, &stats.imported);
    warnings(&mut out, &stats.warnings);
    if stats.dry_run {
        let _ = writeln!(
            out,
            "{OK} dry run ({}): {} row(s) verified, nothing written; pass --apply to restore",
            stats.mode,
            stats.total()
        );
    } else {
        let _ = writeln!(
            out,
            "{OK} import ({}) complete: {} row(s)",
            stats.mode,
            stats.total()
        );
    }
    out
}

/// Summary lines for a finished wipe.
pub fn wipe(result: &WipeResult) -> String {
    let mut out = String::new();
    let verb = match result.mode {
        WipeMode::Soft => "soft-deleted",
        WipeMode::Hard => "deleted",
    };
    counts(&mut out, verb, &result.counts);
    warnings(&mut out, &result.warnings);
    let _ = writeln!(
        out,
        "{OK} {} wipe complete: {} row(s)",
        result.mode,
        result.total()
    );
    out
}

/// Failure lines for a fatal error.
pub fn failure(operation: &str, err: &BackupError) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{FAIL} {operation}: {err}");
    if let BackupError::BatchTransaction {
        partially_applied: true,
        applied,
        ..
    } = err
    {
        let _ = writeln!(
            out,
            "{FAIL} target is partially restored; these changes were committed before the failure:"
        );
        for count in applied {
            let _ = writeln!(out, "{FAIL}   {}: {} row(s)", count.model, count.count);
        }
    }
    out
}

fn counts(out: &mut String, verb: &str, counts: &[ModelCount]) {
    for count in counts {
        let _ = writeln!(out, "{OK} {verb} {}: {} row(s)", count.model, count.count);
    }
}

fn warnings(out: &mut String, warnings: &[Warning]) {
    for warning in warnings {
        let _ = writeln!(out, "{WARN} {warning}");
    }
}
