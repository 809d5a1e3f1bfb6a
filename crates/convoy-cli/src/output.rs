//! Formatted output helpers for CLI commands.
//!
//! Each formatter returns the full text so commands stay one `print!` and
//! the layout can be tested without a runtime.

use std::fmt::Write as _;

use convoy_manifest::Manifest;
use convoy_runtime::ReconcileReport;
use convoy_runtime::reconciler::ContainerOutcome;
use convoy_runtime::status::StatusReport;

/// Formats an apply run: one line per container, then a summary.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_report(report: &ReconcileReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        match outcome {
            ContainerOutcome::Reconciled(r) if r.is_unchanged() => {
                let _ = writeln!(out, "  = {:<20} up to date", r.name);
            }
            ContainerOutcome::Reconciled(r) => {
                let actions: Vec<String> = r.actions.iter().map(ToString::to_string).collect();
                let _ = writeln!(out, "  ~ {:<20} {}", r.name, actions.join(", "));
                if let Some(reason) = &r.drift {
                    let _ = writeln!(out, "      drift: {reason}");
                }
                for hook in &r.hooks {
                    let _ = writeln!(
                        out,
                        "      hook {}: {} (exit {})",
                        hook.index, hook.command, hook.exit_code
                    );
                }
            }
            ContainerOutcome::Failed { name, error } => {
                let _ = writeln!(out, "  ! {name:<20} failed: {error}");
            }
            ContainerOutcome::Skipped { name, blocked_by } => {
                let _ = writeln!(out, "  - {name:<20} skipped: depends on {blocked_by}");
            }
        }
    }

    let failed = report.failures().count();
    let elapsed = report.finished_at - report.started_at;
    let _ = writeln!(
        out,
        "\n  {} container(s), {failed} not reconciled, {:.1}s",
        report.outcomes.len(),
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    out
}

/// Formats a status report as a two-column table.
#[must_use]
pub fn format_status(report: &StatusReport) -> String {
    let mut out = format!("{:<24} {:<8}\n", "CONTAINER", "STATE");
    for entry in &report.entries {
        let _ = writeln!(out, "{:<24} {:<8}", entry.name, entry.state.to_string());
    }
    out
}

/// Formats the execution plan of a manifest.
#[must_use]
pub fn format_plan(source: &str, manifest: &Manifest, order: &[String]) -> String {
    let mut out = format!("Execution plan for: {source}\n\n");
    for (position, name) in order.iter().enumerate() {
        let Some(spec) = manifest.get(name) else {
            continue;
        };
        let _ = writeln!(out, "  {}. {name}", position + 1);
        let _ = writeln!(out, "      image: {}", spec.image);
        let links: Vec<&str> = spec.dependencies().collect();
        if !links.is_empty() {
            let _ = writeln!(out, "      after: {}", links.join(", "));
        }
        if !spec.pre_start.is_empty() {
            let _ = writeln!(out, "      pre-start hooks: {}", spec.pre_start.len());
        }
    }
    let _ = writeln!(out, "\n  {} container(s) in order.", order.len());
    out
}
