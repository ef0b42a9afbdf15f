//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! plans, pass reports, and task order to the user.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::planner::{PassPlan, PlanAction, TaskGraph};
use crate::reconciler::{OutcomeStatus, PassReport};
use crate::target::EmittedDocument;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Lifecycle")]
    lifecycle: String,
    #[tabled(rename = "Fields")]
    fields: String,
}

/// Outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Graph row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a pass plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &PassPlan) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &PassPlan) -> String {
        if plan.is_noop() && !plan.has_blockers() {
            return format!(
                "{} No changes required - cluster is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nPass Plan\n\n");

        let rows: Vec<PlanRow> = plan
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| PlanRow {
                index: i + 1,
                action: Self::format_action(e.action),
                task: e.task.to_string(),
                lifecycle: e.lifecycle.to_string(),
                fields: Self::truncate(&e.fields.join(", "), 50),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} unchanged\n",
            plan.count(PlanAction::Create).to_string().green(),
            plan.count(PlanAction::Update).to_string().yellow(),
            plan.count(PlanAction::Unchanged)
        );

        if plan.has_blockers() {
            let _ = write!(
                output,
                "\n{} The pass would fail: {} rejected, {} missing\n",
                "⚠".yellow(),
                plan.count(PlanAction::Reject),
                plan.count(PlanAction::Missing)
            );
        }

        output
    }

    /// Formats a pass report.
    #[must_use]
    pub fn format_report(&self, report: &PassReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &PassReport) -> String {
        let mut output = format!(
            "{} Pass {} ({} target)\n\n",
            "✓".green(),
            ConfigHasher::short_hash(&report.pass_id.to_string()),
            report.target
        );

        if !report.outcomes.is_empty() {
            let rows: Vec<OutcomeRow> = report
                .outcomes
                .iter()
                .map(|o| {
                    let (outcome, detail) = Self::format_outcome(&o.status);
                    OutcomeRow {
                        task: o.task.to_string(),
                        outcome,
                        detail: Self::truncate(&detail, 50),
                    }
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = write!(output, "\nMutations: {}\n", report.mutations());

        if !report.coverage_gaps.is_empty() {
            let _ = write!(
                output,
                "\n{} Changes not applied by the target:\n",
                "⚠".yellow()
            );
            for gap in &report.coverage_gaps {
                let _ = writeln!(output, "   - {}: {}", gap.task, gap.field);
            }
        }

        output
    }

    /// Formats the execution order of a task graph.
    #[must_use]
    pub fn format_graph(&self, graph: &TaskGraph) -> String {
        let order: Vec<GraphEntry> = graph
            .order()
            .map(|task| GraphEntry {
                task: task.to_string(),
                depends_on: graph
                    .dependencies_of(task)
                    .into_iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .collect();

        match self.format {
            OutputFormat::Json => to_json(&order),
            OutputFormat::Text => {
                let rows: Vec<GraphRow> = order
                    .into_iter()
                    .enumerate()
                    .map(|(i, e)| GraphRow {
                        index: i + 1,
                        task: e.task,
                        depends_on: e.depends_on.join(", "),
                    })
                    .collect();
                format!("\nExecution order\n\n{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": "valid",
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid!\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    output.push_str("\nWarnings:\n");
                    for warning in &result.warnings {
                        let _ = writeln!(output, "  {} {warning}", "⚠".yellow());
                    }
                }
                output
            }
        }
    }

    /// Formats the summary of an emitted document.
    #[must_use]
    pub fn format_emitted(&self, document: &EmittedDocument, location: &str, changed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "location": location,
                "digest": document.digest,
                "files": document.files.keys().collect::<Vec<_>>(),
                "changed": changed,
            })),
            OutputFormat::Text => {
                let status = if changed {
                    format!("{} Document written", "✓".green())
                } else {
                    format!("{} Document unchanged", "✓".green())
                };
                let mut output = format!("{status}: {location}\n");
                let _ = writeln!(
                    output,
                    "   Digest: {}",
                    ConfigHasher::short_hash(&document.digest)
                );
                for file in document.files.keys() {
                    let _ = writeln!(output, "   File: {file}");
                }
                output
            }
        }
    }

    fn format_action(action: PlanAction) -> String {
        match action {
            PlanAction::Create => "+create".green().to_string(),
            PlanAction::Update => "~update".yellow().to_string(),
            PlanAction::Unchanged => "unchanged".dimmed().to_string(),
            PlanAction::Warn => "warn".yellow().to_string(),
            PlanAction::Reject => "reject".red().to_string(),
            PlanAction::Missing => "missing".red().to_string(),
            PlanAction::Skip => "skip".dimmed().to_string(),
        }
    }

    fn format_outcome(status: &OutcomeStatus) -> (String, String) {
        match status {
            OutcomeStatus::Created { id } => (
                "created".green().to_string(),
                id.clone().unwrap_or_default(),
            ),
            OutcomeStatus::Updated { fields } => ("updated".yellow().to_string(), fields.join(", ")),
            OutcomeStatus::Unchanged => ("unchanged".dimmed().to_string(), String::new()),
            OutcomeStatus::Warned { fields } => ("drifted".yellow().to_string(), fields.join(", ")),
            OutcomeStatus::Skipped => ("skipped".dimmed().to_string(), String::new()),
            OutcomeStatus::Emitted => ("emitted".green().to_string(), String::new()),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len - 3).collect();
            format!("{head}...")
        }
    }
}

#[derive(Serialize)]
struct GraphEntry {
    task: String,
    depends_on: Vec<String>,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Lifecycle, TaskKind, TaskRef};

    fn plain() -> OutputFormatter {
        colored::control::set_override(false);
        OutputFormatter::new(OutputFormat::Text)
    }

    #[test]
    fn test_noop_plan_text() {
        let plan = PassPlan::new();
        assert!(plain().format_plan(&plan).contains("No changes required"));
    }

    #[test]
    fn test_plan_json_lists_fields() {
        let mut plan = PassPlan::new();
        plan.push(
            TaskRef::new(TaskKind::ComputeGroup, "nodes"),
            Lifecycle::Sync,
            PlanAction::Update,
            vec![String::from("max_size")],
        );

        let json: serde_json::Value =
            serde_json::from_str(&OutputFormatter::new(OutputFormat::Json).format_plan(&plan)).unwrap();
        assert_eq!(json["entries"][0]["action"], "update");
        assert_eq!(json["entries"][0]["fields"][0], "max_size");
    }

    #[test]
    fn test_plan_text_summary() {
        let mut plan = PassPlan::new();
        plan.push(
            TaskRef::new(TaskKind::Subnet, "a"),
            Lifecycle::Sync,
            PlanAction::Create,
            Vec::new(),
        );

        let text = plain().format_plan(&plan);
        assert!(text.contains("subnet/a"));
        assert!(text.contains("Plan: 1 to create, 0 to update, 0 unchanged"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a-much-longer-value", 10), "a-much-...");
    }
}
