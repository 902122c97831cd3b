//! CLI output formatting

use crate::{
    core::{
        pipeline::Plan,
        state::{DeployOutcome, RunStatus, StageOutcome},
        trigger::Admission,
    },
    execution::engine::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "* ");

/// Create a stage progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} stages {msg}")
    {
        progress.set_style(style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Rejected => style("REJECTED").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a stage outcome for display
pub fn format_stage_outcome(outcome: &StageOutcome) -> String {
    match outcome {
        StageOutcome::Skipped { reason } => {
            format!("{} ({})", style("SKIPPED").dim(), style(reason).dim())
        }
        StageOutcome::Succeeded { steps_run } => {
            format!("{} ({} steps)", style("SUCCEEDED").green(), steps_run)
        }
        StageOutcome::Failed { failure } => format!(
            "{} at step {} '{}' (exit code {})",
            style("FAILED").red(),
            failure.index,
            failure.step,
            failure.exit_code
        ),
    }
}

/// Format a deployment outcome for display
pub fn format_deploy_outcome(outcome: &DeployOutcome) -> String {
    match outcome {
        DeployOutcome::Delivered { artifacts } => format!(
            "{} ({} artifacts)",
            style("DELIVERED").green(),
            artifacts.len()
        ),
        DeployOutcome::Skipped { reason } => {
            format!("{} ({})", style("SKIPPED").dim(), style(reason).dim())
        }
        DeployOutcome::Failed { error } => {
            format!("{}: {}", style("FAILED").red(), style(error).dim())
        }
    }
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Cancelled => WARN,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} on {} - stages {}/{} ok, {} skipped - exit {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.pipeline).bold(),
        format_status(summary.status),
        style(&summary.branch).cyan(),
        summary.stages_succeeded,
        summary.total_stages() - summary.stages_skipped,
        summary.stages_skipped,
        summary.exit_code
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline,
            branch,
            total_stages,
        } => format!(
            "{} Starting {} on {} ({} stages, run {})",
            ROCKET,
            style(pipeline).bold(),
            style(branch).cyan(),
            total_stages,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::RunRejected { pipeline, reason, .. } => format!(
            "{} {} not triggered: {}",
            INFO,
            style(pipeline).bold(),
            style(reason).dim()
        ),
        ExecutionEvent::StageSkipped { stage, reason } => {
            format!("{} {} {}", SKIP, style(stage).dim(), style(reason).dim())
        }
        ExecutionEvent::StageStarted { stage, total_steps } => format!(
            "{} {} ({} steps)",
            SPINNER,
            style(stage).cyan().bold(),
            total_steps
        ),
        ExecutionEvent::StepStarted { stage, step, index } => format!(
            "   {} {}/{} #{}",
            style("→").dim(),
            style(stage).dim(),
            style(step).cyan(),
            index
        ),
        ExecutionEvent::StepFinished {
            stage,
            step,
            success,
            exit_code,
            ..
        } => {
            if *success {
                format!("   {} {}/{}", CHECK, style(stage).dim(), style(step).green())
            } else {
                format!(
                    "   {} {}/{} (exit code {})",
                    CROSS,
                    style(stage).dim(),
                    style(step).red(),
                    exit_code
                )
            }
        }
        ExecutionEvent::StageFinished { stage, outcome } => {
            let icon = if outcome.is_succeeded() { CHECK } else { CROSS };
            format!("{} {} {}", icon, style(stage).bold(), format_stage_outcome(outcome))
        }
        ExecutionEvent::DeploymentFinished { stage, result } => format!(
            "   {} {}/{} via {}: {}",
            PACKAGE,
            style(stage).dim(),
            style(&result.deployment).bold(),
            result.provider,
            format_deploy_outcome(&result.outcome)
        ),
        ExecutionEvent::RunFinished {
            run_id,
            status,
            exit_code,
        } => format!(
            "{} Run {} {} (exit code {})",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status),
            exit_code
        ),
    }
}

/// Format a dry-run plan for display
pub fn format_plan(plan: &Plan) -> String {
    let mut lines = Vec::new();
    match &plan.admission {
        Admission::Rejected { reason } => {
            lines.push(format!("{} Run would be rejected: {}", CROSS, style(reason).dim()));
            return lines.join("\n");
        }
        Admission::Admitted => lines.push(format!("{} Run would be admitted", CHECK)),
    }

    for stage in &plan.stages {
        if stage.admitted {
            lines.push(format!(
                "  {} {} [{}] {}",
                CHECK,
                style(&stage.name).bold(),
                style(&stage.condition).dim(),
                style(stage.steps.join(", ")).dim()
            ));
            for deployment in &stage.deployments {
                let state = if deployment.fires {
                    style("fires").green().to_string()
                } else {
                    style("skipped").dim().to_string()
                };
                lines.push(format!(
                    "      {} {} via {}: {}",
                    PACKAGE, deployment.name, deployment.provider, state
                ));
            }
        } else {
            lines.push(format!(
                "  {} {} [{}]",
                SKIP,
                style(&stage.name).dim(),
                style(&stage.condition).dim()
            ));
        }
    }
    lines.join("\n")
}

/// Format a duration as `1h 2m 3s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
