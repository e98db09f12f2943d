use colored::Colorize;
use fs_err as fs;
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::Stage;
use crate::wire::{DeploymentStatus, GenerationResult, RequirementsRecord};

/// Spinner that follows pipeline stages. Hidden when `enabled` is false.
pub fn stage_spinner(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

pub fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Amplifying => "Analyzing request and expanding requirements...",
        Stage::Synthesizing => "Generating project files...",
        Stage::Validating => "Checking generated files...",
        Stage::Recovering => "Generation unusable, building fallback project...",
        Stage::Materializing => "Writing project to disk...",
        Stage::Deploying => "Publishing to GitHub Pages...",
        Stage::Done => "Done",
        Stage::Failed => "Failed",
    }
}

pub fn render_requirements(rec: &RequirementsRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", "=== REQUIREMENTS ===".bold());
    for (title, fields) in rec.sections() {
        let _ = writeln!(out, "{}", title.cyan().bold());
        for (key, value) in fields {
            let _ = writeln!(out, "  {:<20} {}", key.replace('_', " "), value);
        }
    }
    out
}

pub fn render_result(res: &GenerationResult) -> String {
    let mut out = String::new();
    let bar = "┏━━━━━━━━━━━━━━━━━━━━━━━ Generation Result ━━━━━━━━━━━━━━━━━━━━━━━┓";
    let _ = writeln!(out, "\n{}", bar.bold());

    if !res.success {
        let _ = writeln!(out, "  {} {}", "FAILED".red().bold(), res.error.as_deref().unwrap_or("unknown error"));
        let _ = writeln!(out, "{}", "┗".bold());
        return out;
    }

    let project = res.project_path.as_deref().unwrap_or("-");
    let _ = writeln!(out, "  {} {}", "Project:".green().bold(), project);
    for rel in &res.files_created {
        let size = fs::metadata(Path::new(project).join(rel))
            .map(|m| format_size(m.len(), DECIMAL))
            .unwrap_or_else(|_| "?".into());
        let _ = writeln!(out, "    {:<40} {:>10}", rel, size);
    }
    if let Some(url) = &res.preview_url {
        let _ = writeln!(out, "  {} {}", "Preview:".bold(), url);
    }
    if let Some(url) = &res.download_url {
        let _ = writeln!(out, "  {} {}", "Download:".bold(), url);
    }
    if let Some(status) = res.deployment_status {
        let label = match status {
            DeploymentStatus::Success => "success".green().bold(),
            DeploymentStatus::Failed => "failed".red().bold(),
            DeploymentStatus::Skipped => "skipped (missing token, username or repo name)".yellow().bold(),
        };
        let _ = writeln!(out, "  {} {}", "Deployment:".bold(), label);
        if let Some(url) = &res.github_url {
            let _ = writeln!(out, "    repository  {url}");
        }
        if let Some(url) = &res.pages_url {
            let _ = writeln!(out, "    website     {url}");
        }
    }
    let _ = writeln!(out, "{}", "┗".bold());
    out
}
