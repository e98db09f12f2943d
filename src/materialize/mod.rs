use anyhow::{Context, Result};
use fs_err as fs;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::errors::SiteGenError;
use crate::fallback;
use crate::safety::clamp_within;
use crate::wire::{FileBundle, RequirementsRecord};

pub mod docs;

#[derive(Debug, Clone)]
pub struct FileResult {
    pub kind: &'static str,
    pub rel_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct MaterializeSummary {
    pub created: usize,
    pub overwritten: usize,
    pub bytes_written: u64,
    pub details: Vec<FileResult>,
    pub doc_written: bool,
}

impl MaterializeSummary {
    /// "html: index.html" style identifiers, in bundle order.
    pub fn files_written(&self) -> Vec<String> {
        self.details
            .iter()
            .map(|d| format!("{}: {}", d.kind, d.rel_path))
            .collect()
    }

    /// Relative path of the written HTML entry.
    pub fn entry_html(&self) -> Option<&str> {
        self.details
            .iter()
            .find(|d| d.kind == "html")
            .map(|d| d.rel_path.as_str())
    }
}

/// Write the three bundle files under `target_dir`, then a
/// `PROJECT_REQUIREMENTS.md` summary.
///
/// A `fileDir` that would land outside `target_dir` is clamped back inside.
/// Only storage failures on the three files fail the call; the summary
/// document is best-effort. Partial writes are not rolled back.
pub fn materialize(
    bundle: &FileBundle,
    requirements: &RequirementsRecord,
    target_dir: &Path,
) -> Result<MaterializeSummary, SiteGenError> {
    let mut sum = write_bundle(bundle, target_dir)
        .map_err(|e| SiteGenError::Materialization(format!("{e:#}")))?;

    let doc_path = target_dir.join(docs::DOC_FILE);
    match write_atomic(&doc_path, &docs::render_requirements(requirements)) {
        Ok(_) => sum.doc_written = true,
        Err(e) => warn!(path = %doc_path.display(), error = %format!("{e:#}"), "could not write requirements document"),
    }

    info!(
        dir = %target_dir.display(),
        files = sum.details.len(),
        bytes = sum.bytes_written,
        "project materialized"
    );
    Ok(sum)
}

fn write_bundle(bundle: &FileBundle, target_dir: &Path) -> Result<MaterializeSummary> {
    fs::create_dir_all(target_dir)?;
    let mut sum = MaterializeSummary::default();

    for (kind, entry) in bundle.entries() {
        let (mut rel, clamped) = clamp_within(&entry.file_dir);
        if clamped {
            warn!(kind, requested = %entry.file_dir, clamped = %rel, "fileDir escaped the project directory");
        }
        if rel.is_empty() {
            rel = default_path(kind).to_string();
            warn!(kind, requested = %entry.file_dir, wrote = %rel, "unusable fileDir, using default path");
        }

        let abs = target_dir.join(&rel);
        let before = write_atomic(&abs, &entry.content)
            .with_context(|| format!("writing {kind} file {}", abs.display()))?;
        if before.is_some() {
            sum.overwritten += 1;
        } else {
            sum.created += 1;
        }
        sum.bytes_written += entry.content.len() as u64;
        sum.details.push(FileResult { kind, rel_path: rel });
    }
    Ok(sum)
}

/// Write via a temp file in the same directory. Returns the previous size
/// when a file was replaced.
fn write_atomic(abs: &Path, content: &str) -> Result<Option<u64>> {
    let parent = abs.parent().context("target path has no parent")?;
    fs::create_dir_all(parent)?;
    let before = if abs.is_file() { Some(fs::metadata(abs)?.len()) } else { None };
    let tmp = NamedTempFile::new_in(parent)?;
    fs::write(tmp.path(), content)?;
    tmp.persist(abs)?;
    Ok(before)
}

fn default_path(kind: &str) -> &'static str {
    match kind {
        "css" => fallback::CSS_PATH,
        "js" => fallback::JS_PATH,
        _ => fallback::HTML_PATH,
    }
}
