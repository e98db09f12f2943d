use fs_err as fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber. `RUST_LOG` wins over `debug`.
pub fn init_tracing(debug: bool) {
    let default = if debug { "vibe_sitegen=debug,info" } else { "vibe_sitegen=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Per-run recorder for what each stage sent and got back. Disabled
/// recorders are no-ops; write failures are logged and swallowed.
#[derive(Debug, Clone)]
pub struct StageLog {
    run_id: String,
    dir: Option<PathBuf>,
}

pub fn tx_dir(projects_root: &Path, run_id: &str) -> PathBuf {
    projects_root.join(".vibe").join("tx").join(run_id)
}

impl StageLog {
    pub fn new(projects_root: &Path, run_id: &str, save: bool) -> Self {
        Self {
            run_id: run_id.to_string(),
            dir: save.then(|| tx_dir(projects_root, run_id)),
        }
    }

    #[cfg(test)]
    pub fn disabled(run_id: &str) -> Self {
        Self { run_id: run_id.to_string(), dir: None }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[cfg(test)]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn request(&self, stage: &str, text: &str) {
        self.save(stage, "request", text);
    }

    pub fn response(&self, stage: &str, text: &str) {
        self.save(stage, "response", text);
    }

    fn save(&self, stage: &str, kind: &str, text: &str) {
        let Some(dir) = &self.dir else { return };
        let path = dir.join(format!("{stage}.{kind}.txt"));
        let res = fs::create_dir_all(dir).and_then(|_| fs::write(&path, text));
        match res {
            Ok(()) => debug!(run_id = %self.run_id, stage, path = %path.display(), "saved stage artifact"),
            Err(e) => warn!(run_id = %self.run_id, stage, error = %e, "could not save stage artifact"),
        }
    }
}
