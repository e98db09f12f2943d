use std::path::{Component, Path, PathBuf};

/// Resolve `rel` under `root` lexically. Returns `None` when the path is
/// absolute or when `..` segments would climb above `root`.
///
/// Works on paths that don't exist yet, so it never touches the filesystem.
pub fn resolve_within(root: &Path, rel: &str) -> Option<PathBuf> {
    let normalized = normalize_separators(rel);
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for comp in Path::new(&normalized).components() {
        match comp {
            Component::Normal(seg) => parts.push(seg),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().fold(root.to_path_buf(), |acc, seg| acc.join(seg)))
}

/// Like [`resolve_within`] but never refuses: leading roots are dropped and
/// `..` segments that would escape are ignored. Returns the clamped relative
/// path (forward slashes) and whether anything had to be dropped.
pub fn clamp_within(rel: &str) -> (String, bool) {
    let mut parts: Vec<String> = Vec::new();
    let mut clamped = false;
    for comp in Path::new(&normalize_separators(rel)).components() {
        match comp {
            Component::Normal(seg) => parts.push(seg.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    clamped = true;
                }
            }
            Component::RootDir | Component::Prefix(_) => clamped = true,
        }
    }
    (parts.join("/"), clamped)
}

fn normalize_separators(rel: &str) -> String {
    rel.trim().replace('\\', "/")
}

/// True when `candidate` lies strictly below `root` after canonicalization.
/// `root` itself does not count. Both paths must exist.
pub fn is_within_root(candidate: &Path, root: &Path) -> bool {
    let abs_root = match std::fs::canonicalize(root) {
        Ok(p) => p,
        Err(_) => return false,
    };
    match std::fs::canonicalize(candidate) {
        Ok(abs_candidate) => abs_candidate != abs_root && abs_candidate.starts_with(&abs_root),
        Err(_) => false,
    }
}
