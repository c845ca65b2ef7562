//! Path resolution against the project root.

use std::path::{Component, Path, PathBuf};

/// Resolve `path` (absolute or relative to `root`) and refuse anything that
/// escapes `root`. Purely lexical: the file need not exist.
pub fn resolve(root: &Path, path: &str) -> Result<PathBuf, String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("invalid path: empty".into());
    }
    if trimmed.contains('\0') {
        return Err("invalid path: contains NUL".into());
    }

    let joined = root.join(trimmed);
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(format!("path traversal: {path}"));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    let root = normalize(root);
    if !normalized.starts_with(&root) {
        return Err(format!("path outside workspace: {path}"));
    }
    Ok(normalized)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
