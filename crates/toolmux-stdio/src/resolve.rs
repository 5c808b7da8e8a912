//! Executable lookup for server launch commands.

use std::path::{Path, PathBuf};

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute, or relative with a separator) that exist.
///    Relative paths are taken from `cwd` when it is set.
/// 2. The current process PATH via `which`.
pub async fn resolve_executable_path(executable: &str, cwd: Option<&Path>) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if has_separator(path) {
        let path = match cwd {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };
        return path.is_file().then_some(path);
    }

    which_async(executable).await
}

fn has_separator(path: &Path) -> bool {
    path.is_absolute() || path.components().count() > 1
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}
