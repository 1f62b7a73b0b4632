//! Chrome/Chromium executable discovery

use std::path::{Path, PathBuf};

/// Executable names looked up on `PATH`, in priority order
const EXECUTABLE_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Well-known install locations checked after `PATH`
const KNOWN_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

/// Find a browser executable.
///
/// Search order:
/// 1. `configured`, when set and executable
/// 2. [`EXECUTABLE_NAMES`] in every `PATH` directory
/// 3. [`KNOWN_PATHS`]
pub fn find_chrome(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if is_executable(path) {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured Chrome path is not executable, searching");
    }

    let path_dirs = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();
    if let Some(found) = find_in_dirs(&path_dirs) {
        return Some(found);
    }

    KNOWN_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| is_executable(path))
}

fn find_in_dirs(dirs: &[PathBuf]) -> Option<PathBuf> {
    EXECUTABLE_NAMES.iter().find_map(|name| {
        dirs.iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.is_file()
        && path
            .metadata()
            .is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
