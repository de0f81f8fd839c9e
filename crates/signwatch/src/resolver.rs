//! Locating the external SignTools binary.
//!
//! The watch loop only depends on [`ExecutableResolver`]. [`SearchPathResolver`]
//! is the bootstrap strategy the binary uses: explicit path, environment
//! variable, locations next to the running binary, project-root ancestors,
//! the system `PATH`, then the working directory.

use crate::config::expand_path;
use crate::error::{Result, WatchError};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the signer on the system `PATH`.
pub const SIGNER_NAME: &str = "SignTools";

/// Environment variable that may point directly at the signer.
pub const SIGNER_PATH_ENV: &str = "SIGNTOOLS_PATH";

/// Files whose presence marks a directory as the signer's project root.
const PROJECT_ROOT_MARKERS: &[&str] = &["signer-cfg.yml", "go.mod"];

/// How many ancestors of the binary's directory are checked for a project root.
const MAX_ANCESTOR_DEPTH: usize = 5;

/// Relative locations checked inside each search directory.
const CANDIDATE_NAMES: &[&str] = &[
    "SignTools",
    "SignTools.app/Contents/MacOS/SignTools.bin",
    "SignTools.app/Contents/MacOS/SignTools",
];

pub trait ExecutableResolver {
    /// Path of an existing, executable signer, or
    /// [`WatchError::ExecutableMissing`] listing what was searched.
    fn resolve(&self) -> Result<PathBuf>;
}

impl<R: ExecutableResolver + ?Sized> ExecutableResolver for Box<R> {
    fn resolve(&self) -> Result<PathBuf> {
        (**self).resolve()
    }
}

/// Ordered search for the signer binary.
#[derive(Debug, Clone)]
pub struct SearchPathResolver {
    explicit: Option<PathBuf>,
    env_path: Option<PathBuf>,
    anchor_dir: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    search_system_path: bool,
}

impl Default for SearchPathResolver {
    fn default() -> Self {
        Self {
            explicit: None,
            env_path: None,
            anchor_dir: None,
            working_dir: None,
            search_system_path: true,
        }
    }
}

impl SearchPathResolver {
    /// Empty search: only the system `PATH` is consulted until more
    /// locations are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Search configured from the running process: `SIGNTOOLS_PATH`, the
    /// directory of the current executable, and the working directory.
    pub fn for_current_process(explicit: Option<PathBuf>) -> Self {
        let env_path = std::env::var(SIGNER_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_path(&value));
        let anchor_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.canonicalize().ok())
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        Self {
            explicit,
            env_path,
            anchor_dir,
            working_dir: std::env::current_dir().ok(),
            search_system_path: true,
        }
    }

    pub fn explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    pub fn env_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_path = Some(path.into());
        self
    }

    /// Directory the relative and ancestor searches start from.
    pub fn anchor_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.anchor_dir = Some(dir.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn system_path(mut self, enabled: bool) -> Self {
        self.search_system_path = enabled;
        self
    }

    fn search(&self, searched: &mut Vec<String>) -> Option<PathBuf> {
        if let Some(path) = &self.explicit {
            searched.push(format!("explicit path {}", path.display()));
            if is_executable(path) {
                return Some(path.clone());
            }
            warn!(
                path = %path.display(),
                "Specified SignTools path does not exist or is not executable"
            );
        }

        if let Some(path) = &self.env_path {
            searched.push(format!("{SIGNER_PATH_ENV}={}", path.display()));
            if is_executable(path) {
                return Some(path.clone());
            }
            warn!(
                path = %path.display(),
                "{SIGNER_PATH_ENV} environment variable points to invalid path"
            );
        }

        if let Some(anchor) = &self.anchor_dir {
            if let Some(found) = search_dir(anchor, searched) {
                return Some(found);
            }
            if let Some(found) = anchor.parent().and_then(|parent| search_dir(parent, searched)) {
                return Some(found);
            }
            for dir in anchor.ancestors().take(MAX_ANCESTOR_DEPTH) {
                if !is_project_root(dir) {
                    continue;
                }
                if let Some(found) = search_dir(dir, searched) {
                    return Some(found);
                }
            }
        }

        if self.search_system_path {
            searched.push(format!("{SIGNER_NAME} on PATH"));
            if let Ok(path) = which::which(SIGNER_NAME) {
                return Some(path);
            }
        }

        if let Some(cwd) = &self.working_dir {
            if let Some(found) = search_dir(cwd, searched) {
                return Some(found);
            }
        }

        None
    }
}

impl ExecutableResolver for SearchPathResolver {
    fn resolve(&self) -> Result<PathBuf> {
        let mut searched = Vec::new();
        self.search(&mut searched)
            .ok_or(WatchError::ExecutableMissing { searched })
    }
}

fn search_dir(dir: &Path, searched: &mut Vec<String>) -> Option<PathBuf> {
    CANDIDATE_NAMES.iter().map(|name| dir.join(name)).find(|candidate| {
        searched.push(candidate.display().to_string());
        is_executable(candidate)
    })
}

fn is_project_root(dir: &Path) -> bool {
    PROJECT_ROOT_MARKERS
        .iter()
        .any(|marker| dir.join(marker).exists())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn make_executable(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_explicit_path_wins() {
        let temp = TempDir::new().unwrap();
        let explicit = temp.path().join("custom").join("signer");
        let env = temp.path().join("env").join("signer");
        make_executable(&explicit);
        make_executable(&env);

        let resolver = SearchPathResolver::new()
            .explicit(&explicit)
            .env_path(&env)
            .system_path(false);

        assert_eq!(resolver.resolve().unwrap(), explicit);
    }

    #[test]
    fn test_invalid_explicit_falls_through_to_env() {
        let temp = TempDir::new().unwrap();
        let env = temp.path().join("env").join("signer");
        make_executable(&env);

        let resolver = SearchPathResolver::new()
            .explicit(temp.path().join("missing"))
            .env_path(&env)
            .system_path(false);

        assert_eq!(resolver.resolve().unwrap(), env);
    }

    #[test]
    fn test_non_executable_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("SignTools");
        fs::write(&plain, "not a program").unwrap();

        let resolver = SearchPathResolver::new()
            .explicit(&plain)
            .system_path(false);

        assert!(matches!(
            resolver.resolve(),
            Err(WatchError::ExecutableMissing { .. })
        ));
    }

    #[test]
    fn test_app_bundle_next_to_binary() {
        let temp = TempDir::new().unwrap();
        let bin_dir = temp.path().join("bin");
        let bundled = bin_dir.join("SignTools.app/Contents/MacOS/SignTools.bin");
        make_executable(&bundled);

        let resolver = SearchPathResolver::new()
            .anchor_dir(&bin_dir)
            .system_path(false);

        assert_eq!(resolver.resolve().unwrap(), bundled);
    }

    #[test]
    fn test_project_root_detected_by_marker() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        let anchor = root.join("tools").join("watch").join("bin");
        fs::create_dir_all(&anchor).unwrap();
        fs::write(root.join("go.mod"), "module signtools\n").unwrap();
        let signer = root.join("SignTools");
        make_executable(&signer);

        let resolver = SearchPathResolver::new()
            .anchor_dir(&anchor)
            .system_path(false);

        assert_eq!(resolver.resolve().unwrap(), signer);
    }

    #[test]
    fn test_ancestor_without_marker_is_ignored() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        let anchor = root.join("tools").join("watch").join("bin");
        fs::create_dir_all(&anchor).unwrap();
        make_executable(&root.join("SignTools"));

        let resolver = SearchPathResolver::new()
            .anchor_dir(&anchor)
            .system_path(false);

        assert!(resolver.resolve().is_err());
    }

    #[test]
    fn test_working_dir_is_last_resort() {
        let temp = TempDir::new().unwrap();
        let signer = temp.path().join("SignTools");
        make_executable(&signer);

        let resolver = SearchPathResolver::new()
            .working_dir(temp.path())
            .system_path(false);

        assert_eq!(resolver.resolve().unwrap(), signer);
    }

    #[test]
    fn test_missing_signer_lists_searched_locations() {
        let temp = TempDir::new().unwrap();
        let resolver = SearchPathResolver::new()
            .explicit(temp.path().join("nope"))
            .working_dir(temp.path())
            .system_path(false);

        match resolver.resolve() {
            Err(WatchError::ExecutableMissing { searched }) => {
                assert_eq!(searched.len(), 1 + CANDIDATE_NAMES.len());
                assert!(searched[0].starts_with("explicit path"));
            }
            other => panic!("expected ExecutableMissing, got {other:?}"),
        }
    }
}
