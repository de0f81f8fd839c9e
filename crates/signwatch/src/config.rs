//! Configuration for signwatch
//!
//! Values come from the command line and an optional JSON file. A value
//! given on the command line always wins; the file supplies the rest.

use crate::error::{Result, WatchError};
use crate::invoker::SignSettings;
use crate::router::RouteFolders;
use crate::watcher::{WatchSettings, DEFAULT_PACKAGE_EXTENSION};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default seconds between polls of the watch folder.
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 2.0;

#[derive(clap::Parser, Debug, Clone, Default)]
#[command(
    name = "signwatch",
    about = "Watch a folder for IPA files and sign them with SignTools",
    after_help = "Examples:\n  \
        signwatch -w ~/Desktop/WatchFolder -o ~/Desktop/Signed -p developer_account\n  \
        signwatch -w ~/WatchFolder -o ~/Signed -p developer_account -a \"-a -d\"\n  \
        signwatch -c watch_config.json"
)]
pub struct WatchArgs {
    /// Folder to watch for IPA files
    #[arg(short = 'w', long)]
    pub watch_folder: Option<String>,

    /// Folder to save signed IPA files
    #[arg(short = 'o', long)]
    pub output_folder: Option<String>,

    /// Signing profile name
    #[arg(short = 'p', long)]
    pub profile: Option<String>,

    /// Signing arguments passed through to the signer (e.g. "-a -d -m")
    #[arg(short = 'a', long = "args", allow_hyphen_values = true)]
    pub sign_args: Option<String>,

    /// Custom bundle ID
    #[arg(short = 'b', long)]
    pub bundle_id: Option<String>,

    /// Folder that receives successfully signed source files
    #[arg(long)]
    pub processed_folder: Option<String>,

    /// Folder that receives source files that failed to sign
    #[arg(long)]
    pub failed_folder: Option<String>,

    /// Append log lines to this file
    #[arg(short = 'l', long)]
    pub log_file: Option<String>,

    /// Polling interval in seconds [default: 2.0]
    #[arg(short = 'i', long)]
    pub poll_interval: Option<f64>,

    /// JSON configuration file; command-line values take precedence
    #[arg(short = 'c', long)]
    pub config: Option<String>,

    /// Path to the SignTools executable (auto-detected if not given)
    #[arg(long)]
    pub sign_tools_path: Option<String>,

    /// Debug-level logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Contents of the JSON configuration file. Every key is optional and
/// unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileConfig {
    pub watch_folder: Option<String>,
    pub output_folder: Option<String>,
    pub profile: Option<String>,
    pub sign_args: Option<String>,
    pub bundle_id: Option<String>,
    pub processed_folder: Option<String>,
    pub failed_folder: Option<String>,
    pub log_file: Option<String>,
    pub poll_interval: Option<f64>,
    pub sign_tools_path: Option<String>,
}

impl FileConfig {
    /// Load a JSON config file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// Fully resolved settings for one signwatch run.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    pub watch_folder: PathBuf,
    pub output_folder: PathBuf,
    pub profile: String,
    pub sign_args: String,
    pub bundle_id: Option<String>,
    pub processed_folder: Option<PathBuf>,
    pub failed_folder: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub poll_interval: Duration,
    pub sign_tools_path: Option<PathBuf>,
}

impl WatchConfig {
    /// Merge command-line values over file values and validate the result.
    pub fn from_sources(args: &WatchArgs, file: FileConfig) -> Result<Self> {
        let watch_folder = pick(&args.watch_folder, file.watch_folder);
        let output_folder = pick(&args.output_folder, file.output_folder);
        let profile = pick(&args.profile, file.profile);

        let (Some(watch_folder), Some(output_folder), Some(profile)) =
            (watch_folder, output_folder, profile)
        else {
            return Err(WatchError::Config(
                "watch_folder, output_folder, and profile are required \
                 (use -w, -o, -p or a -c config file)"
                    .to_string(),
            ));
        };

        let poll_secs = args
            .poll_interval
            .or(file.poll_interval)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if !poll_secs.is_finite() || poll_secs <= 0.0 {
            return Err(WatchError::Config(format!(
                "poll interval must be a positive number of seconds, got {poll_secs}"
            )));
        }

        Ok(Self {
            watch_folder: expand_path(&watch_folder),
            output_folder: expand_path(&output_folder),
            profile,
            sign_args: pick(&args.sign_args, file.sign_args).unwrap_or_default(),
            bundle_id: pick(&args.bundle_id, file.bundle_id),
            processed_folder: pick(&args.processed_folder, file.processed_folder)
                .map(|p| expand_path(&p)),
            failed_folder: pick(&args.failed_folder, file.failed_folder).map(|p| expand_path(&p)),
            log_file: pick(&args.log_file, file.log_file).map(|p| expand_path(&p)),
            poll_interval: Duration::from_secs_f64(poll_secs),
            sign_tools_path: pick(&args.sign_tools_path, file.sign_tools_path)
                .map(|p| expand_path(&p)),
        })
    }

    /// Create every configured folder that does not exist yet.
    pub fn prepare_folders(&self) -> Result<()> {
        let folders = [
            Some(&self.watch_folder),
            Some(&self.output_folder),
            self.processed_folder.as_ref(),
            self.failed_folder.as_ref(),
        ];
        for folder in folders.into_iter().flatten() {
            std::fs::create_dir_all(folder).map_err(|e| {
                WatchError::Config(format!("cannot create folder {}: {e}", folder.display()))
            })?;
        }
        Ok(())
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            watch_folder: self.watch_folder.clone(),
            output_folder: self.output_folder.clone(),
            extension: DEFAULT_PACKAGE_EXTENSION.to_string(),
            poll_interval: self.poll_interval,
            sign: SignSettings {
                profile: self.profile.clone(),
                extra_args: self.sign_args.clone(),
                bundle_id: self.bundle_id.clone(),
            },
            folders: RouteFolders {
                processed: self.processed_folder.clone(),
                failed: self.failed_folder.clone(),
            },
        }
    }
}

/// Command-line value if present and non-empty, else the file value.
fn pick(cli: &Option<String>, file: Option<String>) -> Option<String> {
    cli.clone()
        .filter(|value| !value.is_empty())
        .or(file)
        .filter(|value| !value.is_empty())
}

/// Expand a leading `~` to the home directory and make the path absolute.
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => {
            match dirs::home_dir() {
                Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
                None => PathBuf::from(raw),
            }
        }
        _ => PathBuf::from(raw),
    };

    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> WatchArgs {
        WatchArgs::try_parse_from(std::iter::once("signwatch").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_cli_only_config() {
        let config = WatchConfig::from_sources(
            &args(&["-w", "/in", "-o", "/out", "-p", "dev"]),
            FileConfig::default(),
        )
        .unwrap();

        assert_eq!(config.watch_folder, PathBuf::from("/in"));
        assert_eq!(config.output_folder, PathBuf::from("/out"));
        assert_eq!(config.profile, "dev");
        assert_eq!(config.sign_args, "");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(config.processed_folder.is_none());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig {
            watch_folder: Some("/file/in".to_string()),
            output_folder: Some("/file/out".to_string()),
            profile: Some("file-profile".to_string()),
            sign_args: Some("-d".to_string()),
            failed_folder: Some("/file/failed".to_string()),
            poll_interval: Some(10.0),
            ..FileConfig::default()
        };

        let config =
            WatchConfig::from_sources(&args(&["-p", "cli-profile", "-i", "0.5"]), file).unwrap();

        assert_eq!(config.profile, "cli-profile");
        assert_eq!(config.watch_folder, PathBuf::from("/file/in"));
        assert_eq!(config.sign_args, "-d");
        assert_eq!(config.failed_folder, Some(PathBuf::from("/file/failed")));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_file_poll_interval_used_when_cli_silent() {
        let file = FileConfig {
            poll_interval: Some(7.5),
            ..FileConfig::default()
        };
        let config =
            WatchConfig::from_sources(&args(&["-w", "/in", "-o", "/out", "-p", "dev"]), file)
                .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs_f64(7.5));
    }

    #[test]
    fn test_missing_required_values() {
        let err = WatchConfig::from_sources(&args(&["-w", "/in"]), FileConfig::default())
            .unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));
    }

    #[test]
    fn test_rejects_non_positive_poll_interval() {
        let err = WatchConfig::from_sources(
            &args(&["-w", "/in", "-o", "/out", "-p", "dev", "-i", "0"]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("poll interval"));
    }

    #[test]
    fn test_sign_args_may_start_with_hyphen() {
        let parsed = args(&["-a", "-a -d", "-w", "/in"]);
        assert_eq!(parsed.sign_args.as_deref(), Some("-a -d"));
    }

    #[test]
    fn test_load_json_ignores_unknown_keys() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("watch_config.json");
        std::fs::write(
            &path,
            r#"{
                "watch_folder": "~/WatchFolder",
                "output_folder": "/signed",
                "profile": "developer_account",
                "poll_interval": 3,
                "comment": "not a setting"
            }"#,
        )
        .unwrap();

        let file = FileConfig::load(&path).unwrap();
        assert_eq!(file.profile.as_deref(), Some("developer_account"));
        assert_eq!(file.poll_interval, Some(3.0));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = FileConfig::load(&temp.path().join("absent.json")).unwrap();
        assert_eq!(file, FileConfig::default());
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(FileConfig::load(&path), Err(WatchError::Json(_))));
    }

    #[test]
    fn test_expand_home_and_relative_paths() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/Signed"), home.join("Signed"));
            assert_eq!(expand_path("~"), home);
        }
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
        assert!(expand_path("relative/dir").is_absolute());
        assert!(expand_path("~other/dir").ends_with("~other/dir"));
    }

    #[test]
    fn test_prepare_folders_creates_everything() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        let watch = root.join("in").to_string_lossy().into_owned();
        let output = root.join("out").to_string_lossy().into_owned();
        let failed = root.join("failed").to_string_lossy().into_owned();
        let config = WatchConfig::from_sources(
            &args(&[
                "-w",
                watch.as_str(),
                "-o",
                output.as_str(),
                "-p",
                "dev",
                "--failed-folder",
                failed.as_str(),
            ]),
            FileConfig::default(),
        )
        .unwrap();

        config.prepare_folders().unwrap();

        assert!(root.join("in").is_dir());
        assert!(root.join("out").is_dir());
        assert!(root.join("failed").is_dir());
        assert!(!root.join("processed").exists());
    }
}
