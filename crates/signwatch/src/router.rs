//! Routing a source package after its signer run.
//!
//! | Outcome           | folder configured       | no folder                 |
//! |-------------------|-------------------------|---------------------------|
//! | success           | move to processed       | leave in watch folder     |
//! | any other outcome | move to failed          | leave in watch folder     |
//!
//! Files left in place are picked up again on the next poll. Moves never
//! overwrite: a name already taken at the destination gets a timestamp
//! suffix, and a name taken between that check and the move is skipped in
//! favour of the next free one.

use crate::clock::Clock;
use crate::error::{Result, WatchError};
use crate::invoker::SigningOutcome;
use chrono::{DateTime, Local};
use std::fs;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Fresh destination names tried before giving up on a move.
const MAX_PLACE_ATTEMPTS: usize = 16;

/// Optional destination folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFolders {
    pub processed: Option<PathBuf>,
    pub failed: Option<PathBuf>,
}

/// Where a routed file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResult {
    Moved { dest: PathBuf },
    /// No folder configured for this outcome; the file stays and is retried.
    LeftInPlace,
    /// The source was already gone at move time. Counts as moved.
    FileVanished,
    /// The move failed; the file stays and is retried.
    MoveFailed { reason: String },
}

/// Result of a single collision-safe move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveResult {
    Moved(PathBuf),
    SourceVanished,
}

#[derive(Debug, Clone, Default)]
pub struct OutcomeRouter {
    folders: RouteFolders,
}

impl OutcomeRouter {
    pub fn new(folders: RouteFolders) -> Self {
        Self { folders }
    }

    pub fn folders(&self) -> &RouteFolders {
        &self.folders
    }

    /// Folder this outcome routes to, if one is configured.
    pub fn destination_for(&self, outcome: &SigningOutcome) -> Option<&Path> {
        if outcome.is_success() {
            self.folders.processed.as_deref()
        } else {
            self.folders.failed.as_deref()
        }
    }

    pub fn route(&self, source: &Path, outcome: &SigningOutcome, clock: &dyn Clock) -> RouteResult {
        let Some(dest_dir) = self.destination_for(outcome) else {
            return RouteResult::LeftInPlace;
        };

        let name = display_name(source);
        match move_file(source, dest_dir, clock.now()) {
            Ok(MoveResult::Moved(dest)) => {
                info!("Moved {} to {}", name, dest_dir.display());
                RouteResult::Moved { dest }
            }
            Ok(MoveResult::SourceVanished) => {
                warn!("File no longer exists: {}", name);
                RouteResult::FileVanished
            }
            Err(err) => {
                error!("Failed to move {}: {}", name, err);
                RouteResult::MoveFailed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Move `source` into `dest_dir`, creating the folder if needed.
///
/// A same-named file at the destination is never replaced; the moved file is
/// renamed `<stem>_<YYYYMMDD_HHMMSS><ext>` (plus `_<n>` if that is taken too).
pub fn move_file(source: &Path, dest_dir: &Path, now: DateTime<Local>) -> Result<MoveResult> {
    let fail = |dest: &Path, source_err: io::Error| WatchError::MoveFailure {
        path: source.to_path_buf(),
        dest: dest.to_path_buf(),
        source: source_err,
    };

    fs::create_dir_all(dest_dir).map_err(|e| fail(dest_dir, e))?;

    if !path_exists(source) {
        return Ok(MoveResult::SourceVanished);
    }

    for _ in 0..MAX_PLACE_ATTEMPTS {
        let dest = unique_destination(source, dest_dir, now).ok_or_else(|| {
            fail(
                dest_dir,
                io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"),
            )
        })?;

        match place(source, &dest) {
            Ok(()) => return Ok(MoveResult::Moved(dest)),
            // Someone else took the name after it was checked.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !path_exists(source) => {
                return Ok(MoveResult::SourceVanished)
            }
            Err(e) => return Err(fail(&dest, e)),
        }
    }

    Err(fail(
        dest_dir,
        io::Error::new(io::ErrorKind::AlreadyExists, "no free destination name"),
    ))
}

/// First free name for `source` inside `dest_dir`.
pub fn unique_destination(source: &Path, dest_dir: &Path, now: DateTime<Local>) -> Option<PathBuf> {
    let file_name = source.file_name()?;
    let direct = dest_dir.join(file_name);
    if !path_exists(&direct) {
        return Some(direct);
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();

    let stamped = dest_dir.join(format!("{stem}_{stamp}{ext}"));
    if !path_exists(&stamped) {
        return Some(stamped);
    }

    (1u32..)
        .map(|n| dest_dir.join(format!("{stem}_{stamp}_{n}{ext}")))
        .find(|candidate| !path_exists(candidate))
}

/// Move `source` to `dest` without ever replacing an existing `dest`.
///
/// A hard link fails with `AlreadyExists` when the name is taken, which a
/// rename would silently overwrite. Where links are unavailable (another
/// filesystem, or one without link support) the file is copied instead.
fn place(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::hard_link(source, dest) {
        Ok(()) => remove_source_or_undo(source, dest),
        Err(e) if matches!(e.kind(), io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound) => {
            Err(e)
        }
        Err(_) => copy_then_remove(source, dest),
    }
}

fn copy_then_remove(source: &Path, dest: &Path) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let permissions = reader.metadata()?.permissions();
    write_new(&mut reader, dest)?;
    if let Err(e) = fs::set_permissions(dest, permissions) {
        warn!(path = %dest.display(), error = %e, "Could not copy file permissions");
    }
    remove_source_or_undo(source, dest)
}

/// Stream `reader` into a file created at `dest`, which must not exist yet.
/// A partially written file is removed again on error.
fn write_new(reader: &mut impl Read, dest: &Path) -> io::Result<()> {
    let mut writer = OpenOptions::new().write(true).create_new(true).open(dest)?;
    let written = io::copy(reader, &mut writer).and_then(|_| writer.sync_all());
    if let Err(e) = written {
        drop(writer);
        let _ = fs::remove_file(dest);
        return Err(e);
    }
    Ok(())
}

/// The file must never stay in both places: if the source cannot be
/// removed, the new copy is.
fn remove_source_or_undo(source: &Path, dest: &Path) -> io::Result<()> {
    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(dest);
        return Err(e);
    }
    Ok(())
}

fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
