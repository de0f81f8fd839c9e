//! The watch loop: scan, filter, dispatch, route, idle, repeat.
//!
//! ```text
//!  Idle ──poll elapsed──▶ Scanning ──per candidate──▶ Filtering
//!   ▲                                                  │ claimed + stable
//!   │                                                  ▼
//!   └──── all candidates done ◀── Routing ◀──── Dispatching
//! ```
//!
//! Candidates are handled strictly one after another on the calling thread.
//! A candidate that fails filtering is skipped with no side effects and
//! looked at again on the next poll. Every claim taken in Filtering is
//! released after Routing, whatever the outcome.
//!
//! A shutdown request is checked at the top of each cycle and between slices
//! of the idle sleep. An in-flight signer run is never interrupted by the
//! loop; if the same terminal Ctrl+C killed the signer, the package is left
//! where it is instead of being treated as a signing failure.

use crate::clock::Clock;
use crate::error::Result;
use crate::invoker::{SignSettings, SignerInvoker, SigningOutcome};
use crate::router::{display_name, OutcomeRouter, RouteFolders, RouteResult};
use crate::shutdown::ShutdownSignal;
use crate::stable::{StabilityProbe, StableFileDetector};
use crate::tracker::DedupTracker;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Extension of the packages picked up from the watch folder.
pub const DEFAULT_PACKAGE_EXTENSION: &str = "ipa";

/// Upper bound on one idle sleep, so a shutdown request is noticed promptly.
const IDLE_SLICE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Scanning,
    Filtering,
    Dispatching,
    Routing,
}

/// Settings the loop needs, already resolved to absolute paths.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    pub watch_folder: PathBuf,
    pub output_folder: PathBuf,
    /// Package extension without the dot, matched case-insensitively.
    pub extension: String,
    pub poll_interval: Duration,
    pub sign: SignSettings,
    pub folders: RouteFolders,
}

/// A file that passed filtering in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchJob {
    pub source: PathBuf,
    pub discovered_at: DateTime<Local>,
}

impl WatchJob {
    /// Where the signer is told to write: `<output>/<stem>_signed<ext>`.
    pub fn output_path(&self, output_folder: &Path) -> PathBuf {
        output_folder.join(signed_file_name(&self.source))
    }
}

/// `app.ipa` -> `app_signed.ipa`
pub fn signed_file_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match source.extension() {
        Some(ext) => format!("{stem}_signed.{}", ext.to_string_lossy()),
        None => format!("{stem}_signed"),
    }
}

/// Record of one dispatched job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job: WatchJob,
    pub output: PathBuf,
    pub outcome: SigningOutcome,
    pub route: RouteResult,
}

/// What happened during one scan cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub candidates: usize,
    pub skipped_claimed: usize,
    pub skipped_unstable: usize,
    pub skipped_vanished: usize,
    pub jobs: Vec<JobReport>,
}

pub struct WatchLoop<C: Clock> {
    settings: WatchSettings,
    tracker: DedupTracker,
    detector: StableFileDetector,
    invoker: SignerInvoker,
    router: OutcomeRouter,
    clock: C,
    shutdown: ShutdownSignal,
    state: WatchState,
}

impl<C: Clock> WatchLoop<C> {
    pub fn new(settings: WatchSettings, invoker: SignerInvoker, clock: C) -> Self {
        let router = OutcomeRouter::new(settings.folders.clone());
        Self {
            settings,
            tracker: DedupTracker::new(),
            detector: StableFileDetector::new(),
            invoker,
            router,
            clock,
            shutdown: ShutdownSignal::new(),
            state: WatchState::Idle,
        }
    }

    /// Stop when `shutdown` is requested instead of on a private signal.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle that stops this loop when requested.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn with_detector(mut self, detector: StableFileDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn tracker(&self) -> &DedupTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut DedupTracker {
        &mut self.tracker
    }

    /// Resolve the signer once before any work. Failure means the loop must
    /// not start.
    pub fn preflight(&self) -> Result<PathBuf> {
        self.invoker.resolve_executable()
    }

    /// Run until shutdown is requested. Returns `Ok(())` only then.
    pub fn run(&mut self) -> Result<()> {
        let signer = self.preflight()?;
        self.log_banner(&signer);

        loop {
            if self.shutdown.is_requested() {
                self.state = WatchState::Idle;
                return Ok(());
            }
            self.run_cycle()?;
            self.idle();
        }
    }

    /// One scan over the watch folder, dispatching every eligible file.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let candidates = self.scan()?;
        report.candidates = candidates.len();

        for candidate in candidates {
            self.state = WatchState::Filtering;
            let Some(job) = self.filter(&candidate, &mut report) else {
                continue;
            };
            report.jobs.push(self.dispatch(job));
        }

        self.state = WatchState::Idle;
        Ok(report)
    }

    /// Package files directly inside the watch folder, in path order.
    ///
    /// A missing watch folder is logged and yields no candidates. Failing to
    /// read an existing folder is returned as an error.
    pub fn scan(&mut self) -> Result<Vec<PathBuf>> {
        self.state = WatchState::Scanning;
        let folder = &self.settings.watch_folder;
        if !folder.is_dir() {
            error!("Watch folder does not exist: {}", folder.display());
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() > 0 => {
                    debug!(error = %err, "Skipping unreadable watch folder entry");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let path = entry.into_path();
            if has_extension(&path, &self.settings.extension) && path.is_file() {
                candidates.push(path);
            }
        }
        Ok(candidates)
    }

    fn filter(&mut self, candidate: &Path, report: &mut CycleReport) -> Option<WatchJob> {
        if self.tracker.is_claimed(candidate) {
            report.skipped_claimed += 1;
            return None;
        }

        match self.detector.probe(candidate, &self.clock) {
            StabilityProbe::Stable { .. } => {}
            StabilityProbe::Growing { before, after } => {
                debug!(
                    path = %candidate.display(),
                    before,
                    after,
                    "File still being written, skipping this cycle"
                );
                report.skipped_unstable += 1;
                return None;
            }
            StabilityProbe::Vanished => {
                debug!(path = %candidate.display(), "File vanished before it settled");
                report.skipped_vanished += 1;
                return None;
            }
        }

        if !self.tracker.claim(candidate) {
            report.skipped_claimed += 1;
            return None;
        }

        Some(WatchJob {
            source: candidate.to_path_buf(),
            discovered_at: self.clock.now(),
        })
    }

    fn dispatch(&mut self, job: WatchJob) -> JobReport {
        self.state = WatchState::Dispatching;
        let name = display_name(&job.source);
        let output = job.output_path(&self.settings.output_folder);

        info!("Processing: {}", name);
        let outcome = self.invoker.invoke(&job.source, &self.settings.sign, &output);

        self.state = WatchState::Routing;
        let route = if self.shutdown.is_requested() && outcome.killed_by_signal() {
            warn!("Signing of {} interrupted by shutdown, leaving it in place", name);
            RouteResult::LeftInPlace
        } else {
            log_outcome(&name, &output, &outcome);
            self.router.route(&job.source, &outcome, &self.clock)
        };
        self.tracker.release(&job.source);

        JobReport {
            job,
            output,
            outcome,
            route,
        }
    }

    fn idle(&mut self) {
        self.state = WatchState::Idle;
        let mut remaining = self.settings.poll_interval;
        while !remaining.is_zero() && !self.shutdown.is_requested() {
            let slice = remaining.min(IDLE_SLICE);
            self.clock.sleep(slice);
            remaining -= slice;
        }
    }

    fn log_banner(&self, signer: &Path) {
        let settings = &self.settings;
        info!("Starting Watch Folder Signer");
        info!("SignTools: {}", signer.display());
        info!("Watch folder: {}", settings.watch_folder.display());
        info!("Output folder: {}", settings.output_folder.display());
        info!("Profile: {}", settings.sign.profile);
        if settings.sign.extra_args.is_empty() {
            info!("Sign args: (none)");
        } else {
            info!("Sign args: {}", settings.sign.extra_args);
        }
        if let Some(bundle_id) = &settings.sign.bundle_id {
            info!("Bundle ID: {}", bundle_id);
        }
        if let Some(processed) = &settings.folders.processed {
            info!("Processed folder: {}", processed.display());
        }
        if let Some(failed) = &settings.folders.failed {
            info!("Failed folder: {}", failed.display());
        }
        info!("Poll interval: {} seconds", settings.poll_interval.as_secs_f64());
        info!("Press Ctrl+C to stop");
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn log_outcome(name: &str, output: &Path, outcome: &SigningOutcome) {
    match outcome {
        SigningOutcome::Success { .. } => {
            info!("Successfully signed: {}", display_name(output));
        }
        SigningOutcome::Failure {
            code,
            stderr,
            stdout,
        } => {
            error!(exit_code = ?code, "Signing failed for {}: {}", name, stderr.trim_end());
            error!("Output: {}", stdout.trim_end());
        }
        SigningOutcome::Timeout { after } => {
            error!(
                timeout_secs = after.as_secs(),
                "Signing timed out for {}", name
            );
        }
        SigningOutcome::ExecutableMissing => {
            error!("Error: SignTools executable not found, cannot sign {}", name);
        }
        SigningOutcome::UnexpectedError(message) => {
            error!("Error signing {}: {}", name, message);
        }
    }
}
