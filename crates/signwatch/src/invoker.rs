//! Running the external signer for one package.
//!
//! The signer's command-line contract:
//!
//! ```text
//! SignTools -headless -ipa <input> -profile <name> -output <output>
//!           [-args <string>] [-bundle-id <id>]
//! ```
//!
//! Exit code 0 is success; anything else is a failure whose captured stderr
//! and stdout are reported verbatim. The whole call, including draining the
//! signer's output, is bounded by a wall-clock timeout; there are no retries
//! here.

use crate::error::{Result, WatchError};
use crate::resolver::ExecutableResolver;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Hard limit on one signer run.
pub const SIGNER_TIMEOUT: Duration = Duration::from_secs(1800);

/// How often a running signer is polled for exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long output is still collected after the signer exits. Helpers it
/// left running in the background may hold the pipes open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Per-run signing parameters passed through to the signer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignSettings {
    /// Signing profile name.
    pub profile: String,
    /// Passed as a single `-args` value when non-empty.
    pub extra_args: String,
    /// Passed as `-bundle-id` when set.
    pub bundle_id: Option<String>,
}

/// What happened to one signer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningOutcome {
    /// Exit code 0; the signed artifact is expected at `output`.
    Success { output: PathBuf },
    /// Non-zero exit (or killed by a signal, `code` = None).
    Failure {
        code: Option<i32>,
        stderr: String,
        stdout: String,
    },
    Timeout { after: Duration },
    /// No signer binary could be resolved; nothing was spawned.
    ExecutableMissing,
    UnexpectedError(String),
}

impl SigningOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SigningOutcome::Success { .. })
    }

    /// The signer was terminated by a signal rather than exiting on its own.
    pub fn killed_by_signal(&self) -> bool {
        matches!(self, SigningOutcome::Failure { code: None, .. })
    }

    /// Short tag for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            SigningOutcome::Success { .. } => "success",
            SigningOutcome::Failure { .. } => "failure",
            SigningOutcome::Timeout { .. } => "timeout",
            SigningOutcome::ExecutableMissing => "executable_missing",
            SigningOutcome::UnexpectedError(_) => "unexpected_error",
        }
    }
}

/// Captured result of a signer process that ran to completion.
#[derive(Debug)]
struct CompletedRun {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

pub struct SignerInvoker {
    resolver: Box<dyn ExecutableResolver>,
    timeout: Duration,
}

impl SignerInvoker {
    pub fn new(resolver: Box<dyn ExecutableResolver>) -> Self {
        Self {
            resolver,
            timeout: SIGNER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve the signer now, without running it.
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        self.resolver.resolve()
    }

    /// Sign `source` into `output`.
    ///
    /// The signer is resolved again on every call, so installing it after
    /// startup is picked up by the next job.
    pub fn invoke(&self, source: &Path, settings: &SignSettings, output: &Path) -> SigningOutcome {
        let program = match self.resolver.resolve() {
            Ok(program) => program,
            Err(WatchError::ExecutableMissing { searched }) => {
                debug!(locations = searched.len(), "Signer not resolvable at job time");
                return SigningOutcome::ExecutableMissing;
            }
            Err(err) => return SigningOutcome::UnexpectedError(err.to_string()),
        };

        let args = build_args(source, settings, output);
        info!("Running: {}", render_command(&program, &args));

        match self.run(&program, &args) {
            Ok(run) if run.status.success() => {
                if !output.exists() {
                    warn!(
                        output = %output.display(),
                        "Signer exited 0 but the output file is not present"
                    );
                }
                SigningOutcome::Success {
                    output: output.to_path_buf(),
                }
            }
            Ok(run) => SigningOutcome::Failure {
                code: run.status.code(),
                stderr: run.stderr,
                stdout: run.stdout,
            },
            Err(WatchError::InvocationTimeout(after)) => SigningOutcome::Timeout { after },
            Err(err) => SigningOutcome::UnexpectedError(err.to_string()),
        }
    }

    fn run(&self, program: &Path, args: &[OsString]) -> Result<CompletedRun> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                WatchError::InvocationUnexpected(format!(
                    "failed to spawn {}: {e}",
                    program.display()
                ))
            })?;

        let started = Instant::now();

        // Pipes drain on their own threads; the child stalls once one fills.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = wait_with_timeout(&mut child, self.timeout)?;

        let drain_deadline = (Instant::now() + OUTPUT_DRAIN_GRACE).min(started + self.timeout);
        Ok(CompletedRun {
            status,
            stdout: drain_reader(stdout, drain_deadline),
            stderr: drain_reader(stderr, drain_deadline),
        })
    }
}

/// Argument list for one signer run, without the program itself.
pub fn build_args(source: &Path, settings: &SignSettings, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-headless".into(),
        "-ipa".into(),
        source.into(),
        "-profile".into(),
        settings.profile.clone().into(),
        "-output".into(),
        output.into(),
    ];

    if !settings.extra_args.is_empty() {
        args.push("-args".into());
        args.push(settings.extra_args.clone().into());
    }

    if let Some(bundle_id) = settings.bundle_id.as_deref().filter(|id| !id.is_empty()) {
        args.push("-bundle-id".into());
        args.push(bundle_id.into());
    }

    args
}

fn render_command(program: &Path, args: &[OsString]) -> String {
    std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Poll the child until it exits or `timeout` elapses.
///
/// On timeout the child is killed best-effort. Grandchildren that inherited
/// the output pipes may outlive it, so the pipe readers are left detached.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            if let Err(e) = child.kill() {
                warn!(pid = child.id(), error = %e, "Failed to kill timed-out signer");
            }
            let _ = child.wait();
            return Err(WatchError::InvocationTimeout(timeout));
        }

        std::thread::sleep(WAIT_POLL_INTERVAL.min(timeout - elapsed));
    }
}

/// Forward everything read from `pipe` as chunks until EOF or a read error.
fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "Failed to read signer output");
                    break;
                }
            }
        }
    });
    rx
}

/// Collect chunks until the pipe closes or `deadline` passes. Whatever
/// arrived by the deadline is kept; the reader thread is left detached.
fn drain_reader(reader: Option<Receiver<Vec<u8>>>, deadline: Instant) -> String {
    let Some(rx) = reader else {
        return String::new();
    };

    let mut collected = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => collected.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                debug!("Signer output still open after exit, keeping what arrived");
                break;
            }
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}
