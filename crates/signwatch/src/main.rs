//! Signwatch CLI
//!
//! Usage:
//!     signwatch -w ~/WatchFolder -o ~/Signed -p developer_account
//!     signwatch -c watch_config.json

use anyhow::{Context, Result};
use clap::Parser;
use signwatch::config::expand_path;
use signwatch::resolver::SIGNER_PATH_ENV;
use signwatch::{
    FileConfig, SearchPathResolver, ShutdownSignal, SignerInvoker, SystemClock, WatchArgs,
    WatchConfig, WatchError, WatchLoop,
};
use signwatch_logging::{init_logging, LogConfig};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Exit code for invalid or incomplete options, matching clap's usage errors.
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    let args = WatchArgs::parse();

    // The config file may name the log file, so it is read before logging
    // exists and its errors are reported once logging is up.
    let (file_config, config_error) = match args.config.as_deref() {
        Some(path) => match FileConfig::load(&expand_path(path)) {
            Ok(config) => (config, None),
            Err(err) => (FileConfig::default(), Some(err)),
        },
        None => (FileConfig::default(), None),
    };

    let config = match WatchConfig::from_sources(&args, file_config) {
        Ok(config) => config,
        Err(err) => {
            if let Some(load_err) = &config_error {
                eprintln!("Error loading config file: {load_err}");
            }
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(err) = init_logging(LogConfig {
        verbose: args.verbose,
        log_file: config.log_file.as_deref(),
    }) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    if let Some(err) = config_error {
        warn!("Error loading config file: {}", err);
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(config: WatchConfig) -> Result<()> {
    config
        .prepare_folders()
        .context("Failed to prepare folders")?;

    let shutdown = ShutdownSignal::new();
    install_signal_handlers(&shutdown)?;

    let resolver = SearchPathResolver::for_current_process(config.sign_tools_path.clone());
    let invoker = SignerInvoker::new(Box::new(resolver));
    let mut watch =
        WatchLoop::new(config.watch_settings(), invoker, SystemClock).with_shutdown(shutdown);

    match watch.run() {
        Ok(()) => {
            info!("Stopped by user");
            Ok(())
        }
        Err(WatchError::ExecutableMissing { searched }) => {
            log_missing_signer(&searched);
            anyhow::bail!("SignTools executable not found at startup")
        }
        Err(err) => Err(anyhow::Error::new(err).context("Unexpected error")),
    }
}

fn log_missing_signer(searched: &[String]) {
    error!("Error: SignTools executable not found at startup");
    error!("Searched in:");
    for (index, location) in searched.iter().enumerate() {
        error!("  {}. {}", index + 1, location);
    }
    error!("Please specify the path using one of the following methods:");
    error!("  - Set {} environment variable", SIGNER_PATH_ENV);
    error!("  - Add 'sign_tools_path' to config file");
    error!("  - Use --sign-tools-path argument");
}

#[cfg(unix)]
fn install_signal_handlers(shutdown: &ShutdownSignal) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
    let shutdown = shutdown.clone();
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, stopping after the current step...", sig);
            shutdown.request();
        }
    });
    Ok(())
}

#[cfg(windows)]
fn install_signal_handlers(shutdown: &ShutdownSignal) -> Result<()> {
    let shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, stopping after the current step...");
        shutdown.request();
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(())
}
