//! Signwatch - unattended signing for a drop folder
//!
//! Signwatch polls a watch folder for package files, hands each settled file
//! to the external SignTools binary, and moves the source to a processed or
//! failed folder depending on the result.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Watch folder│     │  Stable +   │     │   Signer    │     │   Outcome   │
//! │    scan     │────▶│  claim      │────▶│  (headless  │────▶│   router    │
//! │             │     │  filter     │     │  SignTools) │     │             │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Stable file**: size unchanged across two readings half a second apart
//! - **Claim**: in-memory marker that keeps a file from being dispatched twice
//! - **Routing**: moving the source after signing; never overwrites, never
//!   leaves a file in two places

pub mod clock;
pub mod config;
pub mod error;
pub mod invoker;
pub mod resolver;
pub mod router;
pub mod shutdown;
pub mod stable;
pub mod tracker;
pub mod watcher;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FileConfig, WatchArgs, WatchConfig};
pub use error::{Result, WatchError};
pub use invoker::{SignSettings, SignerInvoker, SigningOutcome, SIGNER_TIMEOUT};
pub use resolver::{ExecutableResolver, SearchPathResolver};
pub use router::{OutcomeRouter, RouteFolders, RouteResult};
pub use shutdown::ShutdownSignal;
pub use stable::{StabilityProbe, StableFileDetector};
pub use tracker::DedupTracker;
pub use watcher::{CycleReport, JobReport, WatchJob, WatchLoop, WatchSettings, WatchState};
