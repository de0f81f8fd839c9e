//! In-memory claim set guarding against duplicate submission.
//!
//! A path is in the set exactly while it must not be handed to the signer
//! again. State lives only as long as the owning watch loop; after a restart
//! every file left in the watch folder is reconsidered.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct DedupTracker {
    claimed: HashSet<PathBuf>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`. Returns false if it is already claimed.
    pub fn claim(&mut self, path: &Path) -> bool {
        self.claimed.insert(path.to_path_buf())
    }

    /// Drop the claim on `path`. Releasing an unclaimed path is a no-op.
    pub fn release(&mut self, path: &Path) {
        self.claimed.remove(path);
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.contains(path)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}
