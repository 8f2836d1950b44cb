use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// cooperative cancellation token for long operations
///
/// cloned tokens share one flag. long operations call `check` at every
/// backend round-trip and between subtree visits so a cancel surfaces at
/// the next suspension point.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// request cancellation; all clones observe it
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// has cancellation been requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// error out if cancellation has been requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
