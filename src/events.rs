//! Event sink: progress and warning reporting decoupled from the pipeline.
//!
//! The pipeline never prints or logs directly; it emits events through an
//! [`EventSink`] handed in by the caller. The default [`LogSink`] forwards
//! everything to the `log` facade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::VolumeStatus;

/// Receiver for pipeline progress and problem reports.
///
/// Implementations must be cheap and non-blocking; they are called from
/// worker tasks.
pub trait EventSink: Send + Sync {
    /// A stage of the run started (extraction, transform, packaging).
    fn stage(&self, _name: &str) {}

    /// One page finished transforming (success or skip).
    fn page_done(&self, _source_name: &str) {}

    /// A page was skipped; the run continues without it.
    fn page_warning(&self, page: &str, cause: &str) {
        log::warn!("page '{}' skipped: {}", page, cause);
    }

    /// One volume reached a terminal status.
    fn volume_status(&self, title: &str, status: &VolumeStatus) {
        match status {
            VolumeStatus::Completed { path } => {
                log::info!("volume '{}' written to {:?}", title, path)
            }
            VolumeStatus::Degraded { path, cause } => {
                log::warn!("volume '{}' degraded to {:?}: {}", title, path, cause)
            }
            VolumeStatus::Skipped { cause } => log::info!("volume '{}' skipped: {}", title, cause),
            VolumeStatus::Copied { path } => {
                log::info!("volume '{}' copied through to {:?}", title, path)
            }
            VolumeStatus::Failed { cause } => log::error!("volume '{}' failed: {}", title, cause),
        }
    }
}

/// Default sink forwarding to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn stage(&self, name: &str) {
        log::info!("{}", name);
    }

    fn page_done(&self, source_name: &str) {
        log::debug!("processed {}", source_name);
    }
}

/// Run-level cancellation flag, observable by in-flight page tasks at the
/// crop → gamma → resize checkpoints. Cancelled runs discard partially
/// completed volumes rather than writing them.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
