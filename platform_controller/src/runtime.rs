use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide "should keep running" signal.
///
/// Every long-lived loop (accept loop, coordinator, workers) observes this
/// flag at each suspension point; shutdown is cooperative, never forced.
#[derive(Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}
