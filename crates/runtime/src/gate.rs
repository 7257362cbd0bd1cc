//! Admission gate for graceful shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Counts in-flight requests and stops admitting new ones on shutdown.
#[derive(Debug)]
pub struct RequestGate {
    active: AtomicUsize,
    accepting: AtomicBool,
    drained: Notify,
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<RequestGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if self.gate.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.drained.notify_waiters();
        }
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self {
            active: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            drained: Notify::new(),
        }
    }
}

impl RequestGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Admit one request, or `None` once shutdown has begun.
    pub fn enter(self: &Arc<Self>) -> Option<GatePermit> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let permit = GatePermit { gate: self.clone() };
        if self.accepting.load(Ordering::SeqCst) {
            Some(permit)
        } else {
            None
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop admitting and wait up to `timeout` for in-flight requests.
    /// Returns true when everything drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let active = self.active();
            if active == 0 {
                info!("All requests drained");
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("Shutdown drain timed out with {} request(s) in flight", self.active());
                return false;
            }
        }
    }
}
