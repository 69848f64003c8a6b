//! Connection accounting and the periodic diagnostics logger

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Snapshot of stream connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionDiagnostics {
    /// Streams currently open
    pub active: u64,
    /// Highest `active` value since process start
    pub peak: u64,
    pub total_opened: u64,
    pub total_closed: u64,
}

#[derive(Default)]
struct Inner {
    counters: ConnectionDiagnostics,
    threshold_warnings: u64,
    /// Present while the diagnostics logger runs (i.e. while `active > 0`)
    timer: Option<CancellationToken>,
}

/// Process-wide stream counters.
///
/// Mutated only on stream open and close, both under one lock, so the
/// counters and the logger lifecycle never disagree.
pub struct ConnectionStats {
    inner: Mutex<Inner>,
    warning_threshold: u64,
    log_interval: Duration,
}

impl ConnectionStats {
    pub fn new(warning_threshold: u64, log_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            warning_threshold,
            log_interval,
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a new stream; starts the diagnostics logger on the first one.
    /// Returns the new active count.
    pub(crate) fn record_open(self: &Arc<Self>) -> u64 {
        let mut inner = self.inner();
        let c = &mut inner.counters;
        c.active += 1;
        c.total_opened += 1;
        c.peak = c.peak.max(c.active);
        let active = c.active;

        // u64::MAX disables the warning
        if self.warning_threshold.checked_add(1) == Some(active) {
            inner.threshold_warnings += 1;
            warn!(
                active,
                threshold = self.warning_threshold,
                "SSE stream count exceeds warning threshold"
            );
        }

        if inner.timer.is_none() {
            let token = CancellationToken::new();
            inner.timer = Some(token.clone());
            tokio::spawn(run_logger(self.clone(), token, self.log_interval));
            debug!("SSE diagnostics logger started");
        }

        active
    }

    /// Count a closed stream; stops the logger once none remain.
    pub(crate) fn record_close(&self) -> u64 {
        let mut inner = self.inner();
        let c = &mut inner.counters;
        c.active = c.active.saturating_sub(1);
        c.total_closed += 1;
        let active = c.active;

        if active == 0 {
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
                debug!("SSE diagnostics logger stopped");
            }
        }
        active
    }

    /// Stop the logger regardless of the active count (shutdown path)
    pub(crate) fn stop_logger(&self) {
        if let Some(timer) = self.inner().timer.take() {
            timer.cancel();
        }
    }

    pub fn snapshot(&self) -> ConnectionDiagnostics {
        self.inner().counters
    }

    /// How many times the active count rose above the warning threshold
    pub fn threshold_warnings(&self) -> u64 {
        self.inner().threshold_warnings
    }

    pub fn warning_threshold(&self) -> u64 {
        self.warning_threshold
    }

    pub fn logger_running(&self) -> bool {
        self.inner().timer.is_some()
    }

    fn log_diagnostics(&self) {
        let d = self.snapshot();
        info!(
            active = d.active,
            peak = d.peak,
            opened = d.total_opened,
            closed = d.total_closed,
            "SSE stream diagnostics"
        );
        if d.active > self.warning_threshold {
            warn!(
                active = d.active,
                threshold = self.warning_threshold,
                "High number of open SSE streams"
            );
        }
    }
}

async fn run_logger(stats: Arc<ConnectionStats>, token: CancellationToken, every: Duration) {
    let mut ticker = tokio::time::interval(every.max(super::manager::MIN_TICK));
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => stats.log_diagnostics(),
        }
    }
}
