//! The poll loop.
//!
//! Runs discovery cycles back to back at a fixed start-to-start interval and
//! alerts once per newly discovered device. Shutdown is cooperative: the flag
//! is checked between ranges, between cycles, and between sleep slices, so an
//! idle loop reacts within one slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::WatchConfig;
use crate::error::{StorageError, WatchError};
use crate::notifier::{AlertTransport, Notifier};
use crate::probe::ProbeStrategy;
use crate::reconcile::{CycleReport, Reconciler};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Scanning,
    Notifying,
    Sleeping,
    Stopped,
}

/// One cycle plus the delivery results of its alerts.
#[derive(Debug)]
pub struct CycleOutcome {
    pub report: CycleReport,
    pub alerts_delivered: usize,
    pub alerts_failed: usize,
}

pub struct Watcher<L, R, T> {
    reconciler: Reconciler<L, R>,
    notifier: Notifier<T>,
    interval: Duration,
    slice: Duration,
    shutdown: Shutdown,
    state: PollState,
}

impl<L, R, T> Watcher<L, R, T>
where
    L: ProbeStrategy,
    R: ProbeStrategy,
    T: AlertTransport,
{
    pub fn new(
        reconciler: Reconciler<L, R>,
        notifier: Notifier<T>,
        config: &WatchConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            reconciler,
            notifier,
            interval: config.scan_interval(),
            slice: config.sleep_slice(),
            shutdown,
            state: PollState::Idle,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn reconciler(&self) -> &Reconciler<L, R> {
        &self.reconciler
    }

    pub fn notifier(&self) -> &Notifier<T> {
        &self.notifier
    }

    /// Run cycles until shutdown is requested or storage fails.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Watch loop started"
        );

        while !self.shutdown.is_triggered() {
            let started = Instant::now();

            if let Err(e) = self.run_once().await {
                tracing::error!(
                    critical = true,
                    error = %e,
                    "Inventory storage failed, stopping watch loop"
                );
                self.transition(PollState::Stopped);
                return Err(e.into());
            }

            if self.shutdown.is_triggered() {
                break;
            }

            let remaining = self.interval.saturating_sub(started.elapsed());
            tracing::debug!(sleep_ms = remaining.as_millis(), "Sleeping until next cycle");
            self.transition(PollState::Sleeping);
            self.sleep(remaining).await;
        }

        self.transition(PollState::Stopped);
        tracing::info!("Watch loop stopped");
        Ok(())
    }

    /// One cycle followed by its notifications, in discovery order.
    ///
    /// A failed alert is logged by the notifier and does not stop the others.
    pub async fn run_once(&mut self) -> Result<CycleOutcome, StorageError> {
        self.transition(PollState::Scanning);
        let report = self.reconciler.run_cycle(&self.shutdown).await?;

        self.transition(PollState::Notifying);
        let mut alerts_delivered = 0;
        let mut alerts_failed = 0;
        for device in &report.new_devices {
            match self.notifier.send_alert(device).await {
                Ok(()) => alerts_delivered += 1,
                Err(_) => alerts_failed += 1,
            }
        }

        if !report.new_devices.is_empty() {
            tracing::info!(
                cycle_id = %report.cycle_id,
                delivered = alerts_delivered,
                failed = alerts_failed,
                "Alerts processed"
            );
        }

        Ok(CycleOutcome {
            report,
            alerts_delivered,
            alerts_failed,
        })
    }

    /// Sleep for `duration` in slices, returning early on shutdown.
    async fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.shutdown.is_triggered() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            tokio::time::sleep(self.slice.min(deadline - now)).await;
        }
    }

    fn transition(&mut self, next: PollState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Watch state change");
            self.state = next;
        }
    }
}
