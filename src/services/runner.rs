//! Cycle runner - drives the tracking engine from incoming batches
//!
//! In polling mode one cycle runs per poll interval over the newest batch
//! received since the previous cycle; a cycle with no batch still runs so
//! silent entities age into `Stale`. In replay mode every batch is one
//! cycle and the batch's own sample times act as the clock.

use crate::infra::metrics::Metrics;
use crate::io::egress::Egress;
use crate::io::egress_channel::EgressSender;
use crate::io::ingress::{shutdown_requested, ObservationBatch};
use crate::services::engine::{CycleReport, TrackingEngine};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// Source of the `now` reference handed to each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleClock {
    /// Wall clock, one cycle per poll interval
    Wall,
    /// Newest sample time of each batch, one cycle per batch
    Replay,
}

pub struct CycleRunner {
    engine: TrackingEngine,
    egress: Egress,
    egress_sender: Option<EgressSender>,
    metrics: Arc<Metrics>,
    clock: CycleClock,
    poll_interval: Duration,
    pending: Option<ObservationBatch>,
    replay_now: Option<DateTime<Utc>>,
}

impl CycleRunner {
    pub fn new(
        engine: TrackingEngine,
        egress: Egress,
        metrics: Arc<Metrics>,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            engine,
            egress,
            egress_sender: None,
            metrics,
            clock: CycleClock::Wall,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            pending: None,
            replay_now: None,
        }
    }

    /// Also publish every cycle through the MQTT egress channel
    pub fn with_egress_sender(mut self, sender: EgressSender) -> Self {
        self.egress_sender = Some(sender);
        self
    }

    pub fn with_clock(mut self, clock: CycleClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &TrackingEngine {
        &self.engine
    }

    /// Consume batches until the channel closes or shutdown is signalled
    pub async fn run(
        &mut self,
        batch_rx: mpsc::Receiver<ObservationBatch>,
        shutdown: watch::Receiver<bool>,
    ) {
        info!(clock = ?self.clock, poll_interval_secs = %self.poll_interval.as_secs(), "runner_started");
        match self.clock {
            CycleClock::Wall => self.run_polling(batch_rx, shutdown).await,
            CycleClock::Replay => self.run_replay(batch_rx, shutdown).await,
        }
        info!(cycles = %self.engine.cycles(), "runner_stopped");
    }

    async fn run_polling(
        &mut self,
        mut batch_rx: mpsc::Receiver<ObservationBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick_interval = interval(self.poll_interval);

        loop {
            tokio::select! {
                // Drain batches before ticking so a cycle sees the newest one
                biased;

                _ = shutdown_requested(&mut shutdown) => return,
                batch = batch_rx.recv() => {
                    match batch {
                        Some(batch) => self.stash(batch),
                        None => {
                            if let Some(batch) = self.pending.take() {
                                self.run_cycle(batch, Utc::now());
                            }
                            return;
                        }
                    }
                }
                _ = tick_interval.tick() => {
                    let batch = self.pending.take().unwrap_or_default();
                    self.run_cycle(batch, Utc::now());
                }
            }
        }
    }

    async fn run_replay(
        &mut self,
        mut batch_rx: mpsc::Receiver<ObservationBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => return,
                batch = batch_rx.recv() => {
                    let Some(batch) = batch else { return };
                    let now = self.replay_clock(&batch);
                    self.run_cycle(batch, now);
                }
            }
        }
    }

    /// Keep only the newest batch for the next cycle
    pub(crate) fn stash(&mut self, batch: ObservationBatch) {
        if self.pending.replace(batch).is_some() {
            self.metrics.record_batch_superseded();
            debug!("batch_superseded");
        }
    }

    fn replay_clock(&mut self, batch: &ObservationBatch) -> DateTime<Utc> {
        let now = batch.newest_sample_time().or(self.replay_now).unwrap_or_else(Utc::now);
        self.replay_now = Some(now);
        now
    }

    /// Run one cycle and hand its report to every egress
    pub fn run_cycle(&mut self, batch: ObservationBatch, now: DateTime<Utc>) -> Option<CycleReport> {
        let report = match self.engine.process_cycle(&batch.observations, now) {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "cycle_failed");
                return None;
            }
        };
        self.egress.write_report(&report);
        if let Some(sender) = &self.egress_sender {
            sender.send_report(&report);
        }
        Some(report)
    }
}
