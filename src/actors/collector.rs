//! SystemCollectorActor - Samples host metrics into the aggregator
//!
//! Periodically reads CPU and memory usage from the host and records
//! them as `system`-category gauges. CPU usage needs two refreshes to
//! produce a delta, so the first sample after startup may read zero.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sysinfo::System;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, warn};

use crate::config::CollectorConfig;
use crate::metrics::{MetricCategory, MetricSample, MetricsAggregator};

use super::messages::CollectorCommand;

/// Actor that samples host CPU/memory
pub struct SystemCollectorActor {
    metrics: Arc<MetricsAggregator>,
    command_rx: mpsc::Receiver<CollectorCommand>,
    sample_interval: Duration,
    system: System,
}

impl SystemCollectorActor {
    pub fn new(
        metrics: Arc<MetricsAggregator>,
        config: CollectorConfig,
        command_rx: mpsc::Receiver<CollectorCommand>,
    ) -> Self {
        Self {
            metrics,
            command_rx,
            sample_interval: Duration::from_secs(config.interval_secs),
            system: System::new_all(),
        }
    }

    /// Run the actor's main loop until shutdown
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting system collector with interval {:?}",
            self.sample_interval
        );

        let mut ticker = interval(self.sample_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CollectorCommand::SampleNow { respond_to } => {
                            self.sample().await;
                            let _ = respond_to.send(());
                        }

                        CollectorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("system collector stopped");
    }

    async fn sample(&mut self) {
        self.system.refresh_all();

        let cpus = self.system.cpus();
        let total_cpus = cpus.len().max(1) as f32;
        let average_usage = cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / total_cpus;

        self.record(MetricSample::gauge("system_cpu_usage_percent", average_usage as f64))
            .await;

        for cpu in cpus {
            let sample = MetricSample::gauge("system_cpu_core_usage_percent", cpu.cpu_usage() as f64)
                .label("core", cpu.name());
            self.record(sample).await;
        }

        let total = self.system.total_memory();
        let used = self.system.used_memory();

        for (kind, value) in [
            ("total", total),
            ("used", used),
            ("free", total.saturating_sub(used)),
            ("swap_total", self.system.total_swap()),
            ("swap_used", self.system.used_swap()),
        ] {
            let sample = MetricSample::gauge("system_memory_usage_bytes", value as f64)
                .label("type", kind);
            self.record(sample).await;
        }

        if total > 0 {
            let percent = used as f64 / total as f64 * 100.0;
            self.record(MetricSample::gauge("system_memory_usage_percent", percent))
                .await;
        }
    }

    async fn record(&self, sample: MetricSample) {
        let sample = sample.category(MetricCategory::System);
        let name = sample.name.clone();
        if let Err(e) = self.metrics.record(sample).await {
            warn!("failed to record host metric {name}: {e}");
        }
    }
}

/// Handle for controlling the SystemCollectorActor
#[derive(Clone)]
pub struct CollectorHandle {
    sender: mpsc::Sender<CollectorCommand>,
}

impl CollectorHandle {
    /// Spawn a new system collector actor
    pub fn spawn(metrics: Arc<MetricsAggregator>, config: CollectorConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = SystemCollectorActor::new(metrics, config, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Take one sample immediately
    pub async fn sample_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::SampleNow { respond_to: tx })
            .await?;
        rx.await?;
        Ok(())
    }

    /// Shut down the collector
    pub async fn shutdown(&self) {
        let _ = self.sender.send(CollectorCommand::Shutdown).await;
    }
}
