use crate::config::{ConcurrencyConfig, ResourceConfig};
use crate::monitor::ResourceSample;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Direction of a budget change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Decreased { from: usize, to: usize },
    Increased { from: usize, to: usize },
    Unchanged,
}

/// Turns resource samples into a concurrency budget
///
/// Above the high watermark (memory or CPU) the budget drops one step; below
/// the low watermark (both) it grows one step, unless too many hosts are
/// dormant. Between the two nothing changes. At most one step is taken per
/// sample interval.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    budget: usize,
    min: usize,
    max: usize,
    storm_threshold: usize,
    memory_ceiling_mb: f64,
    cpu_ceiling_percent: f64,
    high_watermark: f64,
    low_watermark: f64,
    min_gap: Duration,
    last_change: Option<Instant>,
}

impl ConcurrencyController {
    pub fn new(concurrency: &ConcurrencyConfig, resources: &ResourceConfig) -> Self {
        Self {
            budget: concurrency.initial.clamp(concurrency.min, concurrency.max),
            min: concurrency.min,
            max: concurrency.max,
            storm_threshold: concurrency.storm_host_threshold,
            memory_ceiling_mb: resources.memory_ceiling_mb,
            cpu_ceiling_percent: resources.cpu_ceiling_percent,
            high_watermark: resources.high_watermark,
            low_watermark: resources.low_watermark,
            // Half an interval so tick jitter never swallows a step
            min_gap: resources.sample_interval() / 2,
            last_change: None,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Memory usage as a percentage of the ceiling
    pub fn memory_usage(&self, sample: &ResourceSample) -> f64 {
        sample.memory_mb / self.memory_ceiling_mb * 100.0
    }

    /// CPU usage as a percentage of the ceiling
    pub fn cpu_usage(&self, sample: &ResourceSample) -> f64 {
        sample.cpu_percent / self.cpu_ceiling_percent * 100.0
    }

    /// Feeds one sample; `dormant_hosts` is the current number of hosts in
    /// error cooldown
    pub fn observe(&mut self, sample: &ResourceSample, dormant_hosts: usize, now: Instant) -> Adjustment {
        if let Some(last) = self.last_change {
            if now.saturating_duration_since(last) < self.min_gap {
                return Adjustment::Unchanged;
            }
        }

        let memory = self.memory_usage(sample);
        let cpu = self.cpu_usage(sample);
        let from = self.budget;

        if memory > self.high_watermark || cpu > self.high_watermark {
            if self.budget > self.min {
                self.budget -= 1;
                self.last_change = Some(now);
                return Adjustment::Decreased { from, to: self.budget };
            }
            return Adjustment::Unchanged;
        }

        if memory < self.low_watermark && cpu < self.low_watermark {
            if dormant_hosts >= self.storm_threshold {
                debug!("{} dormant hosts, holding concurrency at {}", dormant_hosts, self.budget);
                return Adjustment::Unchanged;
            }
            if self.budget < self.max {
                self.budget += 1;
                self.last_change = Some(now);
                return Adjustment::Increased { from, to: self.budget };
            }
        }

        Adjustment::Unchanged
    }
}

/// Runs the controller against a sample stream
///
/// The returned receiver carries the budget; this task holds the only sender.
/// The task ends when the sample sender is dropped.
pub fn spawn_controller(
    mut controller: ConcurrencyController,
    mut samples: watch::Receiver<ResourceSample>,
    dormant_hosts: watch::Receiver<usize>,
) -> (watch::Receiver<usize>, JoinHandle<()>) {
    let (budget_tx, budget_rx) = watch::channel(controller.budget());

    let handle = tokio::spawn(async move {
        while samples.changed().await.is_ok() {
            let sample = *samples.borrow_and_update();
            let dormant = *dormant_hosts.borrow();

            match controller.observe(&sample, dormant, Instant::now()) {
                Adjustment::Decreased { from, to } => {
                    info!(
                        "Resource pressure (memory {:.0}%, cpu {:.0}%): concurrency {} -> {}",
                        controller.memory_usage(&sample),
                        controller.cpu_usage(&sample),
                        from,
                        to
                    );
                    budget_tx.send_replace(to);
                }
                Adjustment::Increased { from, to } => {
                    debug!("Resources available: concurrency {} -> {}", from, to);
                    budget_tx.send_replace(to);
                }
                Adjustment::Unchanged => {}
            }
        }
        debug!("Concurrency controller stopped");
    });

    (budget_rx, handle)
}
