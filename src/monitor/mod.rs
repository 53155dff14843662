//! Resource monitoring and adaptive concurrency
//!
//! [`ResourceMonitor`] samples the process on a fixed interval and publishes
//! the latest reading on a `watch` channel. [`ConcurrencyController`] turns
//! those readings into the concurrency budget the dispatcher obeys.

mod controller;
mod probe;

pub use controller::{spawn_controller, Adjustment, ConcurrencyController};
pub use probe::{ResourceProbe, ResourceSample, SysinfoProbe};

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

pub struct ResourceMonitor;

impl ResourceMonitor {
    /// Starts sampling `probe` every `interval`
    ///
    /// The task stops once every receiver has been dropped.
    pub fn spawn<P>(mut probe: P, interval: Duration) -> (watch::Receiver<ResourceSample>, JoinHandle<()>)
    where
        P: ResourceProbe + 'static,
    {
        let (tx, rx) = watch::channel(ResourceSample::idle());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let sample = probe.sample();
                trace!(
                    "Resource sample: {:.1} MB, {:.1}% cpu",
                    sample.memory_mb,
                    sample.cpu_percent
                );
                if tx.send(sample).is_err() {
                    break;
                }
            }
        });

        (rx, handle)
    }
}
