//! Queue Scheduler
//!
//! Polls the queue store and runs pending items on a bounded worker pool.
//! A semaphore caps in-flight items at `max_workers`; cancellation stops the
//! poll loop and waits for every dispatched worker before returning.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::QueueItem;
use crate::metrics::{self, MetricsSink};
use crate::processor::{ItemProcessor, ProcessingError};
use crate::store::QueueStore;

/// Configuration for the queue scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on items processed at once
    pub max_workers: usize,
    /// Delay between polls (default: 1 second)
    pub poll_interval: Duration,
    /// Claims older than this are handed back to the pool
    pub stale_claim_timeout: Duration,
    /// How often to look for stale claims after the startup sweep
    pub stale_sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            poll_interval: Duration::from_secs(1),
            stale_claim_timeout: Duration::from_secs(300),
            stale_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Items requested per poll
    pub fn fetch_limit(&self) -> usize {
        self.max_workers * 2
    }
}

pub struct QueueScheduler {
    queue: Arc<dyn QueueStore>,
    processor: Arc<ItemProcessor>,
    metrics: Arc<dyn MetricsSink>,
    config: SchedulerConfig,
    semaphore: Arc<Semaphore>,
}

impl QueueScheduler {
    /// Zero workers or zero intervals are raised to the smallest usable value
    pub fn new(
        queue: Arc<dyn QueueStore>,
        processor: Arc<ItemProcessor>,
        metrics: Arc<dyn MetricsSink>,
        mut config: SchedulerConfig,
    ) -> Self {
        if config.max_workers == 0 {
            warn!("Scheduler configured with zero workers, using 1");
            config.max_workers = 1;
        }
        config.poll_interval = config.poll_interval.max(Duration::from_millis(1));
        config.stale_sweep_interval = config.stale_sweep_interval.max(Duration::from_millis(1));

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        Self {
            queue,
            processor,
            metrics,
            config,
            semaphore,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Workers currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.config.max_workers - self.semaphore.available_permits()
    }

    /// Run until `cancel` fires, then drain in-flight workers
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            max_workers = self.config.max_workers,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Queue scheduler started"
        );

        self.requeue_stale().await;

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let sweep_every = self.config.stale_sweep_interval;
        let mut sweep = interval_at(Instant::now() + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Queue worker panicked");
                    }
                }
                _ = ticker.tick() => {
                    let dispatched = self.poll(&mut workers, &cancel).await;
                    if dispatched > 0 {
                        debug!(dispatched, in_flight = self.in_flight(), "Dispatched queue items");
                    }
                }
                _ = sweep.tick() => self.requeue_stale().await,
            }
        }

        info!(in_flight = workers.len(), "Queue scheduler stopping, draining workers");
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Queue worker panicked");
            }
        }
        self.publish_in_flight();
        info!("Queue scheduler stopped");
    }

    /// Hand claims held past `stale_claim_timeout` back to the pending pool.
    /// Covers workers that died, and items whose completion could not be recorded.
    async fn requeue_stale(&self) {
        match self.queue.requeue_stale(self.config.stale_claim_timeout).await {
            Ok(0) => {}
            Ok(released) => warn!(released, "Released stale queue claims"),
            Err(e) => error!(error = %e, "Stale claim recovery failed"),
        }
    }

    /// One fetch-and-dispatch round. Returns the number of items handed to workers.
    async fn poll(&self, workers: &mut JoinSet<()>, cancel: &CancellationToken) -> usize {
        let items = match self.queue.fetch_pending(self.config.fetch_limit()).await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "Failed to fetch pending queue items");
                return 0;
            }
        };

        let mut dispatched = 0;
        for item in items {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("Worker semaphore closed");
                        break;
                    }
                },
            };

            match self.queue.mark_processing(item.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(queue_item_id = %item.id, "Queue item already claimed");
                    continue;
                }
                Err(e) => {
                    error!(queue_item_id = %item.id, error = %e, "Failed to claim queue item");
                    continue;
                }
            }

            self.spawn_worker(workers, item, permit);
            dispatched += 1;
        }

        dispatched
    }

    fn spawn_worker(&self, workers: &mut JoinSet<()>, item: QueueItem, permit: OwnedSemaphorePermit) {
        self.publish_in_flight();

        let processor = self.processor.clone();
        let queue = self.queue.clone();
        let gauge = self.metrics.clone();
        let semaphore = self.semaphore.clone();
        let max_workers = self.config.max_workers;

        workers.spawn(async move {
            match processor.process_item(&item).await {
                Ok(()) => {}
                Err(ProcessingError::CircuitOpen) => {
                    if let Err(e) = queue.release(item.id).await {
                        error!(queue_item_id = %item.id, error = %e, "Failed to release queue item");
                    }
                }
                Err(e) if e.is_terminal() => {
                    warn!(queue_item_id = %item.id, error = %e, "Queue item failed permanently");
                }
                Err(e) => {
                    debug!(queue_item_id = %item.id, error = %e, "Queue item attempt failed");
                }
            }

            drop(permit);
            let in_flight = max_workers - semaphore.available_permits();
            gauge.set_gauge(metrics::WORKERS_IN_FLIGHT, in_flight as f64);
        });
    }

    fn publish_in_flight(&self) {
        self.metrics
            .set_gauge(metrics::WORKERS_IN_FLIGHT, self.in_flight() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.fetch_limit(), 20);
        assert_eq!(config.stale_sweep_interval, Duration::from_secs(60));
    }
}
