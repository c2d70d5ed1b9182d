//! Background task driving the reconciliation engine at a fixed delay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::engine::ReconciliationEngine;

pub struct Scheduler {
    engine: Arc<ReconciliationEngine>,
    config: SchedulerConfig,
}

/// Owned handle to a running scheduler task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    cycles: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(engine: Arc<ReconciliationEngine>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Spawns the loop. Returns `None` when scheduling is disabled (test profile
    /// or `SCHEDULER_ENABLED=0`).
    pub fn start(self) -> Option<SchedulerHandle> {
        if !self.config.enabled {
            info!("scheduler disabled; background ingestion will not run");
            return None;
        }
        let (tx, rx) = watch::channel(false);
        let cycles = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run_loop(self.engine, self.config, rx, cycles.clone()));
        Some(SchedulerHandle {
            shutdown: tx,
            task,
            cycles,
        })
    }
}

impl SchedulerHandle {
    /// Cycles finished so far, including ones that panicked.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Signals shutdown and waits for the loop to exit. A cycle already in
    /// progress runs to completion first.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("scheduler task failed")?;
        info!("scheduler stopped");
        Ok(())
    }
}

async fn run_loop(
    engine: Arc<ReconciliationEngine>,
    config: SchedulerConfig,
    mut shutdown: watch::Receiver<bool>,
    cycles: Arc<AtomicU64>,
) {
    info!(interval_secs = config.interval.as_secs_f64(), "scheduler started");
    loop {
        let cycle = cycles.load(Ordering::SeqCst) + 1;
        info!(cycle, "scheduler tick");

        // Run the cycle in its own task so a panic surfaces as a JoinError
        // instead of killing the loop.
        let engine_c = engine.clone();
        match tokio::spawn(async move { engine_c.run_cycle().await }).await {
            Ok(report) => {
                if !report.providers_failed.is_empty() {
                    info!(cycle, failed = ?report.providers_failed, "cycle finished with provider failures");
                }
            }
            Err(join_err) => {
                error!(cycle, error = %join_err, "ingestion cycle aborted unexpectedly; next tick still scheduled");
            }
        }
        cycles.fetch_add(1, Ordering::SeqCst);

        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            changed = shutdown.changed() => {
                // Sender dropped or stop requested.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IncomingOffer;
    use crate::providers::ProviderAdapter;
    use crate::store::MemoryCatalogStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProvider {
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        panic_on_first: bool,
    }

    #[async_trait]
    impl ProviderAdapter for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }
        fn source_id(&self) -> i64 {
            1
        }
        async fn fetch(&self) -> Result<Vec<IncomingOffer>> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && n == 0 {
                panic!("provider blew up");
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![IncomingOffer::new("1", "Aspirin", None, 1)])
        }
    }

    fn scheduler(provider: Arc<CountingProvider>, enabled: bool) -> Scheduler {
        let engine = ReconciliationEngine::new(
            vec![provider],
            Arc::new(MemoryCatalogStore::new()),
            Duration::from_secs(5),
        );
        Scheduler::new(
            Arc::new(engine),
            SchedulerConfig {
                enabled,
                interval: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test]
    async fn disabled_scheduler_does_not_start() {
        let provider = Arc::new(CountingProvider::default());
        assert!(scheduler(provider.clone(), false).start().is_none());
        tokio::task::yield_now().await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_never_overlap_and_delay_follows_completion() {
        let provider = Arc::new(CountingProvider::default());
        let handle = scheduler(provider.clone(), true).start().unwrap();

        // Cycles start at 0s, 1.05s, 2.10s, 3.15s given a 50ms fetch and 1s delay.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.stop().await.unwrap();

        assert_eq!(provider.fetches.load(Ordering::SeqCst), 4);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_provider_does_not_kill_loop() {
        let provider = Arc::new(CountingProvider {
            panic_on_first: true,
            ..Default::default()
        });
        let handle = scheduler(provider.clone(), true).start().unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(handle.cycles_completed() >= 2);
        handle.stop().await.unwrap();
        assert!(provider.fetches.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_loop() {
        let provider = Arc::new(CountingProvider::default());
        let handle = scheduler(provider.clone(), true).start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await.unwrap();

        let after_stop = provider.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), after_stop);
    }
}
