//! Background refresh jobs
//!
//! Each trend kind gets its own loop:
//! - fixed interval via `tokio::time::interval`
//! - a store-side lock so only one replica refreshes a kind at a time
//! - exponential backoff after repeated failures
//! - graceful shutdown on a broadcast signal

use crate::calculator::{RefreshReport, TrendCalculator};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::kind::TrendKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-run context, carries the id tying one run's log lines together
#[derive(Debug, Clone)]
pub struct JobContext {
    pub correlation_id: String,
}

impl JobContext {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait RefreshJob: Send + Sync {
    fn name(&self) -> &str;

    /// One unguarded refresh pass
    async fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshReport>;

    async fn acquire_lock(&self, token: &str, ttl: Duration) -> Result<bool>;

    async fn release_lock(&self, token: &str) -> Result<()>;

    /// Refresh under the kind's lock. `Ok(None)` when another worker holds it.
    async fn refresh_locked(
        &self,
        ctx: &JobContext,
        now: DateTime<Utc>,
        lock_ttl: Duration,
    ) -> Result<Option<RefreshReport>> {
        let token = &ctx.correlation_id;

        if !self.acquire_lock(token, lock_ttl).await? {
            info!(
                correlation_id = %token,
                job_name = %self.name(),
                "Refresh lock held elsewhere, skipping run"
            );
            return Ok(None);
        }

        let result = self.refresh(now).await;

        if let Err(e) = self.release_lock(token).await {
            warn!(
                correlation_id = %token,
                job_name = %self.name(),
                error = %e,
                "Failed to release refresh lock, it will expire"
            );
        }

        result.map(Some)
    }
}

#[async_trait]
impl<K: TrendKind> RefreshJob for TrendCalculator<K> {
    fn name(&self) -> &str {
        K::NAME
    }

    async fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshReport> {
        TrendCalculator::refresh(self, now).await
    }

    async fn acquire_lock(&self, token: &str, ttl: Duration) -> Result<bool> {
        self.store().acquire_refresh_lock(K::NAME, token, ttl).await
    }

    async fn release_lock(&self, token: &str) -> Result<()> {
        self.store().release_refresh_lock(K::NAME, token).await
    }
}

/// Run one job until shutdown. Errors never end the loop.
pub async fn run_refresh_loop(
    job: Arc<dyn RefreshJob>,
    every: Duration,
    lock_ttl: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(every);
    let mut consecutive_failures = 0u32;

    info!(
        job_name = %job.name(),
        interval_secs = every.as_secs(),
        "Starting refresh loop"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ctx = JobContext::new();

                match job.refresh_locked(&ctx, Utc::now(), lock_ttl).await {
                    Ok(_) => {
                        if consecutive_failures > 0 {
                            info!(
                                job_name = %job.name(),
                                recovered_after = consecutive_failures,
                                "Refresh recovered after failures"
                            );
                            consecutive_failures = 0;
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(
                            correlation_id = %ctx.correlation_id,
                            job_name = %job.name(),
                            error = %e,
                            consecutive_failures = consecutive_failures,
                            "Refresh failed, will retry on next interval"
                        );

                        if consecutive_failures >= 3 {
                            let backoff_secs = 2u64.pow(consecutive_failures.min(5));
                            info!(
                                job_name = %job.name(),
                                backoff_secs = backoff_secs,
                                "Backing off after consecutive failures"
                            );
                            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        }
                    }
                }
            }
            _ = shutdown.recv() => {
                info!(job_name = %job.name(), "Received shutdown signal, stopping refresh loop");
                break;
            }
        }
    }

    info!(job_name = %job.name(), "Refresh loop stopped");
}

/// Spawn a loop per job; each subscribes to `shutdown`
pub fn spawn_refresh_loops(
    jobs: Vec<Arc<dyn RefreshJob>>,
    scheduler: &SchedulerConfig,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    jobs.into_iter()
        .map(|job| {
            tokio::spawn(run_refresh_loop(
                job,
                scheduler.refresh_interval(),
                scheduler.lock_ttl(),
                shutdown.subscribe(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{TagEntity, Tags};
    use crate::store::{MemoryTrendStore, TrendStore};

    fn tag(id: i64) -> TagEntity {
        TagEntity {
            id,
            name: format!("tag{}", id),
            language: None,
            usable: true,
            trendable: Some(true),
        }
    }

    #[tokio::test]
    async fn test_refresh_locked_skips_when_held() {
        let store: Arc<dyn TrendStore> = Arc::new(MemoryTrendStore::new());
        let calculator = TrendCalculator::<Tags>::new(store.clone()).unwrap();

        assert!(store
            .acquire_refresh_lock("tags", "other-worker", Duration::from_secs(60))
            .await
            .unwrap());

        let ctx = JobContext::new();
        let result = calculator
            .refresh_locked(&ctx, Utc::now(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_refresh_locked_releases_lock() {
        let store: Arc<dyn TrendStore> = Arc::new(MemoryTrendStore::new());
        let calculator = TrendCalculator::<Tags>::new(store.clone()).unwrap();
        let now = Utc::now();
        calculator.add(&tag(1), 7, now).await;

        let report = calculator
            .refresh_locked(&JobContext::new(), now, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.updated, 1);

        assert!(store
            .acquire_refresh_lock("tags", "next", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_loop_refreshes_and_stops_on_shutdown() {
        let store: Arc<dyn TrendStore> = Arc::new(MemoryTrendStore::new());
        let calculator = Arc::new(TrendCalculator::<Tags>::new(store.clone()).unwrap());
        calculator.add(&tag(1), 7, Utc::now()).await;

        let (tx, _) = broadcast::channel(1);
        let handles = spawn_refresh_loops(
            vec![calculator.clone() as Arc<dyn RefreshJob>],
            &SchedulerConfig {
                refresh_interval_secs: 3600,
                refresh_lock_ttl_secs: 60,
            },
            &tx,
        );

        for _ in 0..100 {
            if calculator.score(1).await.unwrap() > 0.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calculator.score(1).await.unwrap(), 1.0);

        tx.send(()).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[test]
    fn test_context_ids_unique() {
        assert_ne!(JobContext::new().correlation_id, JobContext::new().correlation_id);
    }
}
