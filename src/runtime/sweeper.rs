/// Background presence sweeper
///
/// `list_active` already filters by the liveness window, so the sweeper only
/// reclaims memory held by viewers who never said goodbye. It runs as a cron
/// job on tokio-cron-scheduler.

use crate::collab::PresenceTracker;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct PresenceSweeper {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_uuid: RwLock<Option<Uuid>>,
    presence: Arc<PresenceTracker>,
    schedule: String,
}

impl PresenceSweeper {
    pub async fn new(presence: Arc<PresenceTracker>, schedule: impl Into<String>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid: RwLock::new(None),
            presence,
            schedule: schedule.into(),
        })
    }

    /// Register the eviction job and start the scheduler
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting presence sweeper ({})", self.schedule);

        let presence = Arc::clone(&self.presence);
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let presence = Arc::clone(&presence);
            Box::pin(async move {
                let evicted = presence.evict_stale();
                if evicted > 0 {
                    tracing::debug!("🧹 Evicted {} stale presence entries", evicted);
                }
            })
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            let job_uuid = scheduler.add(job).await?;
            scheduler.start().await?;
            job_uuid
        };
        *self.job_uuid.write().await = Some(job_uuid);

        tracing::info!("✅ Presence sweeper started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping presence sweeper");

        if let Some(job_uuid) = self.job_uuid.write().await.take() {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&job_uuid).await {
                tracing::warn!("⚠️ Failed to remove sweeper job: {}", e);
            }
        }

        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        Ok(())
    }
}
