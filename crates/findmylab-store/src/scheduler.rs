//! Periodic runner for scheduled publish/unpublish jobs.

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::collection::Collection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Six-field cron expression (seconds first).
    pub cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: "0 * * * * *".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("FINDMYLAB_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.enabled),
            cron: std::env::var("FINDMYLAB_SCHEDULE_CRON").unwrap_or(defaults.cron),
        }
    }
}

/// Builds (but does not start) a scheduler that drains due jobs on every
/// cron tick. `None` when disabled.
pub async fn maybe_build_scheduler(
    config: &SchedulerConfig,
    collection: Collection,
) -> Result<Option<JobScheduler>> {
    if !config.enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(config.cron.as_str(), move |_uuid, _l| {
        let collection = collection.clone();
        Box::pin(async move {
            match collection.run_scheduled(Utc::now()).await {
                Ok(0) => {}
                Ok(applied) => info!(applied, "applied scheduled status changes"),
                Err(err) => warn!(error = %err, "running scheduled jobs failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {}", config.cron))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
