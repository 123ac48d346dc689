use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::coordinator::RunCoordinator;
use crate::pipeline::{SyncPipeline, SyncRunSummary};

/// Status string recorded by the run coordinator for a finished run.
pub fn run_status(summary: &SyncRunSummary) -> String {
    match summary.failed_sources() {
        0 if summary.post_pass_errors.is_empty() => "success".to_string(),
        0 => format!("error: {}", summary.post_pass_errors.join("; ")),
        failed => format!("error: {failed} of {} sources failed", summary.adapters),
    }
}

/// Run the pipeline unless a run is already in progress.
pub async fn run_guarded(
    pipeline: &SyncPipeline,
    coordinator: &Arc<RunCoordinator>,
) -> Option<SyncRunSummary> {
    let Some(guard) = coordinator.try_start() else {
        warn!("crawl already in progress, skipping");
        return None;
    };
    let summary = pipeline.run_once().await;
    guard.finish(run_status(&summary));
    Some(summary)
}

/// Daily job at `schedule_hour:00`, or `None` when scheduling is disabled.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    pipeline: Arc<SyncPipeline>,
    coordinator: Arc<RunCoordinator>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let cron = config.daily_cron();
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        let coordinator = Arc::clone(&coordinator);
        Box::pin(async move {
            info!("scheduled crawl triggered");
            run_guarded(&pipeline, &coordinator).await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(%cron, "daily crawl scheduled");
    Ok(Some(sched))
}
