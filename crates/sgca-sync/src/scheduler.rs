use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::orchestrator::{SyncOrchestrator, SyncRequest};

/// Cron scheduler running a full sync of the current month on each of the
/// two configured schedules, evaluated in the configured timezone.
pub async fn build_scheduler(orchestrator: Arc<SyncOrchestrator>) -> Result<JobScheduler> {
    let config = orchestrator.config().clone();
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    for cron in [&config.sync_cron_1, &config.sync_cron_2] {
        let orchestrator = Arc::clone(&orchestrator);
        let schedule = cron.clone();
        let job = Job::new_async_tz(cron.as_str(), config.timezone, move |_uuid, _l| {
            let orchestrator = Arc::clone(&orchestrator);
            let schedule = schedule.clone();
            Box::pin(async move {
                info!(cron = %schedule, "scheduled sync triggered");
                let result = orchestrator.sync_all(&SyncRequest::default()).await;
                if result.success {
                    info!(
                        period = %result.period,
                        companies = result.companies_processed,
                        "scheduled sync finished"
                    );
                } else {
                    error!(
                        period = %result.period,
                        companies = result.companies_processed,
                        with_errors = result.companies_with_errors,
                        "scheduled sync finished with errors"
                    );
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }

    Ok(sched)
}

/// Runs the scheduler until interrupted.
pub async fn run_scheduler(orchestrator: Arc<SyncOrchestrator>) -> Result<()> {
    let config = orchestrator.config().clone();
    let mut sched = build_scheduler(orchestrator).await?;
    sched.start().await.context("starting scheduler")?;
    info!(
        cron_1 = %config.sync_cron_1,
        cron_2 = %config.sync_cron_2,
        timezone = %config.timezone,
        "scheduler running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgca_adapters::AdapterRegistry;
    use sgca_core::SystemClock;
    use sgca_storage::MemoryStore;

    use crate::company_map::CompanyMap;
    use crate::config::SyncConfig;

    fn orchestrator(config: SyncConfig) -> Arc<SyncOrchestrator> {
        Arc::new(SyncOrchestrator::new(
            config,
            Arc::new(MemoryStore::new()),
            AdapterRegistry::new(),
            CompanyMap::default(),
            Arc::new(SystemClock),
        ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn default_schedules_are_accepted() {
        assert!(build_scheduler(orchestrator(SyncConfig::default())).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_cron_is_rejected() {
        let config = SyncConfig {
            sync_cron_1: "every morning".into(),
            ..SyncConfig::default()
        };
        assert!(build_scheduler(orchestrator(config)).await.is_err());
    }
}
