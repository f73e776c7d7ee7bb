use std::sync::Arc;
use std::time::Instant;

use sgca_adapters::AdapterRegistry;
use sgca_core::sla::DeadlineCalculator;
use sgca_core::{Clock, Source, YearMonth};
use sgca_storage::SharedStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::company_map::CompanyMap;
use crate::config::SyncConfig;
use crate::result::{
    CompanySyncSummary, GlobalSyncResult, SkipReason, SlaType, SourceSelection, SourceSyncResult,
    SyncError, SyncTotals,
};
use crate::synchronizer::CompanySynchronizer;

/// One invocation of the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    pub source: SourceSelection,
    /// Current civil month when absent.
    pub period: Option<YearMonth>,
    /// Exact company alias.
    pub only: Option<String>,
    pub dry_run: bool,
    pub sla_type: SlaType,
}

/// Runs every eligible company of every requested source and aggregates the
/// outcome. Per-company failures are recorded, never raised.
pub struct SyncOrchestrator {
    config: SyncConfig,
    companies: Arc<CompanyMap>,
    registry: AdapterRegistry,
    synchronizer: CompanySynchronizer,
    clock: Arc<dyn Clock>,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        store: SharedStore,
        registry: AdapterRegistry,
        companies: CompanyMap,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let deadlines = DeadlineCalculator::new(config.timezone);
        let synchronizer = CompanySynchronizer::new(store, Arc::clone(&clock), deadlines);
        Self {
            config,
            companies: Arc::new(companies),
            registry,
            synchronizer,
            clock,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn companies(&self) -> &CompanyMap {
        &self.companies
    }

    pub async fn sync_all(&self, request: &SyncRequest) -> GlobalSyncResult {
        let timer = Instant::now();
        let now = self.clock.now();
        let deadlines = self.synchronizer.deadlines();
        let period = request
            .period
            .unwrap_or_else(|| deadlines.current_month(now));

        info!(
            period = %period,
            source = request.source.as_str(),
            sla_type = request.sla_type.as_str(),
            dry_run = request.dry_run,
            only = request.only.as_deref().unwrap_or("*"),
            "sync run started"
        );

        let mut sources = Vec::new();
        for source in request.source.sources() {
            sources.push(self.sync_source(source, period, request).await);
        }

        let mut totals = SyncTotals::default();
        for result in &sources {
            totals.merge(&result.totals);
        }
        let companies_processed = sources.iter().map(|s| s.companies.len()).sum();
        let companies_with_errors = sources
            .iter()
            .flat_map(|s| s.companies.iter())
            .filter(|c| c.has_errors())
            .count();
        let success = sources.iter().all(|s| s.success);

        let result = GlobalSyncResult {
            started_at: now.with_timezone(&deadlines.timezone()).fixed_offset(),
            period,
            source_requested: request.source,
            sla_type: request.sla_type,
            dry_run: request.dry_run,
            success,
            sources,
            totals,
            companies_processed,
            companies_with_errors,
            duration_seconds: timer.elapsed().as_secs_f64(),
        };

        info!(
            period = %period,
            success,
            companies = companies_processed,
            with_errors = companies_with_errors,
            created = totals.checks.created,
            closed = totals.checks.closed,
            reopened = totals.checks.reopened,
            failed = totals.checks.failed,
            duration_seconds = result.duration_seconds,
            "sync run complete"
        );
        result
    }

    async fn sync_source(
        &self,
        source: Source,
        period: YearMonth,
        request: &SyncRequest,
    ) -> SourceSyncResult {
        if !self.config.source_enabled(source) {
            info!(source = %source, reason = SkipReason::DisabledByEnv.as_str(), "source skipped");
            return SourceSyncResult::skipped(source, SkipReason::DisabledByEnv);
        }

        let eligible = self.companies.eligible(source, request.only.as_deref());
        if eligible.is_empty() {
            info!(source = %source, reason = SkipReason::NoCompaniesEnabled.as_str(), "source skipped");
            return SourceSyncResult::skipped(source, SkipReason::NoCompaniesEnabled);
        }

        let Some(adapter) = self.registry.get(source) else {
            warn!(source = %source, reason = SkipReason::AdapterUnavailable.as_str(), "source skipped");
            return SourceSyncResult::skipped(source, SkipReason::AdapterUnavailable);
        };

        info!(source = %source, companies = eligible.len(), "syncing source");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let timeout = self.config.company_timeout;
        let aliases: Vec<String> = eligible.iter().map(|c| c.alias.clone()).collect();
        let mut tasks = JoinSet::new();

        for (index, company) in eligible.into_iter().enumerate() {
            let synchronizer = self.synchronizer.clone();
            let adapter = Arc::clone(&adapter);
            let semaphore = Arc::clone(&semaphore);
            let sla_type = request.sla_type;
            let dry_run = request.dry_run;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let run = synchronizer.sync_company(&*adapter, &company, period, sla_type, dry_run);
                let summary = match tokio::time::timeout(timeout, run).await {
                    Ok(summary) => summary,
                    Err(_) => {
                        let err = SyncError::Timeout(timeout);
                        warn!(company = %company.alias, source = %source, error = %err, "company sync timed out");
                        let mut summary = CompanySyncSummary::new(&company.alias, source, period);
                        summary.record_error(&err);
                        summary
                    }
                };
                (index, summary)
            });
        }

        let mut slots: Vec<Option<CompanySyncSummary>> = vec![None; aliases.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, summary)) => slots[index] = Some(summary),
                Err(err) => error!(source = %source, error = %err, "company sync task failed"),
            }
        }

        let companies = slots
            .into_iter()
            .zip(aliases)
            .map(|(slot, alias)| {
                slot.unwrap_or_else(|| {
                    let mut summary = CompanySyncSummary::new(alias, source, period);
                    summary.record_error(&SyncError::Aborted("task did not complete".into()));
                    summary
                })
            })
            .collect();

        SourceSyncResult::completed(source, companies)
    }
}
