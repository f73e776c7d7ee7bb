use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate};
use sgca_adapters::SourceAdapter;
use sgca_core::sla::{calendar_window, weeks_in_month, BusinessCalendar, DeadlineCalculator};
use sgca_core::{
    BacklogCounts, Clock, Company, CompanyMapping, ObligationCode, Period, ReviewStatus, YearMonth,
    DEFAULT_RESPONSIBLE_ROLE,
};
use sgca_storage::{SharedStore, StoreError};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::result::{CompanySyncSummary, SlaType, SyncError};
use crate::snapshot::SnapshotRecorder;
use crate::upsert::{CheckTarget, CheckUpserter};

/// Syncs one company from one source for one month.
#[derive(Clone)]
pub struct CompanySynchronizer {
    store: SharedStore,
    upserter: CheckUpserter,
    snapshots: SnapshotRecorder,
    deadlines: DeadlineCalculator,
}

impl CompanySynchronizer {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, deadlines: DeadlineCalculator) -> Self {
        let upserter = CheckUpserter::new(store.clone(), clock.clone(), deadlines.timezone());
        let snapshots = SnapshotRecorder::new(store.clone(), clock, deadlines.timezone());
        Self {
            store,
            upserter,
            snapshots,
            deadlines,
        }
    }

    pub fn deadlines(&self) -> &DeadlineCalculator {
        &self.deadlines
    }

    pub async fn sync_company(
        &self,
        adapter: &dyn SourceAdapter,
        company: &CompanyMapping,
        month: YearMonth,
        sla_type: SlaType,
        dry_run: bool,
    ) -> CompanySyncSummary {
        let span = info_span!(
            "company_sync",
            company = %company.alias,
            source = %adapter.source(),
            period = %month,
            dry_run
        );
        self.run(adapter, company, month, sla_type, dry_run)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        adapter: &dyn SourceAdapter,
        mapping: &CompanyMapping,
        month: YearMonth,
        sla_type: SlaType,
        dry_run: bool,
    ) -> CompanySyncSummary {
        let source = adapter.source();
        let mut summary = CompanySyncSummary::new(&mapping.alias, source, month);

        let report = match adapter.fetch_backlog(mapping).await {
            Ok(report) => report,
            Err(err) => {
                let err = SyncError::from(err);
                warn!(error = %err, "backlog fetch failed");
                summary.record_error(&err);
                return summary;
            }
        };
        let counts = report.counts();
        summary.backlog = counts;

        let company = match self.resolve_company(mapping).await {
            Ok(company) => company,
            Err(err) => {
                warn!(error = %err, "company resolution failed");
                summary.record_error(&err);
                return summary;
            }
        };
        summary.company_id = Some(company.company_id);

        let monthly_period = match self
            .period_id(company.company_id, month.first_day(), month.last_day(), dry_run)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "monthly period unavailable");
                summary.record_error(&err);
                return summary;
            }
        };

        let calendar = self.calendar(month).await;
        let monthly_due = self.deadlines.monthly_deadline(month, &calendar).fixed_offset();

        for code in codes_for(sla_type) {
            if let Err(err) = self.upserter.ensure_expected_item(code, dry_run).await {
                warn!(code = code.code(), error = %err, "expected item not registered");
            }
        }

        for code in ObligationCode::AGGREGATE {
            self.upsert(&mut summary, &company, monthly_period, code, monthly_due, counts, dry_run)
                .await;
        }

        if sla_type.includes_monthly() {
            for code in ObligationCode::MONTHLY_SLA {
                self.upsert(&mut summary, &company, monthly_period, code, monthly_due, counts, dry_run)
                    .await;
            }
        }

        if sla_type.includes_weekly() {
            for (monday, friday) in weeks_in_month(month) {
                let period = match self
                    .period_id(company.company_id, monday, friday, dry_run)
                    .await
                {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(week = %monday, error = %err, "weekly period unavailable");
                        summary.record_error(&err);
                        continue;
                    }
                };
                let due = self.deadlines.weekly_deadline(friday).fixed_offset();
                for code in ObligationCode::WEEKLY_SLA {
                    self.upsert(&mut summary, &company, period, code, due, counts, dry_run)
                        .await;
                }
            }
        }

        let failed = summary.checks.failed;
        if failed > 0 {
            summary.record_error(&SyncError::Upsert { failed });
        }

        if !dry_run {
            let snapshot = self
                .snapshots
                .build(company.company_id, &mapping.alias, source, month, counts);
            match self.snapshots.record(&snapshot).await {
                Ok(()) => summary.snapshot_recorded = true,
                Err(err) => {
                    warn!(error = %err, "backlog snapshot failed");
                    summary.record_error(&err);
                }
            }
        }

        info!(
            sii = counts.document_acceptance,
            bookkeeping = counts.bookkeeping,
            reconciliation = counts.reconciliation,
            created = summary.checks.created,
            updated = summary.checks.updated,
            closed = summary.checks.closed,
            reopened = summary.checks.reopened,
            unchanged = summary.checks.unchanged,
            failed = summary.checks.failed,
            "company sync complete"
        );
        summary
    }

    #[allow(clippy::too_many_arguments)]
    async fn upsert(
        &self,
        summary: &mut CompanySyncSummary,
        company: &Company,
        period_id: Uuid,
        code: ObligationCode,
        due_at: DateTime<FixedOffset>,
        counts: BacklogCounts,
        dry_run: bool,
    ) {
        let completed = counts.for_obligation(code) == 0;
        let target = CheckTarget {
            company_id: company.company_id,
            period_id,
            code,
            due_at,
            completed,
            review_status: ReviewStatus::for_completion(completed),
            responsible_role: DEFAULT_RESPONSIBLE_ROLE.to_string(),
        };
        let result = self.upserter.upsert(&target, dry_run).await;
        summary.record_check(result);
    }

    /// Direct id first, then a name match. A failed id lookup still falls
    /// back to the name; a blank name is looked up by alias instead.
    async fn resolve_company(&self, mapping: &CompanyMapping) -> Result<Company, SyncError> {
        if let Some(id) = mapping.company_id {
            match self.store.company_by_id(id).await {
                Ok(Some(company)) => return Ok(company),
                Ok(None) => warn!(company_id = %id, "company id not found, trying name"),
                Err(err) => warn!(company_id = %id, error = %err, "company id lookup failed, trying name"),
            }
        }

        let name = match (mapping.name.trim(), mapping.alias.trim()) {
            ("", "") => {
                return Err(SyncError::CompanyResolution(
                    "mapping has neither a name nor an alias".to_string(),
                ))
            }
            ("", alias) => alias,
            (name, _) => name,
        };
        match self.store.company_by_name(name).await {
            Ok(Some(company)) => Ok(company),
            Ok(None) => Err(SyncError::CompanyResolution(format!(
                "{name} ({})",
                mapping.alias
            ))),
            Err(err) => Err(SyncError::CompanyResolution(format!(
                "{name} ({}): {err}",
                mapping.alias
            ))),
        }
    }

    /// Existing period id, or a new one. Dry runs never insert and report a
    /// stable placeholder instead.
    async fn period_id(
        &self,
        company_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        dry_run: bool,
    ) -> Result<Uuid, SyncError> {
        let creation = |source: StoreError| SyncError::PeriodCreation { start, end, source };
        if let Some(period) = self
            .store
            .find_period(company_id, start, end)
            .await
            .map_err(creation)?
        {
            return Ok(period.period_id);
        }
        if dry_run {
            return Ok(Period::planned_id(company_id, start, end));
        }
        let period = self
            .store
            .insert_period(&Period::open(company_id, start, end))
            .await
            .map_err(creation)?;
        info!(start = %start, end = %end, "period created");
        Ok(period.period_id)
    }

    async fn calendar(&self, month: YearMonth) -> BusinessCalendar {
        let (from, to) = calendar_window(month);
        match self.store.business_days(from, to).await {
            Ok(days) => days.into_iter().collect(),
            Err(err) => {
                warn!(error = %err, "business calendar unavailable, assuming Monday to Friday");
                BusinessCalendar::new()
            }
        }
    }
}

/// Obligation codes a sync of `sla_type` touches.
pub fn codes_for(sla_type: SlaType) -> Vec<ObligationCode> {
    let mut codes = ObligationCode::AGGREGATE.to_vec();
    if sla_type.includes_monthly() {
        codes.extend(ObligationCode::MONTHLY_SLA);
    }
    if sla_type.includes_weekly() {
        codes.extend(ObligationCode::WEEKLY_SLA);
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sla_type_selects_codes() {
        assert_eq!(codes_for(SlaType::All).len(), 7);
        let monthly = codes_for(SlaType::Monthly);
        assert_eq!(monthly.len(), 5);
        assert!(monthly.contains(&ObligationCode::CierreMensualConciliacion));
        assert!(!monthly.contains(&ObligationCode::CierreSemanalConciliacion));
        let weekly = codes_for(SlaType::Weekly);
        assert!(weekly.contains(&ObligationCode::CierreSemanalContabilizacion));
        assert!(!weekly.contains(&ObligationCode::CierreMensualContabilizacion));
    }
}
