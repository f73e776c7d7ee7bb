use std::fmt::Write;

use sgca_sync::{CompanySyncSummary, GlobalSyncResult, SourceStatus};

/// Plain-text run summary printed when `--json` is not given.
pub fn render(result: &GlobalSyncResult) -> String {
    let mut out = String::new();
    let mode = if result.dry_run { ", dry run" } else { "" };
    let _ = writeln!(
        out,
        "sync {} (source: {}, sla: {}{mode})",
        result.period,
        result.source_requested.as_str(),
        result.sla_type.as_str()
    );

    for source in &result.sources {
        match source.status {
            SourceStatus::Skipped(reason) => {
                let _ = writeln!(out, "  {}: skipped ({})", source.source, reason.as_str());
            }
            SourceStatus::Completed => {
                let _ = writeln!(
                    out,
                    "  {}: {} companies, {}",
                    source.source,
                    source.companies.len(),
                    if source.success { "ok" } else { "with errors" }
                );
                for company in &source.companies {
                    render_company(&mut out, company, result.dry_run);
                }
            }
        }
    }

    let checks = &result.totals.checks;
    let verb = if result.dry_run { "would " } else { "" };
    let _ = writeln!(
        out,
        "totals: {} companies ({} with errors); {verb}create {}, {verb}update {}, {verb}close {}, {verb}reopen {}, unchanged {}, failed {}",
        result.companies_processed,
        result.companies_with_errors,
        checks.created,
        checks.updated,
        checks.closed,
        checks.reopened,
        checks.unchanged,
        checks.failed
    );
    let _ = writeln!(
        out,
        "backlog: sii {}, contabilizar {}, conciliar {}",
        result.totals.backlog.document_acceptance,
        result.totals.backlog.bookkeeping,
        result.totals.backlog.reconciliation
    );
    let _ = writeln!(
        out,
        "result: {} in {:.2}s",
        if result.exit_code() == 0 { "OK" } else { "FAILED" },
        result.duration_seconds
    );
    out
}

fn render_company(out: &mut String, company: &CompanySyncSummary, dry_run: bool) {
    let c = &company.checks;
    let _ = writeln!(
        out,
        "    {:<12} sii {:>3}  contabilizar {:>3}  conciliar {:>3}  | +{} ~{} closed {} reopened {} ={} !{}{}",
        company.alias,
        company.backlog.document_acceptance,
        company.backlog.bookkeeping,
        company.backlog.reconciliation,
        c.created,
        c.updated,
        c.closed,
        c.reopened,
        c.unchanged,
        c.failed,
        if dry_run || company.snapshot_recorded { "" } else { "  (no snapshot)" }
    );
    for error in &company.errors {
        let _ = writeln!(out, "      error[{:?}]: {}", error.kind, error.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use sgca_core::{Source, YearMonth};
    use sgca_sync::{
        SkipReason, SlaType, SourceSelection, SourceSyncResult, SyncError, SyncTotals,
    };

    fn result(dry_run: bool) -> GlobalSyncResult {
        let period = YearMonth::new(2025, 1).unwrap();
        let mut broken = CompanySyncSummary::new("CISI", Source::Odoo, period);
        broken.record_error(&SyncError::CompanyResolution("CISI Ltda (CISI)".into()));
        let odoo = SourceSyncResult::completed(Source::Odoo, vec![broken]);
        let skualo = SourceSyncResult::skipped(Source::Skualo, SkipReason::DisabledByEnv);
        GlobalSyncResult {
            started_at: DateTime::parse_from_rfc3339("2025-02-10T09:00:00-03:00").unwrap(),
            period,
            source_requested: SourceSelection::Both,
            sla_type: SlaType::All,
            dry_run,
            success: false,
            totals: SyncTotals::default(),
            sources: vec![odoo, skualo],
            companies_processed: 1,
            companies_with_errors: 1,
            duration_seconds: 0.5,
        }
    }

    #[test]
    fn summary_lists_skips_errors_and_outcome() {
        let text = render(&result(false));
        assert!(text.starts_with("sync 2025-01 (source: both, sla: all)"));
        assert!(text.contains("skualo: skipped (disabled_by_env)"));
        assert!(text.contains("odoo: 1 companies, with errors"));
        assert!(text.contains("error[CompanyResolution]: company not found"));
        assert!(text.contains("(no snapshot)"));
        assert!(text.contains("result: FAILED"));
    }

    #[test]
    fn dry_run_summary_speaks_in_planned_actions() {
        let text = render(&result(true));
        assert!(text.contains(", dry run)"));
        assert!(text.contains("would create 0"));
        assert!(!text.contains("(no snapshot)"));
    }
}
