//! Typed results for every level of a sync run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use sgca_adapters::AdapterError;
use sgca_core::{BacklogCounts, ObligationCode, Source, YearMonth};
use sgca_storage::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Outcome of one check upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckAction {
    Created,
    Updated,
    Closed,
    Reopened,
    Unchanged,
    Error,
}

impl CheckAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckAction::Created => "created",
            CheckAction::Updated => "updated",
            CheckAction::Closed => "closed",
            CheckAction::Reopened => "reopened",
            CheckAction::Unchanged => "unchanged",
            CheckAction::Error => "error",
        }
    }

    /// Label as reported to operators; dry runs prefix real writes with `would_`.
    pub fn label(&self, dry_run: bool) -> String {
        match self {
            CheckAction::Created if dry_run => "would_create".to_string(),
            CheckAction::Updated if dry_run => "would_update".to_string(),
            CheckAction::Closed if dry_run => "would_close".to_string(),
            CheckAction::Reopened if dry_run => "would_reopen".to_string(),
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for CheckAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckUpsertResult {
    pub expected_item_code: ObligationCode,
    pub period_id: Uuid,
    pub action: CheckAction,
    pub label: String,
    pub dry_run: bool,
    pub check_id: Option<Uuid>,
    pub is_completed: bool,
    pub due_at: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    Adapter,
    SourceNotConfigured,
    CompanyResolution,
    PeriodCreation,
    Upsert,
    Snapshot,
    Timeout,
    Aborted,
}

/// Failure inside one company sync. Never escapes the orchestrator: it is
/// recorded on the company summary as a [`CompanySyncError`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("backlog fetch failed: {0}")]
    Adapter(#[source] AdapterError),
    #[error("company not found in compliance store: {0}")]
    CompanyResolution(String),
    #[error("period {start}..{end} unavailable: {source}")]
    PeriodCreation {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
        #[source]
        source: StoreError,
    },
    #[error("{failed} check upsert(s) failed")]
    Upsert { failed: usize },
    #[error("snapshot not recorded: {0}")]
    Snapshot(#[source] StoreError),
    #[error("company sync timed out after {0:?}")]
    Timeout(Duration),
    #[error("company sync task aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Adapter(err) if err.is_not_configured() => SyncErrorKind::SourceNotConfigured,
            SyncError::Adapter(_) => SyncErrorKind::Adapter,
            SyncError::CompanyResolution(_) => SyncErrorKind::CompanyResolution,
            SyncError::PeriodCreation { .. } => SyncErrorKind::PeriodCreation,
            SyncError::Upsert { .. } => SyncErrorKind::Upsert,
            SyncError::Snapshot(_) => SyncErrorKind::Snapshot,
            SyncError::Timeout(_) => SyncErrorKind::Timeout,
            SyncError::Aborted(_) => SyncErrorKind::Aborted,
        }
    }
}

impl From<AdapterError> for SyncError {
    fn from(err: AdapterError) -> Self {
        SyncError::Adapter(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanySyncError {
    pub kind: SyncErrorKind,
    pub message: String,
}

impl From<&SyncError> for CompanySyncError {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Check action tallies. Dry runs tally the actions they would have taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckTally {
    pub created: usize,
    pub updated: usize,
    pub closed: usize,
    pub reopened: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl CheckTally {
    pub fn record(&mut self, action: CheckAction) {
        match action {
            CheckAction::Created => self.created += 1,
            CheckAction::Updated => self.updated += 1,
            CheckAction::Closed => self.closed += 1,
            CheckAction::Reopened => self.reopened += 1,
            CheckAction::Unchanged => self.unchanged += 1,
            CheckAction::Error => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &CheckTally) {
        self.created += other.created;
        self.updated += other.updated;
        self.closed += other.closed;
        self.reopened += other.reopened;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

/// Result of syncing one company from one source for one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanySyncSummary {
    pub alias: String,
    pub source: Source,
    pub company_id: Option<Uuid>,
    pub period: YearMonth,
    pub backlog: BacklogCounts,
    pub checks: CheckTally,
    pub snapshot_recorded: bool,
    pub errors: Vec<CompanySyncError>,
    pub results: Vec<CheckUpsertResult>,
}

impl CompanySyncSummary {
    pub fn new(alias: impl Into<String>, source: Source, period: YearMonth) -> Self {
        Self {
            alias: alias.into(),
            source,
            company_id: None,
            period,
            backlog: BacklogCounts::default(),
            checks: CheckTally::default(),
            snapshot_recorded: false,
            errors: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn record_error(&mut self, err: &SyncError) {
        self.errors.push(CompanySyncError::from(err));
    }

    pub fn record_check(&mut self, result: CheckUpsertResult) {
        self.checks.record(result.action);
        self.results.push(result);
    }

    pub fn result_for(&self, code: ObligationCode) -> Option<&CheckUpsertResult> {
        self.results.iter().find(|r| r.expected_item_code == code)
    }
}

/// Backlog and check totals accumulated across companies and sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTotals {
    pub backlog: BacklogCounts,
    pub checks: CheckTally,
}

impl SyncTotals {
    pub fn add_company(&mut self, summary: &CompanySyncSummary) {
        self.backlog += summary.backlog;
        self.checks.merge(&summary.checks);
    }

    pub fn merge(&mut self, other: &SyncTotals) {
        self.backlog += other.backlog;
        self.checks.merge(&other.checks);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DisabledByEnv,
    NoCompaniesEnabled,
    AdapterUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::DisabledByEnv => "disabled_by_env",
            SkipReason::NoCompaniesEnabled => "no_companies_enabled",
            SkipReason::AdapterUnavailable => "adapter_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SourceStatus {
    Completed,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSyncResult {
    pub source: Source,
    pub status: SourceStatus,
    pub success: bool,
    pub totals: SyncTotals,
    pub companies: Vec<CompanySyncSummary>,
}

impl SourceSyncResult {
    pub fn skipped(source: Source, reason: SkipReason) -> Self {
        Self {
            source,
            status: SourceStatus::Skipped(reason),
            success: true,
            totals: SyncTotals::default(),
            companies: Vec::new(),
        }
    }

    pub fn completed(source: Source, companies: Vec<CompanySyncSummary>) -> Self {
        let mut totals = SyncTotals::default();
        for company in &companies {
            totals.add_company(company);
        }
        Self {
            source,
            status: SourceStatus::Completed,
            success: companies.iter().all(|c| !c.has_errors()),
            totals,
            companies,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, SourceStatus::Skipped(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSyncResult {
    pub started_at: DateTime<FixedOffset>,
    pub period: YearMonth,
    pub source_requested: SourceSelection,
    pub sla_type: SlaType,
    pub dry_run: bool,
    pub success: bool,
    pub sources: Vec<SourceSyncResult>,
    pub totals: SyncTotals,
    pub companies_processed: usize,
    pub companies_with_errors: usize,
    pub duration_seconds: f64,
}

impl GlobalSyncResult {
    pub fn source(&self, source: Source) -> Option<&SourceSyncResult> {
        self.sources.iter().find(|s| s.source == source)
    }

    pub fn companies(&self) -> impl Iterator<Item = &CompanySyncSummary> {
        self.sources.iter().flat_map(|s| s.companies.iter())
    }

    /// Process exit code: zero only for a fully clean run.
    pub fn exit_code(&self) -> u8 {
        if self.success && self.companies_with_errors == 0 {
            0
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSelection {
    Odoo,
    Skualo,
    #[default]
    Both,
}

impl SourceSelection {
    pub fn sources(&self) -> Vec<Source> {
        match self {
            SourceSelection::Odoo => vec![Source::Odoo],
            SourceSelection::Skualo => vec![Source::Skualo],
            SourceSelection::Both => Source::ALL.to_vec(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSelection::Odoo => "odoo",
            SourceSelection::Skualo => "skualo",
            SourceSelection::Both => "both",
        }
    }
}

impl FromStr for SourceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "odoo" => Ok(SourceSelection::Odoo),
            "skualo" => Ok(SourceSelection::Skualo),
            "both" => Ok(SourceSelection::Both),
            other => Err(format!("unknown source `{other}` (expected odoo, skualo or both)")),
        }
    }
}

/// Which SLA cycles get checks in addition to the aggregate ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaType {
    #[default]
    All,
    Weekly,
    Monthly,
}

impl SlaType {
    pub fn includes_monthly(&self) -> bool {
        matches!(self, SlaType::All | SlaType::Monthly)
    }

    pub fn includes_weekly(&self) -> bool {
        matches!(self, SlaType::All | SlaType::Weekly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlaType::All => "all",
            SlaType::Weekly => "weekly",
            SlaType::Monthly => "monthly",
        }
    }
}

impl FromStr for SlaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(SlaType::All),
            "weekly" => Ok(SlaType::Weekly),
            "monthly" => Ok(SlaType::Monthly),
            other => Err(format!("unknown sla type `{other}` (expected all, weekly or monthly)")),
        }
    }
}
