//! Core domain model for the SGCA compliance bridge: companies, periods,
//! expected items, checks, backlog snapshots and the SLA deadline calculator.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod sla;

pub const CRATE_NAME: &str = "sgca-core";

/// Stage every synced check is created in.
pub const STAGE_OPERATING: &str = "OPERATING";
pub const DEFAULT_RESPONSIBLE_ROLE: &str = "CONTADOR";
pub const DEFAULT_ITEM_WEIGHT: &str = "MEDIUM";

/// External accounting system supplying backlog counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// ERP read through direct database queries.
    Odoo,
    /// ERP read through its paginated REST API.
    Skualo,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Odoo, Source::Skualo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Odoo => "odoo",
            Source::Skualo => "skualo",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown source `{0}` (expected odoo or skualo)")]
    Source(String),
    #[error("invalid period `{0}` (expected YYYY-MM)")]
    YearMonth(String),
}

impl FromStr for Source {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "odoo" => Ok(Source::Odoo),
            "skualo" => Ok(Source::Skualo),
            other => Err(ParseError::Source(other.to_string())),
        }
    }
}

/// A validated calendar month. Construction is the only fallible step, so
/// every date derived from it is infallible. The following month must be
/// representable too, since `last_day` is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)?;
        let candidate = Self { year, month };
        let next = candidate.next();
        NaiveDate::from_ymd_opt(next.year, next.month, 1).map(|_| candidate)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("year-month validated on construction")
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day().pred_opt().expect("first day of a month always has a predecessor")
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// `YYYY-MM` label.
    pub fn code(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::YearMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        YearMonth::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
}

impl ReviewStatus {
    /// Review status implied by a completion flag: approved iff completed.
    pub fn for_completion(completed: bool) -> Self {
        if completed {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Approved => "APPROVED",
        }
    }
}

/// Accounting entity tracked in the compliance store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub company_id: Uuid,
    pub name: String,
}

/// Closed date interval; monthly (1st..last day) or weekly (Monday..Friday).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub period_id: Uuid,
    pub company_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(default)]
    pub is_closed: bool,
}

impl Period {
    pub fn open(company_id: Uuid, period_start: NaiveDate, period_end: NaiveDate) -> Self {
        Self {
            period_id: Uuid::new_v4(),
            company_id,
            period_start,
            period_end,
            is_closed: false,
        }
    }

    /// Stable identifier for a period that has not been written yet. Used by
    /// dry runs so repeated previews report the same placeholder.
    pub fn planned_id(company_id: Uuid, period_start: NaiveDate, period_end: NaiveDate) -> Uuid {
        let name = format!("{company_id}:{period_start}:{period_end}");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

/// Recurring obligations the bridge keeps checks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObligationCode {
    /// Supplier documents awaiting acceptance in SII.
    RevisionFacturasProveedor,
    /// Documents awaiting bookkeeping.
    DigitacionFacturas,
    /// Bank movements awaiting reconciliation.
    ConciliacionBancaria,
    CierreMensualContabilizacion,
    CierreMensualConciliacion,
    CierreSemanalContabilizacion,
    CierreSemanalConciliacion,
}

impl ObligationCode {
    pub const AGGREGATE: [ObligationCode; 3] = [
        ObligationCode::RevisionFacturasProveedor,
        ObligationCode::DigitacionFacturas,
        ObligationCode::ConciliacionBancaria,
    ];

    pub const MONTHLY_SLA: [ObligationCode; 2] = [
        ObligationCode::CierreMensualContabilizacion,
        ObligationCode::CierreMensualConciliacion,
    ];

    pub const WEEKLY_SLA: [ObligationCode; 2] = [
        ObligationCode::CierreSemanalContabilizacion,
        ObligationCode::CierreSemanalConciliacion,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ObligationCode::RevisionFacturasProveedor => "REVISION_FACTURAS_PROVEEDOR",
            ObligationCode::DigitacionFacturas => "DIGITACION_FACTURAS",
            ObligationCode::ConciliacionBancaria => "CONCILIACION_BANCARIA",
            ObligationCode::CierreMensualContabilizacion => "CIERRE_MENSUAL_CONTABILIZACION",
            ObligationCode::CierreMensualConciliacion => "CIERRE_MENSUAL_CONCILIACION",
            ObligationCode::CierreSemanalContabilizacion => "CIERRE_SEMANAL_CONTABILIZACION",
            ObligationCode::CierreSemanalConciliacion => "CIERRE_SEMANAL_CONCILIACION",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ObligationCode::RevisionFacturasProveedor => "Revisión Facturas Proveedor",
            ObligationCode::DigitacionFacturas => "Digitación Facturas",
            ObligationCode::ConciliacionBancaria => "Conciliación Bancaria",
            ObligationCode::CierreMensualContabilizacion => "Cierre Mensual Contabilización",
            ObligationCode::CierreMensualConciliacion => "Cierre Mensual Conciliación",
            ObligationCode::CierreSemanalContabilizacion => "Cierre Semanal Contabilización",
            ObligationCode::CierreSemanalConciliacion => "Cierre Semanal Conciliación",
        }
    }

    pub fn catalog_entry(&self) -> ExpectedItem {
        ExpectedItem {
            expected_item_code: self.code().to_string(),
            name: self.label().to_string(),
            weight: DEFAULT_ITEM_WEIGHT.to_string(),
            default_responsible_role: DEFAULT_RESPONSIBLE_ROLE.to_string(),
            active: true,
        }
    }
}

impl fmt::Display for ObligationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Catalog entry for one obligation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedItem {
    pub expected_item_code: String,
    pub name: String,
    pub weight: String,
    pub default_responsible_role: String,
    pub active: bool,
}

/// Idempotency key of a check: unique per (company, period, item code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckKey {
    pub company_id: Uuid,
    pub period_id: Uuid,
    pub expected_item_code: String,
}

impl CheckKey {
    pub fn new(company_id: Uuid, period_id: Uuid, code: ObligationCode) -> Self {
        Self {
            company_id,
            period_id,
            expected_item_code: code.code().to_string(),
        }
    }
}

/// One tracked obligation for one company and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedItemCheck {
    pub expected_item_check_id: Uuid,
    pub company_id: Uuid,
    pub period_id: Uuid,
    pub expected_item_code: String,
    pub stage_code: String,
    pub responsible_role: String,
    pub due_at: DateTime<FixedOffset>,
    pub grace_until: DateTime<FixedOffset>,
    pub is_completed: bool,
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<FixedOffset>>,
    pub item_weight: String,
}

impl ExpectedItemCheck {
    pub fn key(&self) -> CheckKey {
        CheckKey {
            company_id: self.company_id,
            period_id: self.period_id,
            expected_item_code: self.expected_item_code.clone(),
        }
    }
}

/// Partial update applied to an existing check. `completed_at` is tri-state:
/// `None` leaves the column alone, `Some(None)` clears it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckPatch {
    pub is_completed: bool,
    pub review_status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<DateTime<FixedOffset>>>,
}

impl CheckPatch {
    pub fn apply_to(&self, check: &mut ExpectedItemCheck) {
        check.is_completed = self.is_completed;
        check.review_status = self.review_status;
        if let Some(completed_at) = self.completed_at {
            check.completed_at = completed_at;
        }
    }
}

/// Append-only backlog fact row used for trend reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogSnapshot {
    pub company_id: Uuid,
    pub period: String,
    pub captured_at: DateTime<FixedOffset>,
    pub sii_count: u64,
    pub contabilizar_count: u64,
    pub conciliar_count: u64,
    pub source: Source,
    pub db_alias: String,
}

/// Row of the sparse business-day calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessDay {
    pub day: NaiveDate,
    pub is_business_day: bool,
}

/// Unresolved item contributing to a backlog count.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BacklogItem {
    pub id: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

/// One backlog category as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BacklogCategory {
    pub count: u64,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub items: Vec<BacklogItem>,
}

impl BacklogCategory {
    pub fn from_items(items: Vec<BacklogItem>) -> Self {
        let total = items.iter().filter_map(|item| item.amount).sum::<f64>();
        Self {
            count: items.len() as u64,
            total: Some(total),
            items,
        }
    }
}

/// Normalized backlog handed from adapters to the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogReport {
    pub company: String,
    pub source: Source,
    pub queried_at: DateTime<Utc>,
    pub document_acceptance: BacklogCategory,
    pub bookkeeping: BacklogCategory,
    pub reconciliation: BacklogCategory,
}

impl BacklogReport {
    pub fn counts(&self) -> BacklogCounts {
        BacklogCounts {
            document_acceptance: self.document_acceptance.count,
            bookkeeping: self.bookkeeping.count,
            reconciliation: self.reconciliation.count,
        }
    }
}

/// The three backlog counts the check state machine is driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BacklogCounts {
    pub document_acceptance: u64,
    pub bookkeeping: u64,
    pub reconciliation: u64,
}

impl BacklogCounts {
    /// Backlog count driving completion of an obligation.
    pub fn for_obligation(&self, code: ObligationCode) -> u64 {
        match code {
            ObligationCode::RevisionFacturasProveedor => self.document_acceptance,
            ObligationCode::DigitacionFacturas
            | ObligationCode::CierreMensualContabilizacion
            | ObligationCode::CierreSemanalContabilizacion => self.bookkeeping,
            ObligationCode::ConciliacionBancaria
            | ObligationCode::CierreMensualConciliacion
            | ObligationCode::CierreSemanalConciliacion => self.reconciliation,
        }
    }
}

impl AddAssign for BacklogCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.document_acceptance += rhs.document_acceptance;
        self.bookkeeping += rhs.bookkeeping;
        self.reconciliation += rhs.reconciliation;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdooMapping {
    #[serde(default)]
    pub enabled: bool,
    /// Database name; the company alias when absent.
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkualoMapping {
    #[serde(default)]
    pub enabled: bool,
    /// Tax id the tenant is addressed by in the API path.
    #[serde(default)]
    pub rut: Option<String>,
}

/// One entry of the static company map, keyed by its alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyMapping {
    #[serde(skip)]
    pub alias: String,
    pub name: String,
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub odoo: Option<OdooMapping>,
    #[serde(default)]
    pub skualo: Option<SkualoMapping>,
}

impl CompanyMapping {
    pub fn enabled_for(&self, source: Source) -> bool {
        match source {
            Source::Odoo => self.odoo.as_ref().is_some_and(|m| m.enabled),
            Source::Skualo => self.skualo.as_ref().is_some_and(|m| m.enabled),
        }
    }

    pub fn odoo_database(&self) -> &str {
        self.odoo
            .as_ref()
            .and_then(|m| m.database.as_deref())
            .unwrap_or(&self.alias)
    }

    pub fn skualo_rut(&self) -> Option<&str> {
        self.skualo
            .as_ref()
            .and_then(|m| m.rut.as_deref())
            .map(str::trim)
            .filter(|rut| !rut.is_empty())
    }
}

/// Time source, injected so state transitions can be tested at fixed instants.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
