use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use reqwest::header::ACCEPT;
use serde_json::Value as JsonValue;
use sgca_core::sla::DEFAULT_TIMEZONE;
use sgca_core::{
    BacklogCategory, BacklogItem, BacklogReport, Clock, CompanyMapping, Source, SystemClock,
};
use sgca_storage::HttpClient;
use tracing::{debug, info_span, warn, Instrument};

use crate::{AdapterError, SourceAdapter};

pub const DEFAULT_SKUALO_BASE_URL: &str = "https://api.skualo.cl";
/// Days after reception during which SII still expects an explicit answer.
pub const TACIT_ACCEPTANCE_DAYS: i64 = 8;
const PAGE_SIZE: u32 = 100;
const DEFAULT_MAX_PAGES: u32 = 500;
/// Dispatch guides never reach the purchase ledger.
const DISPATCH_GUIDE_DTE_TYPE: i64 = 52;
const UNKNOWN_RECEPTION_AGE: i64 = 999;
const BANK_ACCOUNT_PREFIX: &str = "1102";
const BANK_KEYWORDS: [&str; 21] = [
    "banco",
    "santander",
    "chile",
    "estado",
    "bci",
    "scotiabank",
    "itau",
    "itaú",
    "security",
    "bice",
    "falabella",
    "ripley",
    "consorcio",
    "internacional",
    "corpbanca",
    "tapp",
    "tenpo",
    "mercado pago",
    "cuenta corriente",
    "cta cte",
    "cta. cte",
];

#[derive(Clone)]
pub struct SkualoSettings {
    pub token: String,
    pub base_url: String,
    /// Zone used for "today" when ageing documents and picking report months.
    pub timezone: Tz,
    pub max_pages: u32,
}

impl SkualoSettings {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_SKUALO_BASE_URL.to_string(),
            timezone: DEFAULT_TIMEZONE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl fmt::Debug for SkualoSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkualoSettings")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timezone", &self.timezone)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

/// Reads pending work from the Skualo REST API. Tenants are addressed by RUT.
pub struct SkualoAdapter {
    http: Arc<HttpClient>,
    settings: SkualoSettings,
    clock: Arc<dyn Clock>,
}

impl SkualoAdapter {
    pub fn new(http: Arc<HttpClient>, settings: SkualoSettings) -> Self {
        Self {
            http,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn url(&self, rut: &str, endpoint: &str) -> String {
        format!(
            "{}/{}{}",
            self.settings.base_url.trim_end_matches('/'),
            rut,
            endpoint
        )
    }

    async fn get(
        &self,
        rut: &str,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<JsonValue, AdapterError> {
        let url = self.url(rut, endpoint);
        let token = &self.settings.token;
        let value: JsonValue = self
            .http
            .get_json(endpoint, |client| {
                client
                    .get(&url)
                    .bearer_auth(token)
                    .header(ACCEPT, "application/json")
                    .query(query)
            })
            .await?;
        Ok(value)
    }

    async fn get_all(&self, rut: &str, endpoint: &str) -> Result<Vec<JsonValue>, AdapterError> {
        let mut items = Vec::new();
        for page in 1..=self.settings.max_pages {
            let query = [
                ("PageSize", PAGE_SIZE.to_string()),
                ("Page", page.to_string()),
            ];
            let (page_items, has_next) = split_page(self.get(rut, endpoint, &query).await?);
            let empty = page_items.is_empty();
            items.extend(page_items);
            if empty || !has_next {
                return Ok(items);
            }
        }
        warn!(
            endpoint,
            max_pages = self.settings.max_pages,
            "pagination stopped at page limit"
        );
        Ok(items)
    }

    /// Folios already booked in the purchase ledger, January through `month`.
    /// A month that cannot be read is skipped: its documents stay pending.
    async fn booked_folios(&self, rut: &str, year: i32, month: u32) -> HashSet<String> {
        let mut folios = HashSet::new();
        for m in 1..=month {
            let endpoint = format!("/contabilidad/reportes/librocompras/{year}{m:02}");
            match self
                .get(rut, &endpoint, &[("IdSucursal", "0".to_string())])
                .await
            {
                Ok(JsonValue::Array(rows)) => {
                    folios.extend(rows.iter().filter_map(ledger_folio));
                }
                Ok(_) => debug!(%endpoint, "purchase ledger returned no rows"),
                Err(err) => warn!(%endpoint, error = %err, "purchase ledger unavailable"),
            }
        }
        folios
    }

    async fn unreconciled_movements(
        &self,
        rut: &str,
        period: &str,
    ) -> Result<Vec<BacklogItem>, AdapterError> {
        let endpoint = format!("/contabilidad/reportes/balancetributario/{period}");
        let balance = match self.get(rut, &endpoint, &[]).await? {
            JsonValue::Array(accounts) => accounts,
            _ => Vec::new(),
        };

        let mut items = Vec::new();
        for account in detect_bank_accounts(&balance) {
            let code = json_str(account, "idCuenta").unwrap_or_default();
            let name = json_str(account, "cuenta").unwrap_or_default();
            let movements = self.get_all(rut, &format!("/bancos/{code}")).await?;
            items.extend(
                movements
                    .iter()
                    .filter(|m| is_unreconciled(m))
                    .map(|m| movement_item(m, name)),
            );
        }
        Ok(items)
    }

    async fn fetch_for(
        &self,
        company: &CompanyMapping,
        rut: &str,
    ) -> Result<BacklogReport, AdapterError> {
        let queried_at = self.clock.now();
        let now = queried_at.with_timezone(&self.settings.timezone).naive_local();
        let year = now.year();
        let period = format!("{year}{:02}", now.month());

        let received = self.get_all(rut, "/sii/dte/recibidos").await?;
        let year_prefix = year.to_string();
        let (pending, answered): (Vec<&JsonValue>, Vec<&JsonValue>) = received
            .iter()
            .filter(|dte| {
                json_str(dte, "fechaEmision").is_some_and(|d| d.starts_with(&year_prefix))
            })
            .partition(|dte| is_pending_acceptance(dte, now));

        let booked = self.booked_folios(rut, year, now.month()).await;
        let unbooked: Vec<BacklogItem> = answered
            .into_iter()
            .filter(|dte| json_i64(dte, "idTipoDocumento") != Some(DISPATCH_GUIDE_DTE_TYPE))
            .filter(|dte| json_scalar(dte, "folio").is_some_and(|f| !booked.contains(&f)))
            .map(dte_item)
            .collect();

        let reconciliation = self.unreconciled_movements(rut, &period).await?;
        debug!(
            received = received.len(),
            pending = pending.len(),
            booked = booked.len(),
            unbooked = unbooked.len(),
            unreconciled = reconciliation.len(),
            "skualo backlog classified"
        );

        Ok(BacklogReport {
            company: company.name.clone(),
            source: Source::Skualo,
            queried_at,
            document_acceptance: BacklogCategory::from_items(
                pending.into_iter().map(dte_item).collect(),
            ),
            bookkeeping: BacklogCategory::from_items(unbooked),
            reconciliation: BacklogCategory::from_items(reconciliation),
        })
    }
}

#[async_trait]
impl SourceAdapter for SkualoAdapter {
    fn source(&self) -> Source {
        Source::Skualo
    }

    async fn fetch_backlog(&self, company: &CompanyMapping) -> Result<BacklogReport, AdapterError> {
        let rut = company
            .skualo_rut()
            .ok_or_else(|| AdapterError::NotConfigured {
                backend: Source::Skualo,
                alias: company.alias.clone(),
                detail: "no rut in company map".to_string(),
            })?
            .to_string();
        let span = info_span!("skualo_backlog", company = %company.alias, rut = %rut);
        self.fetch_for(company, &rut).instrument(span).await
    }
}

/// Items and whether another page follows. Bare arrays are a single page.
fn split_page(data: JsonValue) -> (Vec<JsonValue>, bool) {
    match data {
        JsonValue::Array(items) => (items, false),
        JsonValue::Object(mut map) => {
            let has_next = map.get("next").is_some_and(truthy);
            let items = match map.remove("items") {
                Some(JsonValue::Array(items)) => items,
                _ => Vec::new(),
            };
            (items, has_next)
        }
        _ => (Vec::new(), false),
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn json_str<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value.get(key).and_then(JsonValue::as_str)
}

fn json_f64(value: &JsonValue, key: &str) -> Option<f64> {
    value.get(key).and_then(JsonValue::as_f64)
}

fn json_i64(value: &JsonValue, key: &str) -> Option<i64> {
    match value.get(key)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Scalar rendered as a non-empty string; folios arrive as numbers or text.
fn json_scalar(value: &JsonValue, key: &str) -> Option<String> {
    let rendered = match value.get(key)? {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!rendered.is_empty() && rendered != "0").then_some(rendered)
}

fn json_date(value: &JsonValue, key: &str) -> Option<NaiveDate> {
    json_str(value, key)
        .and_then(|s| s.get(..10))
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn ledger_folio(row: &JsonValue) -> Option<String> {
    ["NumDoc", "numDoc", "folio"]
        .iter()
        .find_map(|key| json_scalar(row, key))
}

/// Whole days between reception (`creadoEl`) and `now`, or 999 when the
/// reception time is missing or unreadable.
pub fn days_since_reception(created_at: Option<&str>, now: NaiveDateTime) -> i64 {
    let Some(raw) = created_at.map(str::trim).filter(|s| !s.is_empty()) else {
        return UNKNOWN_RECEPTION_AGE;
    };
    let received = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| {
            let whole_seconds = raw.split('.').next().unwrap_or(raw);
            ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(whole_seconds, fmt).ok())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        });
    match received {
        Some(received) => (now - received).num_days(),
        None => UNKNOWN_RECEPTION_AGE,
    }
}

/// A received DTE still awaits acceptance when nobody answered it and the
/// tacit acceptance window has not elapsed.
pub fn is_pending_acceptance(dte: &JsonValue, now: NaiveDateTime) -> bool {
    let answered = dte.get("fechaRespuesta").is_some_and(truthy);
    !answered && days_since_reception(json_str(dte, "creadoEl"), now) <= TACIT_ACCEPTANCE_DAYS
}

/// Trial-balance accounts that hold bank movements: the `1102` group plus
/// any asset account named like a bank.
pub fn detect_bank_accounts(balance: &[JsonValue]) -> Vec<&JsonValue> {
    balance
        .iter()
        .filter(|account| {
            let code = json_str(account, "idCuenta").unwrap_or_default();
            let name = json_str(account, "cuenta").unwrap_or_default().to_lowercase();
            code.starts_with(BANK_ACCOUNT_PREFIX)
                || (code.starts_with('1') && BANK_KEYWORDS.iter().any(|k| name.contains(k)))
        })
        .collect()
}

/// Movements without a `conciliado` flag count as reconciled.
fn is_unreconciled(movement: &JsonValue) -> bool {
    movement.get("conciliado").is_some_and(|flag| !truthy(flag))
}

fn dte_item(dte: &JsonValue) -> BacklogItem {
    BacklogItem {
        id: json_scalar(dte, "id").unwrap_or_default(),
        date: json_date(dte, "fechaEmision"),
        reference: json_scalar(dte, "folio"),
        counterparty: json_str(dte, "emisor")
            .or_else(|| json_str(dte, "rutEmisor"))
            .map(str::to_string),
        amount: Some(json_f64(dte, "montoTotal").unwrap_or(0.0)),
        note: json_str(dte, "tipoDocumento").map(str::to_string),
    }
}

fn movement_item(movement: &JsonValue, account_name: &str) -> BacklogItem {
    let charge = json_f64(movement, "montoCargo").unwrap_or(0.0);
    let credit = json_f64(movement, "montoAbono").unwrap_or(0.0);
    let note = match json_str(movement, "glosa") {
        Some(glosa) => format!("{account_name}: {glosa}"),
        None => account_name.to_string(),
    };
    BacklogItem {
        id: json_scalar(movement, "id").unwrap_or_default(),
        date: json_date(movement, "fecha"),
        reference: json_scalar(movement, "numDoc"),
        counterparty: None,
        amount: Some(credit - charge),
        note: Some(note),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 20)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn reception_age_handles_missing_and_fractional_timestamps() {
        assert_eq!(days_since_reception(None, now()), 999);
        assert_eq!(days_since_reception(Some("garbage"), now()), 999);
        assert_eq!(
            days_since_reception(Some("2025-03-15T09:30:00.123"), now()),
            5
        );
        assert_eq!(days_since_reception(Some("2025-03-01"), now()), 19);
    }

    #[test]
    fn unanswered_recent_documents_are_pending_acceptance() {
        let recent = json!({ "fechaEmision": "2025-03-14", "creadoEl": "2025-03-15T08:00:00" });
        let answered = json!({
            "fechaEmision": "2025-03-14",
            "creadoEl": "2025-03-15T08:00:00",
            "fechaRespuesta": "2025-03-16"
        });
        let stale = json!({ "fechaEmision": "2025-02-01", "creadoEl": "2025-02-02T08:00:00" });
        let no_reception = json!({ "fechaEmision": "2025-03-14" });

        assert!(is_pending_acceptance(&recent, now()));
        assert!(!is_pending_acceptance(&answered, now()));
        assert!(!is_pending_acceptance(&stale, now()));
        assert!(!is_pending_acceptance(&no_reception, now()));
    }

    #[test]
    fn bank_accounts_come_from_group_code_or_bank_name() {
        let balance = vec![
            json!({ "idCuenta": "1102001", "cuenta": "Caja chica" }),
            json!({ "idCuenta": "1105002", "cuenta": "Banco Santander Cta Cte" }),
            json!({ "idCuenta": "2101001", "cuenta": "Préstamo Banco Estado" }),
            json!({ "idCuenta": "1201001", "cuenta": "Clientes" }),
        ];
        let codes: Vec<&str> = detect_bank_accounts(&balance)
            .into_iter()
            .filter_map(|a| json_str(a, "idCuenta"))
            .collect();
        assert_eq!(codes, vec!["1102001", "1105002"]);
    }

    #[test]
    fn pages_report_items_and_continuation() {
        let (items, next) = split_page(json!({ "items": [{ "id": 1 }], "next": "page=2" }));
        assert_eq!(items.len(), 1);
        assert!(next);

        let (items, next) = split_page(json!({ "items": [], "next": null }));
        assert!(items.is_empty());
        assert!(!next);

        let (items, next) = split_page(json!([{ "id": 1 }, { "id": 2 }]));
        assert_eq!(items.len(), 2);
        assert!(!next);
    }

    #[test]
    fn reconciliation_flag_defaults_to_reconciled() {
        assert!(is_unreconciled(&json!({ "conciliado": false })));
        assert!(is_unreconciled(&json!({ "conciliado": null })));
        assert!(!is_unreconciled(&json!({ "conciliado": true })));
        assert!(!is_unreconciled(&json!({})));

        let item = movement_item(
            &json!({ "id": 7, "montoCargo": 1500.0, "montoAbono": 0, "glosa": "Pago proveedor", "numDoc": 991 }),
            "Banco Chile",
        );
        assert_eq!(item.amount, Some(-1500.0));
        assert_eq!(item.reference.as_deref(), Some("991"));
        assert_eq!(item.note.as_deref(), Some("Banco Chile: Pago proveedor"));
    }

    #[test]
    fn ledger_folios_accept_any_casing() {
        assert_eq!(ledger_folio(&json!({ "NumDoc": 1234 })), Some("1234".into()));
        assert_eq!(ledger_folio(&json!({ "numDoc": "55" })), Some("55".into()));
        assert_eq!(ledger_folio(&json!({ "folio": 9 })), Some("9".into()));
        assert_eq!(ledger_folio(&json!({ "NumDoc": 0 })), None);
    }
}
