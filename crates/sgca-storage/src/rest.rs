use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sgca_core::{
    BacklogSnapshot, BusinessDay, CheckKey, CheckPatch, Company, ExpectedItem, ExpectedItemCheck,
    Period,
};
use tracing::debug;
use uuid::Uuid;

use crate::store::{ComplianceStore, StoreError};
use crate::{decode_json, FetchError, HttpClient};

const COMPANIES: &str = "companies";
const PERIODS: &str = "periods";
const EXPECTED_ITEMS: &str = "expected_items";
const CHECKS: &str = "expected_item_checks";
const SNAPSHOTS: &str = "erp_backlog_snapshots";
const CALENDAR: &str = "business_calendar_cl";

#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    /// Project base URL, without the `/rest/v1` suffix.
    pub base_url: String,
    pub service_key: String,
}

/// Compliance store backed by a PostgREST endpoint (Supabase).
pub struct RestStore {
    http: Arc<HttpClient>,
    config: RestStoreConfig,
}

impl RestStore {
    pub fn new(http: Arc<HttpClient>, config: RestStoreConfig) -> Self {
        Self { http, config }
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            table
        )
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &'static str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let url = self.table_url(table);
        let key = &self.config.service_key;
        let response = self
            .http
            .execute(table, |client| {
                client
                    .get(&url)
                    .header("apikey", key)
                    .bearer_auth(key)
                    .query(&[("select", "*")])
                    .query(filters)
            })
            .await
            .map_err(|source| transport(table, source))?;
        decode_json(&response).map_err(|source| transport(table, source))
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &'static str,
        filters: &[(&str, String)],
    ) -> Result<Option<T>, StoreError> {
        let mut filters = filters.to_vec();
        filters.push(("limit", "1".to_string()));
        Ok(self.select(table, &filters).await?.into_iter().next())
    }

    async fn insert<B: Serialize + Sync>(
        &self,
        table: &'static str,
        row: &B,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let url = self.table_url(table);
        let key = &self.config.service_key;
        let response = self
            .http
            .execute(table, |client| {
                client
                    .post(&url)
                    .header("apikey", key)
                    .bearer_auth(key)
                    .header("Prefer", "return=representation")
                    .json(row)
            })
            .await
            .map_err(|source| transport(table, source))?;
        decode_json(&response).map_err(|source| transport(table, source))
    }
}

fn transport(table: &'static str, source: FetchError) -> StoreError {
    if source.status() == Some(StatusCode::CONFLICT.as_u16()) {
        let key = match &source {
            FetchError::HttpStatus { body, .. } => body.clone(),
            _ => String::new(),
        };
        return StoreError::Conflict { table, key };
    }
    StoreError::Transport { table, source }
}

fn first_row<T: DeserializeOwned>(
    table: &'static str,
    rows: Vec<serde_json::Value>,
) -> Result<T, StoreError> {
    let row = rows.into_iter().next().ok_or_else(|| StoreError::Response {
        table,
        message: "insert returned no representation".to_string(),
    })?;
    serde_json::from_value(row).map_err(|err| StoreError::Response {
        table,
        message: err.to_string(),
    })
}

/// PostgREST `ilike` pattern for a substring match. `*` is the wildcard and
/// commas or parentheses would be read as filter syntax, so they are dropped.
/// `None` when nothing is left to match on.
fn ilike_contains(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '*' | ',' | '(' | ')'))
        .collect();
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| format!("ilike.*{cleaned}*"))
}

#[async_trait]
impl ComplianceStore for RestStore {
    async fn company_by_id(&self, company_id: Uuid) -> Result<Option<Company>, StoreError> {
        self.select_one(COMPANIES, &[("company_id", format!("eq.{company_id}"))])
            .await
    }

    async fn company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        let Some(pattern) = ilike_contains(name) else {
            return Ok(None);
        };
        self.select_one(COMPANIES, &[("name", pattern)]).await
    }

    async fn find_period(
        &self,
        company_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Period>, StoreError> {
        self.select_one(
            PERIODS,
            &[
                ("company_id", format!("eq.{company_id}")),
                ("period_start", format!("eq.{period_start}")),
                ("period_end", format!("eq.{period_end}")),
            ],
        )
        .await
    }

    async fn insert_period(&self, period: &Period) -> Result<Period, StoreError> {
        let rows = self.insert(PERIODS, period).await?;
        first_row(PERIODS, rows)
    }

    async fn business_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BusinessDay>, StoreError> {
        self.select(
            CALENDAR,
            &[
                ("day", format!("gte.{from}")),
                ("day", format!("lte.{to}")),
                ("order", "day.asc".to_string()),
            ],
        )
        .await
    }

    async fn expected_item(&self, code: &str) -> Result<Option<ExpectedItem>, StoreError> {
        self.select_one(EXPECTED_ITEMS, &[("expected_item_code", format!("eq.{code}"))])
            .await
    }

    async fn insert_expected_item(&self, item: &ExpectedItem) -> Result<(), StoreError> {
        self.insert(EXPECTED_ITEMS, item).await.map(|_| ())
    }

    async fn find_check(&self, key: &CheckKey) -> Result<Option<ExpectedItemCheck>, StoreError> {
        self.select_one(
            CHECKS,
            &[
                ("company_id", format!("eq.{}", key.company_id)),
                ("period_id", format!("eq.{}", key.period_id)),
                ("expected_item_code", format!("eq.{}", key.expected_item_code)),
            ],
        )
        .await
    }

    async fn insert_check(
        &self,
        check: &ExpectedItemCheck,
    ) -> Result<ExpectedItemCheck, StoreError> {
        let rows = self.insert(CHECKS, check).await?;
        first_row(CHECKS, rows)
    }

    async fn update_check(&self, check_id: Uuid, patch: &CheckPatch) -> Result<(), StoreError> {
        let url = self.table_url(CHECKS);
        let key = &self.config.service_key;
        let filter = format!("eq.{check_id}");
        debug!(%check_id, "patching check");
        self.http
            .execute(CHECKS, |client| {
                client
                    .patch(&url)
                    .header("apikey", key)
                    .bearer_auth(key)
                    .query(&[("expected_item_check_id", filter.as_str())])
                    .json(patch)
            })
            .await
            .map_err(|source| transport(CHECKS, source))?;
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &BacklogSnapshot) -> Result<(), StoreError> {
        self.insert(SNAPSHOTS, snapshot).await.map(|_| ())
    }
}
