use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sgca_core::{
    BacklogSnapshot, BusinessDay, CheckKey, CheckPatch, Company, ExpectedItem, ExpectedItemCheck,
    Period,
};
use thiserror::Error;
use uuid::Uuid;

use crate::FetchError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table}: {source}")]
    Transport {
        table: &'static str,
        #[source]
        source: FetchError,
    },
    #[error("{table}: unexpected response: {message}")]
    Response { table: &'static str, message: String },
    #[error("{table}: duplicate key {key}")]
    Conflict { table: &'static str, key: String },
    #[error("{table}: no row with id {id}")]
    NotFound { table: &'static str, id: Uuid },
}

/// Table store holding the compliance ledger.
///
/// All mutations are single-row inserts or updates by id; the only
/// uniqueness the store must enforce is the check key.
#[async_trait]
pub trait ComplianceStore: Send + Sync {
    async fn company_by_id(&self, company_id: Uuid) -> Result<Option<Company>, StoreError>;

    /// Case-insensitive substring match on the company name; first hit wins.
    async fn company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError>;

    async fn find_period(
        &self,
        company_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Period>, StoreError>;

    async fn insert_period(&self, period: &Period) -> Result<Period, StoreError>;

    /// Calendar rows with `from <= day <= to`.
    async fn business_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BusinessDay>, StoreError>;

    async fn expected_item(&self, code: &str) -> Result<Option<ExpectedItem>, StoreError>;

    async fn insert_expected_item(&self, item: &ExpectedItem) -> Result<(), StoreError>;

    async fn find_check(&self, key: &CheckKey) -> Result<Option<ExpectedItemCheck>, StoreError>;

    async fn insert_check(&self, check: &ExpectedItemCheck)
        -> Result<ExpectedItemCheck, StoreError>;

    async fn update_check(&self, check_id: Uuid, patch: &CheckPatch) -> Result<(), StoreError>;

    async fn insert_snapshot(&self, snapshot: &BacklogSnapshot) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn ComplianceStore>;
