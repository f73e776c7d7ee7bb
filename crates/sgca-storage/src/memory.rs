use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use sgca_core::{
    BacklogSnapshot, BusinessDay, CheckKey, CheckPatch, Company, ExpectedItem, ExpectedItemCheck,
    Period,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{ComplianceStore, StoreError};

/// Everything a [`MemoryStore`] holds. `writes` counts every successful
/// mutation so callers can assert a run touched nothing.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub companies: Vec<Company>,
    pub periods: Vec<Period>,
    pub expected_items: BTreeMap<String, ExpectedItem>,
    pub checks: BTreeMap<CheckKey, ExpectedItemCheck>,
    pub snapshots: Vec<BacklogSnapshot>,
    pub calendar: BTreeMap<NaiveDate, bool>,
    pub writes: usize,
}

/// In-process compliance store used by `--store memory` runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(mut self, company: Company) -> Self {
        self.state.get_mut().companies.push(company);
        self
    }

    pub fn with_business_days(mut self, days: impl IntoIterator<Item = BusinessDay>) -> Self {
        let calendar = &mut self.state.get_mut().calendar;
        for row in days {
            calendar.insert(row.day, row.is_business_day);
        }
        self
    }

    pub async fn writes(&self) -> usize {
        self.state.lock().await.writes
    }

    pub async fn checks(&self) -> Vec<ExpectedItemCheck> {
        self.state.lock().await.checks.values().cloned().collect()
    }

    pub async fn periods(&self) -> Vec<Period> {
        self.state.lock().await.periods.clone()
    }

    pub async fn snapshots(&self) -> Vec<BacklogSnapshot> {
        self.state.lock().await.snapshots.clone()
    }

    pub async fn expected_items(&self) -> Vec<ExpectedItem> {
        self.state.lock().await.expected_items.values().cloned().collect()
    }

    pub async fn snapshot_state(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl ComplianceStore for MemoryStore {
    async fn company_by_id(&self, company_id: Uuid) -> Result<Option<Company>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .companies
            .iter()
            .find(|c| c.company_id == company_id)
            .cloned())
    }

    async fn company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        let state = self.state.lock().await;
        Ok(state
            .companies
            .iter()
            .find(|c| c.name.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn find_period(
        &self,
        company_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Period>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .periods
            .iter()
            .find(|p| {
                p.company_id == company_id
                    && p.period_start == period_start
                    && p.period_end == period_end
            })
            .cloned())
    }

    async fn insert_period(&self, period: &Period) -> Result<Period, StoreError> {
        let mut state = self.state.lock().await;
        if state.periods.iter().any(|p| p.period_id == period.period_id) {
            return Err(StoreError::Conflict {
                table: "periods",
                key: period.period_id.to_string(),
            });
        }
        state.periods.push(period.clone());
        state.writes += 1;
        Ok(period.clone())
    }

    async fn business_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BusinessDay>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .calendar
            .range(from..=to)
            .map(|(day, flag)| BusinessDay {
                day: *day,
                is_business_day: *flag,
            })
            .collect())
    }

    async fn expected_item(&self, code: &str) -> Result<Option<ExpectedItem>, StoreError> {
        Ok(self.state.lock().await.expected_items.get(code).cloned())
    }

    async fn insert_expected_item(&self, item: &ExpectedItem) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.expected_items.contains_key(&item.expected_item_code) {
            return Err(StoreError::Conflict {
                table: "expected_items",
                key: item.expected_item_code.clone(),
            });
        }
        state
            .expected_items
            .insert(item.expected_item_code.clone(), item.clone());
        state.writes += 1;
        Ok(())
    }

    async fn find_check(&self, key: &CheckKey) -> Result<Option<ExpectedItemCheck>, StoreError> {
        Ok(self.state.lock().await.checks.get(key).cloned())
    }

    async fn insert_check(
        &self,
        check: &ExpectedItemCheck,
    ) -> Result<ExpectedItemCheck, StoreError> {
        let mut state = self.state.lock().await;
        let key = check.key();
        if state.checks.contains_key(&key) {
            return Err(StoreError::Conflict {
                table: "expected_item_checks",
                key: format!(
                    "({}, {}, {})",
                    key.company_id, key.period_id, key.expected_item_code
                ),
            });
        }
        state.checks.insert(key, check.clone());
        state.writes += 1;
        Ok(check.clone())
    }

    async fn update_check(&self, check_id: Uuid, patch: &CheckPatch) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let check = state
            .checks
            .values_mut()
            .find(|c| c.expected_item_check_id == check_id)
            .ok_or(StoreError::NotFound {
                table: "expected_item_checks",
                id: check_id,
            })?;
        patch.apply_to(check);
        state.writes += 1;
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &BacklogSnapshot) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.snapshots.push(snapshot.clone());
        state.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use sgca_core::{
        ObligationCode, ReviewStatus, DEFAULT_ITEM_WEIGHT, DEFAULT_RESPONSIBLE_ROLE,
        STAGE_OPERATING,
    };

    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn check(company_id: Uuid, period_id: Uuid) -> ExpectedItemCheck {
        let due = DateTime::parse_from_rfc3339("2025-02-03T18:00:00-03:00").unwrap();
        ExpectedItemCheck {
            expected_item_check_id: Uuid::new_v4(),
            company_id,
            period_id,
            expected_item_code: ObligationCode::DigitacionFacturas.code().into(),
            stage_code: STAGE_OPERATING.into(),
            responsible_role: DEFAULT_RESPONSIBLE_ROLE.into(),
            due_at: due,
            grace_until: due,
            is_completed: false,
            review_status: ReviewStatus::Pending,
            completed_at: None,
            item_weight: DEFAULT_ITEM_WEIGHT.into(),
        }
    }

    #[tokio::test]
    async fn duplicate_check_keys_are_rejected() {
        let store = MemoryStore::new();
        let company = Uuid::new_v4();
        let period = Uuid::new_v4();

        store.insert_check(&check(company, period)).await.unwrap();
        let err = store.insert_check(&check(company, period)).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict { table: "expected_item_checks", .. }));
        assert_eq!(store.checks().await.len(), 1);
        assert_eq!(store.writes().await, 1);
    }

    #[tokio::test]
    async fn updates_apply_patch_and_count_as_writes() {
        let store = MemoryStore::new();
        let row = check(Uuid::new_v4(), Uuid::new_v4());
        store.insert_check(&row).await.unwrap();

        let patch = CheckPatch {
            is_completed: true,
            review_status: ReviewStatus::Approved,
            completed_at: Some(Some(row.due_at)),
        };
        store
            .update_check(row.expected_item_check_id, &patch)
            .await
            .unwrap();

        let stored = store.find_check(&row.key()).await.unwrap().unwrap();
        assert!(stored.is_completed);
        assert_eq!(stored.completed_at, Some(row.due_at));
        assert_eq!(store.writes().await, 2);

        let missing = store.update_check(Uuid::new_v4(), &patch).await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn company_lookup_by_name_is_case_insensitive_substring() {
        let store = MemoryStore::new().with_company(Company {
            company_id: Uuid::new_v4(),
            name: "Comercial Los Andes SpA".into(),
        });
        let found = store.company_by_name("los andes").await.unwrap();
        assert_eq!(found.unwrap().name, "Comercial Los Andes SpA");
        assert!(store.company_by_name("pacifico").await.unwrap().is_none());
        assert!(store.company_by_name("  ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn business_days_are_filtered_to_the_window() {
        let store = MemoryStore::new().with_business_days([
            BusinessDay {
                day: d(2025, 1, 1),
                is_business_day: false,
            },
            BusinessDay {
                day: d(2025, 2, 20),
                is_business_day: false,
            },
        ]);
        let rows = store.business_days(d(2025, 1, 1), d(2025, 2, 10)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].day, d(2025, 1, 1));
        assert_eq!(store.writes().await, 0);
    }
}
