//! Check upsert engine.
//!
//! A check moves between four states: absent, open-pending, open-approved
//! and closed. Completion follows the latest backlog count with no
//! hysteresis, so a closed check reopens as soon as work reappears.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use sgca_core::{
    CheckKey, CheckPatch, Clock, ExpectedItemCheck, ObligationCode, ReviewStatus,
    DEFAULT_ITEM_WEIGHT, STAGE_OPERATING,
};
use sgca_storage::{SharedStore, StoreError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::result::{CheckAction, CheckUpsertResult};

/// Desired state of one check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckTarget {
    pub company_id: Uuid,
    pub period_id: Uuid,
    pub code: ObligationCode,
    pub due_at: DateTime<FixedOffset>,
    pub completed: bool,
    pub review_status: ReviewStatus,
    pub responsible_role: String,
}

impl CheckTarget {
    pub fn key(&self) -> CheckKey {
        CheckKey::new(self.company_id, self.period_id, self.code)
    }
}

/// Write needed to bring a stored check in line with its target.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Create,
    Patch(CheckAction, CheckPatch),
    Keep,
}

impl Transition {
    pub fn action(&self) -> CheckAction {
        match self {
            Transition::Create => CheckAction::Created,
            Transition::Patch(action, _) => *action,
            Transition::Keep => CheckAction::Unchanged,
        }
    }
}

/// Decides the transition from `existing` to the desired completion and
/// review status. `now` stamps `completed_at` when a check closes.
pub fn plan_transition(
    existing: Option<&ExpectedItemCheck>,
    completed: bool,
    review_status: ReviewStatus,
    now: DateTime<FixedOffset>,
) -> Transition {
    let Some(existing) = existing else {
        return Transition::Create;
    };

    match (existing.is_completed, completed) {
        (true, false) => Transition::Patch(
            CheckAction::Reopened,
            CheckPatch {
                is_completed: false,
                review_status: ReviewStatus::Pending,
                completed_at: Some(None),
            },
        ),
        (false, true) => Transition::Patch(
            CheckAction::Closed,
            CheckPatch {
                is_completed: true,
                review_status: ReviewStatus::Approved,
                completed_at: Some(Some(now)),
            },
        ),
        _ if existing.review_status != review_status => {
            let completed_at = (completed && existing.completed_at.is_none()).then_some(Some(now));
            Transition::Patch(
                CheckAction::Updated,
                CheckPatch {
                    is_completed: completed,
                    review_status,
                    completed_at,
                },
            )
        }
        _ => Transition::Keep,
    }
}

/// Applies check transitions against the store. Store failures never
/// propagate: they come back as an `error` result.
#[derive(Clone)]
pub struct CheckUpserter {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl CheckUpserter {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, tz: Tz) -> Self {
        Self { store, clock, tz }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.tz).fixed_offset()
    }

    pub async fn upsert(&self, target: &CheckTarget, dry_run: bool) -> CheckUpsertResult {
        match self.try_upsert(target, dry_run).await {
            Ok(result) => result,
            Err((check_id, err)) => {
                warn!(
                    code = target.code.code(),
                    period_id = %target.period_id,
                    error = %err,
                    "check upsert failed"
                );
                self.result(target, CheckAction::Error, dry_run, check_id, Some(err.to_string()))
            }
        }
    }

    async fn try_upsert(
        &self,
        target: &CheckTarget,
        dry_run: bool,
    ) -> Result<CheckUpsertResult, (Option<Uuid>, StoreError)> {
        let existing = self
            .store
            .find_check(&target.key())
            .await
            .map_err(|err| (None, err))?;
        let now = self.now();
        let transition =
            plan_transition(existing.as_ref(), target.completed, target.review_status, now);
        let action = transition.action();
        let existing_id = existing.as_ref().map(|c| c.expected_item_check_id);

        if dry_run {
            return Ok(self.result(target, action, true, existing_id, None));
        }

        let check_id = match transition {
            Transition::Create => {
                let check = ExpectedItemCheck {
                    expected_item_check_id: Uuid::new_v4(),
                    company_id: target.company_id,
                    period_id: target.period_id,
                    expected_item_code: target.code.code().to_string(),
                    stage_code: STAGE_OPERATING.to_string(),
                    responsible_role: target.responsible_role.clone(),
                    due_at: target.due_at,
                    grace_until: target.due_at,
                    is_completed: target.completed,
                    review_status: target.review_status,
                    completed_at: target.completed.then_some(now),
                    item_weight: DEFAULT_ITEM_WEIGHT.to_string(),
                };
                let stored = self
                    .store
                    .insert_check(&check)
                    .await
                    .map_err(|err| (None, err))?;
                Some(stored.expected_item_check_id)
            }
            Transition::Patch(_, patch) => {
                let id = existing_id.unwrap_or_default();
                self.store
                    .update_check(id, &patch)
                    .await
                    .map_err(|err| (Some(id), err))?;
                Some(id)
            }
            Transition::Keep => existing_id,
        };

        debug!(code = target.code.code(), action = %action, "check upserted");
        Ok(self.result(target, action, false, check_id, None))
    }

    fn result(
        &self,
        target: &CheckTarget,
        action: CheckAction,
        dry_run: bool,
        check_id: Option<Uuid>,
        error: Option<String>,
    ) -> CheckUpsertResult {
        CheckUpsertResult {
            expected_item_code: target.code,
            period_id: target.period_id,
            action,
            label: action.label(dry_run),
            dry_run,
            check_id,
            is_completed: target.completed,
            due_at: target.due_at,
            error,
        }
    }

    /// Inserts the catalog entry for `code` when missing. Skipped in dry runs.
    pub async fn ensure_expected_item(
        &self,
        code: ObligationCode,
        dry_run: bool,
    ) -> Result<(), StoreError> {
        if dry_run {
            return Ok(());
        }
        if self.store.expected_item(code.code()).await?.is_none() {
            self.store.insert_expected_item(&code.catalog_entry()).await?;
            debug!(code = code.code(), "expected item registered");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sgca_core::{FixedClock, DEFAULT_RESPONSIBLE_ROLE};
    use sgca_storage::MemoryStore;

    fn stamp() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2025-02-03T18:00:00-03:00").unwrap()
    }

    fn check(completed: bool, review: ReviewStatus) -> ExpectedItemCheck {
        ExpectedItemCheck {
            expected_item_check_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            period_id: Uuid::new_v4(),
            expected_item_code: "DIGITACION_FACTURAS".into(),
            stage_code: STAGE_OPERATING.into(),
            responsible_role: DEFAULT_RESPONSIBLE_ROLE.into(),
            due_at: stamp(),
            grace_until: stamp(),
            is_completed: completed,
            review_status: review,
            completed_at: completed.then_some(stamp()),
            item_weight: DEFAULT_ITEM_WEIGHT.into(),
        }
    }

    #[test]
    fn transitions_cover_every_state_pair() {
        let now = stamp();
        assert_eq!(
            plan_transition(None, false, ReviewStatus::Pending, now),
            Transition::Create
        );

        let closed = check(true, ReviewStatus::Approved);
        match plan_transition(Some(&closed), false, ReviewStatus::Pending, now) {
            Transition::Patch(CheckAction::Reopened, patch) => {
                assert_eq!(patch.completed_at, Some(None));
                assert_eq!(patch.review_status, ReviewStatus::Pending);
            }
            other => panic!("unexpected {other:?}"),
        }

        let open = check(false, ReviewStatus::Pending);
        match plan_transition(Some(&open), true, ReviewStatus::Approved, now) {
            Transition::Patch(CheckAction::Closed, patch) => {
                assert_eq!(patch.completed_at, Some(Some(now)));
                assert!(patch.is_completed);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            plan_transition(Some(&open), false, ReviewStatus::Pending, now),
            Transition::Keep
        );
        assert_eq!(
            plan_transition(Some(&closed), true, ReviewStatus::Approved, now),
            Transition::Keep
        );
    }

    #[test]
    fn review_drift_updates_without_touching_completion() {
        let drifted = check(true, ReviewStatus::Pending);
        match plan_transition(Some(&drifted), true, ReviewStatus::Approved, stamp()) {
            Transition::Patch(CheckAction::Updated, patch) => {
                assert!(patch.is_completed);
                // completed_at already set, left alone.
                assert_eq!(patch.completed_at, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut unstamped = check(true, ReviewStatus::Pending);
        unstamped.completed_at = None;
        match plan_transition(Some(&unstamped), true, ReviewStatus::Approved, stamp()) {
            Transition::Patch(CheckAction::Updated, patch) => {
                assert_eq!(patch.completed_at, Some(Some(stamp())));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_at_uses_the_configured_zone() {
        let store = Arc::new(MemoryStore::new());
        let clock = FixedClock(Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap());
        let upserter = CheckUpserter::new(store.clone(), Arc::new(clock), chrono_tz::America::Santiago);
        let target = CheckTarget {
            company_id: Uuid::new_v4(),
            period_id: Uuid::new_v4(),
            code: ObligationCode::DigitacionFacturas,
            due_at: stamp(),
            completed: true,
            review_status: ReviewStatus::Approved,
            responsible_role: DEFAULT_RESPONSIBLE_ROLE.into(),
        };

        let result = upserter.upsert(&target, false).await;
        assert_eq!(result.action, CheckAction::Created);
        let stored = store.checks().await;
        let completed_at = stored[0].completed_at.unwrap();
        assert_eq!(completed_at.offset().local_minus_utc(), -3 * 3600);
        assert_eq!(completed_at.with_timezone(&Utc), clock.0);
        assert_eq!(stored[0].grace_until, stored[0].due_at);
    }

    #[tokio::test]
    async fn catalog_entries_are_inserted_once() {
        let store = Arc::new(MemoryStore::new());
        let upserter = CheckUpserter::new(
            store.clone(),
            Arc::new(FixedClock(Utc::now())),
            chrono_tz::America::Santiago,
        );
        upserter
            .ensure_expected_item(ObligationCode::ConciliacionBancaria, true)
            .await
            .unwrap();
        assert!(store.expected_items().await.is_empty());

        for _ in 0..2 {
            upserter
                .ensure_expected_item(ObligationCode::ConciliacionBancaria, false)
                .await
                .unwrap();
        }
        let items = store.expected_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].expected_item_code, "CONCILIACION_BANCARIA");
    }
}
