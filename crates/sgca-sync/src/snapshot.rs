use std::sync::Arc;

use chrono_tz::Tz;
use sgca_core::{BacklogCounts, BacklogSnapshot, Clock, Source, YearMonth};
use sgca_storage::SharedStore;
use uuid::Uuid;

use crate::result::SyncError;

/// Appends one backlog time-series row per company sync. Rows are never
/// updated.
#[derive(Clone)]
pub struct SnapshotRecorder {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl SnapshotRecorder {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, tz: Tz) -> Self {
        Self { store, clock, tz }
    }

    pub fn build(
        &self,
        company_id: Uuid,
        alias: &str,
        source: Source,
        month: YearMonth,
        counts: BacklogCounts,
    ) -> BacklogSnapshot {
        BacklogSnapshot {
            company_id,
            period: month.code(),
            captured_at: self.clock.now().with_timezone(&self.tz).fixed_offset(),
            sii_count: counts.document_acceptance,
            contabilizar_count: counts.bookkeeping,
            conciliar_count: counts.reconciliation,
            source,
            db_alias: alias.to_string(),
        }
    }

    pub async fn record(&self, snapshot: &BacklogSnapshot) -> Result<(), SyncError> {
        self.store
            .insert_snapshot(snapshot)
            .await
            .map_err(SyncError::Snapshot)
    }
}
