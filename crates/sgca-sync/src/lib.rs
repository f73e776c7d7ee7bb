//! Compliance check synchronization: turns ERP backlog counts into
//! idempotent check state in the compliance store.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sgca_adapters::AdapterRegistry;
use sgca_core::{Company, SystemClock};
use sgca_storage::{HttpClient, MemoryStore, RestStore, SharedStore};
use tracing::info;

mod company_map;
mod config;
mod orchestrator;
mod result;
mod scheduler;
mod snapshot;
mod synchronizer;
mod upsert;

pub use company_map::CompanyMap;
pub use config::{kill_switch, ConfigError, SyncConfig, DEFAULT_COMPANY_MAP};
pub use orchestrator::{SyncOrchestrator, SyncRequest};
pub use result::{
    CheckAction, CheckTally, CheckUpsertResult, CompanySyncError, CompanySyncSummary,
    GlobalSyncResult, SkipReason, SlaType, SourceSelection, SourceStatus, SourceSyncResult,
    SyncError, SyncErrorKind, SyncTotals,
};
pub use scheduler::{build_scheduler, run_scheduler};
pub use snapshot::SnapshotRecorder;
pub use synchronizer::{codes_for, CompanySynchronizer};
pub use upsert::{plan_transition, CheckTarget, CheckUpserter, Transition};

pub const CRATE_NAME: &str = "sgca-sync";

/// Where checks are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// PostgREST table store; needs `SUPABASE_URL` and the service key.
    #[default]
    Rest,
    /// Process-local store seeded from the company map. Nothing persists.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(StoreBackend::Rest),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store `{other}` (expected rest or memory)")),
        }
    }
}

/// Memory store holding every mapped company that carries an id.
pub fn memory_store_for(companies: &CompanyMap) -> MemoryStore {
    companies
        .iter()
        .filter_map(|mapping| {
            mapping.company_id.map(|company_id| Company {
                company_id,
                name: mapping.name.clone(),
            })
        })
        .fold(MemoryStore::new(), MemoryStore::with_company)
}

/// Resolves the store, adapters and company map for one process.
pub async fn build_orchestrator(config: SyncConfig, backend: StoreBackend) -> Result<SyncOrchestrator> {
    let companies = CompanyMap::load(&config.company_map_path)
        .await
        .context("loading company map")?;
    let http = Arc::new(HttpClient::new(config.http_client_config())?);

    let store: SharedStore = match backend {
        StoreBackend::Rest => {
            let rest = config.rest_store().context("configuring table store")?;
            Arc::new(RestStore::new(Arc::clone(&http), rest))
        }
        StoreBackend::Memory => Arc::new(memory_store_for(&companies)),
    };

    let registry = AdapterRegistry::from_settings(&config.adapters, &http);
    info!(
        companies = companies.len(),
        adapters = ?registry.sources(),
        store = ?backend,
        timezone = %config.timezone,
        "sync runtime ready"
    );

    Ok(SyncOrchestrator::new(
        config,
        store,
        registry,
        companies,
        Arc::new(SystemClock),
    ))
}

pub async fn run_sync_from_env(request: &SyncRequest) -> Result<GlobalSyncResult> {
    let config = SyncConfig::from_env()?;
    let orchestrator = build_orchestrator(config, StoreBackend::Rest).await?;
    Ok(orchestrator.sync_all(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgca_core::CompanyMapping;
    use uuid::Uuid;

    #[tokio::test]
    async fn memory_store_only_seeds_companies_with_ids() {
        let id = Uuid::new_v4();
        let map = CompanyMap::from_mappings([
            CompanyMapping {
                alias: "FactorIT".into(),
                name: "FactorIT SpA".into(),
                company_id: Some(id),
                odoo: None,
                skualo: None,
            },
            CompanyMapping {
                alias: "CISI".into(),
                name: "CISI Ltda".into(),
                company_id: None,
                odoo: None,
                skualo: None,
            },
        ]);
        let store = memory_store_for(&map);
        let state = store.snapshot_state().await;
        assert_eq!(state.companies.len(), 1);
        assert_eq!(state.companies[0].company_id, id);
    }

    #[test]
    fn store_backend_parses() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(" REST ".parse::<StoreBackend>().unwrap(), StoreBackend::Rest);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}
