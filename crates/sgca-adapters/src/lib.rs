//! Backlog source adapters: live Odoo (Postgres) and Skualo (REST) readers
//! plus a fixture-backed adapter for offline runs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sgca_core::{BacklogReport, CompanyMapping, Source};
use sgca_storage::{FetchError, HttpClient};
use thiserror::Error;

mod fixture;
mod odoo;
mod skualo;

pub use fixture::{FixtureAdapter, FixtureBacklog, FixtureCategory};
pub use odoo::{OdooAdapter, OdooSettings};
pub use skualo::{
    days_since_reception, detect_bank_accounts, is_pending_acceptance, SkualoAdapter,
    SkualoSettings, DEFAULT_SKUALO_BASE_URL, TACIT_ACCEPTANCE_DAYS,
};

pub const CRATE_NAME: &str = "sgca-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The company map lacks what this source needs to reach the company.
    #[error("{backend} is not configured for {alias}: {detail}")]
    NotConfigured {
        backend: Source,
        alias: String,
        detail: String,
    },
    #[error("database {database}: {source}")]
    Database {
        database: String,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("fixture {path}: {message}")]
    Fixture { path: PathBuf, message: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn is_not_configured(&self) -> bool {
        matches!(self, AdapterError::NotConfigured { .. })
    }
}

/// Reads the current backlog of one company from one accounting system.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn fetch_backlog(&self, company: &CompanyMapping) -> Result<BacklogReport, AdapterError>;
}

pub type SharedAdapter = Arc<dyn SourceAdapter>;

/// Everything needed to build adapters. A live source is available when its
/// settings are present; a fixtures directory replaces both live sources.
#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    pub odoo: Option<OdooSettings>,
    pub skualo: Option<SkualoSettings>,
    pub fixtures_dir: Option<PathBuf>,
}

pub fn adapter_for_source(
    source: Source,
    settings: &AdapterSettings,
    http: &Arc<HttpClient>,
) -> Option<SharedAdapter> {
    if let Some(dir) = &settings.fixtures_dir {
        return Some(Arc::new(FixtureAdapter::new(source, dir.clone())));
    }
    match source {
        Source::Odoo => settings
            .odoo
            .clone()
            .map(|odoo| Arc::new(OdooAdapter::new(odoo)) as SharedAdapter),
        Source::Skualo => settings.skualo.clone().map(|skualo| {
            Arc::new(SkualoAdapter::new(Arc::clone(http), skualo)) as SharedAdapter
        }),
    }
}

/// Source → adapter map built once at start-up.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<Source, SharedAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &AdapterSettings, http: &Arc<HttpClient>) -> Self {
        let mut registry = Self::new();
        for source in Source::ALL {
            if let Some(adapter) = adapter_for_source(source, settings, http) {
                registry.register(adapter);
            }
        }
        registry
    }

    pub fn register(&mut self, adapter: SharedAdapter) {
        self.adapters.insert(adapter.source(), adapter);
    }

    pub fn with(mut self, adapter: SharedAdapter) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, source: Source) -> Option<SharedAdapter> {
        self.adapters.get(&source).cloned()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.adapters.keys().copied().collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgca_storage::HttpClientConfig;

    fn http() -> Arc<HttpClient> {
        Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap())
    }

    #[test]
    fn registry_only_holds_configured_sources() {
        let settings = AdapterSettings {
            skualo: Some(SkualoSettings::new("token")),
            ..Default::default()
        };
        let registry = AdapterRegistry::from_settings(&settings, &http());
        assert_eq!(registry.sources(), vec![Source::Skualo]);
        assert!(registry.get(Source::Odoo).is_none());
    }

    #[test]
    fn fixtures_dir_serves_every_source() {
        let settings = AdapterSettings {
            fixtures_dir: Some(PathBuf::from("fixtures")),
            ..Default::default()
        };
        let registry = AdapterRegistry::from_settings(&settings, &http());
        assert_eq!(registry.sources(), vec![Source::Odoo, Source::Skualo]);
        assert_eq!(registry.get(Source::Odoo).unwrap().source(), Source::Odoo);
    }
}
