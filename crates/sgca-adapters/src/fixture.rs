use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sgca_core::{BacklogCategory, BacklogItem, BacklogReport, CompanyMapping, Source};
use tracing::debug;

use crate::{AdapterError, SourceAdapter};

/// Captured backlog for one company, stored as
/// `<fixtures_dir>/<source>/<alias>.json`.
///
/// A non-empty `error` makes the adapter fail with that message, which is how
/// outages are replayed offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureBacklog {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub queried_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub document_acceptance: FixtureCategory,
    #[serde(default)]
    pub bookkeeping: FixtureCategory,
    #[serde(default)]
    pub reconciliation: FixtureCategory,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureCategory {
    /// Defaults to the number of items.
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub items: Vec<BacklogItem>,
}

impl FixtureCategory {
    fn into_category(self) -> BacklogCategory {
        let total = self
            .total
            .or_else(|| Some(self.items.iter().filter_map(|i| i.amount).sum()));
        BacklogCategory {
            count: self.count.unwrap_or(self.items.len() as u64),
            total,
            items: self.items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    source: Source,
    root: PathBuf,
}

impl FixtureAdapter {
    pub fn new(source: Source, root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            root: root.into(),
        }
    }

    pub fn path_for(&self, alias: &str) -> PathBuf {
        self.root
            .join(self.source.as_str())
            .join(format!("{alias}.json"))
    }
}

fn fixture_error(path: &Path, message: impl Into<String>) -> AdapterError {
    AdapterError::Fixture {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch_backlog(&self, company: &CompanyMapping) -> Result<BacklogReport, AdapterError> {
        let path = self.path_for(&company.alias);
        debug!(path = %path.display(), "loading backlog fixture");
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| fixture_error(&path, err.to_string()))?;
        let fixture: FixtureBacklog =
            serde_json::from_str(&text).map_err(|err| fixture_error(&path, err.to_string()))?;

        if let Some(message) = fixture.error.filter(|m| !m.trim().is_empty()) {
            return Err(fixture_error(&path, message));
        }

        Ok(BacklogReport {
            company: fixture.company.unwrap_or_else(|| company.name.clone()),
            source: self.source,
            queried_at: fixture.queried_at.unwrap_or_else(Utc::now),
            document_acceptance: fixture.document_acceptance.into_category(),
            bookkeeping: fixture.bookkeeping.into_category(),
            reconciliation: fixture.reconciliation.into_category(),
        })
    }
}
