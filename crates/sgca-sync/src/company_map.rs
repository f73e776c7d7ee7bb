use std::collections::BTreeMap;
use std::path::Path;

use sgca_core::{CompanyMapping, Source};

use crate::config::ConfigError;

/// Static alias → company mapping, loaded once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyMap {
    companies: BTreeMap<String, CompanyMapping>,
}

impl CompanyMap {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::CompanyMapRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text).map_err(|source| ConfigError::CompanyMapParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses YAML (or JSON, which YAML accepts) keyed by alias.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        let mut companies: BTreeMap<String, CompanyMapping> = serde_yaml::from_str(text)?;
        for (alias, mapping) in companies.iter_mut() {
            mapping.alias = alias.clone();
        }
        Ok(Self { companies })
    }

    pub fn from_mappings(mappings: impl IntoIterator<Item = CompanyMapping>) -> Self {
        Self {
            companies: mappings
                .into_iter()
                .map(|m| (m.alias.clone(), m))
                .collect(),
        }
    }

    pub fn get(&self, alias: &str) -> Option<&CompanyMapping> {
        self.companies.get(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompanyMapping> {
        self.companies.values()
    }

    pub fn len(&self) -> usize {
        self.companies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
    }

    /// Companies enabled for `source`, in alias order, optionally narrowed to
    /// one exact alias.
    pub fn eligible(&self, source: Source, only: Option<&str>) -> Vec<CompanyMapping> {
        self.companies
            .values()
            .filter(|m| m.enabled_for(source))
            .filter(|m| only.map_or(true, |alias| m.alias == alias))
            .cloned()
            .collect()
    }
}
