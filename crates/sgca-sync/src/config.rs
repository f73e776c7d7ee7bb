use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use sgca_adapters::{AdapterSettings, OdooSettings, SkualoSettings, DEFAULT_SKUALO_BASE_URL};
use sgca_core::sla::DEFAULT_TIMEZONE;
use sgca_core::Source;
use sgca_storage::{HttpClientConfig, RestStoreConfig};
use thiserror::Error;

pub const DEFAULT_COMPANY_MAP: &str = "./company_map.yaml";
pub const DEFAULT_SYNC_CRON_1: &str = "0 30 7 * * *";
pub const DEFAULT_SYNC_CRON_2: &str = "0 30 19 * * *";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("reading company map {path}: {source}")]
    CompanyMapRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing company map {path}: {source}")]
    CompanyMapParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Run configuration, resolved once from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub company_map_path: PathBuf,
    pub timezone: Tz,
    pub enable_odoo: bool,
    pub enable_skualo: bool,
    pub adapters: AdapterSettings,
    pub http_timeout: Duration,
    pub company_timeout: Duration,
    pub max_concurrency: usize,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            store_key: None,
            company_map_path: PathBuf::from(DEFAULT_COMPANY_MAP),
            timezone: DEFAULT_TIMEZONE,
            enable_odoo: true,
            enable_skualo: true,
            adapters: AdapterSettings::default(),
            http_timeout: Duration::from_secs(30),
            company_timeout: Duration::from_secs(120),
            max_concurrency: 1,
            scheduler_enabled: false,
            sync_cron_1: DEFAULT_SYNC_CRON_1.to_string(),
            sync_cron_2: DEFAULT_SYNC_CRON_2.to_string(),
            user_agent: format!("sgca-bridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SyncConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let timezone = match var("SGCA_TIMEZONE") {
            Some(raw) => raw.trim().parse::<Tz>().map_err(|err| ConfigError::Invalid {
                name: "SGCA_TIMEZONE",
                value: raw.clone(),
                reason: err.to_string(),
            })?,
            None => defaults.timezone,
        };

        let odoo = match var("ODOO_HOST") {
            Some(host) => Some(OdooSettings {
                host,
                port: parse_or("ODOO_PORT", var("ODOO_PORT"), 5432u16)?,
                user: var("ODOO_USER").unwrap_or_else(|| "odoo".to_string()),
                password: lookup("ODOO_PASSWORD").unwrap_or_default(),
                connect_timeout: Duration::from_secs(10),
            }),
            None => None,
        };

        let skualo = var("SKUALO_API_TOKEN").map(|token| {
            let mut settings = SkualoSettings::new(token);
            settings.base_url =
                var("SKUALO_BASE_URL").unwrap_or_else(|| DEFAULT_SKUALO_BASE_URL.to_string());
            settings.timezone = timezone;
            settings
        });

        let max_concurrency: usize =
            parse_or("SGCA_MAX_CONCURRENCY", var("SGCA_MAX_CONCURRENCY"), 1)?;

        Ok(Self {
            store_url: var("SUPABASE_URL"),
            store_key: var("SUPABASE_SERVICE_ROLE_KEY"),
            company_map_path: var("SGCA_COMPANY_MAP")
                .map(PathBuf::from)
                .unwrap_or(defaults.company_map_path),
            timezone,
            enable_odoo: kill_switch(lookup("BRIDGE_ENABLE_ODOO")),
            enable_skualo: kill_switch(lookup("BRIDGE_ENABLE_SKUALO")),
            adapters: AdapterSettings {
                odoo,
                skualo,
                fixtures_dir: var("SGCA_FIXTURES_DIR").map(PathBuf::from),
            },
            http_timeout: Duration::from_secs(parse_or(
                "SGCA_HTTP_TIMEOUT_SECS",
                var("SGCA_HTTP_TIMEOUT_SECS"),
                30u64,
            )?),
            company_timeout: Duration::from_secs(parse_or(
                "SGCA_COMPANY_TIMEOUT_SECS",
                var("SGCA_COMPANY_TIMEOUT_SECS"),
                120u64,
            )?),
            max_concurrency: max_concurrency.max(1),
            scheduler_enabled: var("SGCA_SCHEDULER_ENABLED")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true"))
                .unwrap_or(false),
            sync_cron_1: var("SYNC_CRON_1").unwrap_or(defaults.sync_cron_1),
            sync_cron_2: var("SYNC_CRON_2").unwrap_or(defaults.sync_cron_2),
            user_agent: var("SGCA_USER_AGENT").unwrap_or(defaults.user_agent),
        })
    }

    pub fn source_enabled(&self, source: Source) -> bool {
        match source {
            Source::Odoo => self.enable_odoo,
            Source::Skualo => self.enable_skualo,
        }
    }

    /// Table store credentials; both variables are required for live runs.
    pub fn rest_store(&self) -> Result<RestStoreConfig, ConfigError> {
        let base_url = self
            .store_url
            .clone()
            .ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let service_key = self
            .store_key
            .clone()
            .ok_or(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?;
        Ok(RestStoreConfig {
            base_url,
            service_key,
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout,
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

/// Unset means enabled; otherwise only `true`, `1` or `yes` enable.
pub fn kill_switch(value: Option<String>) -> bool {
    match value {
        None => true,
        Some(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.timezone, chrono_tz::America::Santiago);
        assert!(config.enable_odoo && config.enable_skualo);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.company_timeout, Duration::from_secs(120));
        assert_eq!(config.sync_cron_1, DEFAULT_SYNC_CRON_1);
        assert!(config.adapters.odoo.is_none());
        assert!(config.adapters.skualo.is_none());
        assert!(matches!(
            config.rest_store(),
            Err(ConfigError::Missing("SUPABASE_URL"))
        ));
    }

    #[test]
    fn kill_switches_accept_only_affirmative_values() {
        assert!(kill_switch(None));
        assert!(kill_switch(Some("YES".into())));
        assert!(kill_switch(Some(" 1 ".into())));
        assert!(!kill_switch(Some("false".into())));
        assert!(!kill_switch(Some("0".into())));
        assert!(!kill_switch(Some(String::new())));
        assert!(!kill_switch(Some("enabled".into())));
    }

    #[test]
    fn live_sources_follow_their_credentials() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("ODOO_HOST", "odoo.internal"),
            ("ODOO_PORT", "5433"),
            ("ODOO_PASSWORD", "secret"),
            ("SKUALO_API_TOKEN", "tok"),
            ("SGCA_TIMEZONE", "UTC"),
            ("BRIDGE_ENABLE_SKUALO", "no"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "key"),
        ]))
        .unwrap();

        let odoo = config.adapters.odoo.as_ref().unwrap();
        assert_eq!(odoo.port, 5433);
        assert_eq!(odoo.user, "odoo");
        let skualo = config.adapters.skualo.as_ref().unwrap();
        assert_eq!(skualo.timezone, chrono_tz::Tz::UTC);
        assert_eq!(skualo.base_url, DEFAULT_SKUALO_BASE_URL);
        assert!(config.source_enabled(Source::Odoo));
        assert!(!config.source_enabled(Source::Skualo));
        assert_eq!(config.rest_store().unwrap().service_key, "key");
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("SGCA_TIMEZONE", "Mars/Olympus")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SGCA_TIMEZONE", .. }));

        let err =
            SyncConfig::from_lookup(lookup(&[("SGCA_MAX_CONCURRENCY", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SGCA_MAX_CONCURRENCY", .. }));
    }
}
