//! Runtime configuration, read once from the environment at startup.
use std::time::Duration;

use anyhow::Result;

use crate::model::Pharmacy;
use crate::util::env::{env_flag, env_opt, env_parse, env_req};

pub const TEST_PROFILE: &str = "test";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub use_prepared: bool,
    pub auto_migrate: bool,
    pub migrations_dir: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env_req("DATABASE_URL")?,
            max_connections: env_parse("DB_MAX_CONNECTIONS", 5u32).max(1),
            use_prepared: env_flag("USE_PREPARED", false),
            auto_migrate: env_flag("AUTO_MIGRATE", false),
            migrations_dir: env_opt("MIGRATIONS_DIR").unwrap_or_else(|| "./migrations".into()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Delay between the end of one cycle and the start of the next.
    pub interval: Duration,
}

impl SchedulerConfig {
    /// The scheduler is off under the test profile regardless of `SCHEDULER_ENABLED`.
    pub fn resolve(profile: &str, enabled_flag: bool, interval: Duration) -> Self {
        Self {
            enabled: enabled_flag && !profile.eq_ignore_ascii_case(TEST_PROFILE),
            interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Upper bound on a single provider's whole fetch.
    pub provider_timeout: Duration,
    pub page_concurrency: usize,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Liki24Config {
    pub base_url: String,
    pub pharmacy: Pharmacy,
}

#[derive(Debug, Clone)]
pub struct DsConfig {
    pub base_url: String,
    pub page_size: u32,
    pub pharmacy: Pharmacy,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: String,
    pub scheduler: SchedulerConfig,
    pub ingest: IngestConfig,
    pub liki24: Option<Liki24Config>,
    pub ds: Option<DsConfig>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let profile = env_opt("APP_PROFILE").unwrap_or_else(|| "prod".into());
        let scheduler = SchedulerConfig::resolve(
            &profile,
            env_flag("SCHEDULER_ENABLED", true),
            Duration::from_secs(env_parse("INGEST_INTERVAL_SECS", 60u64).max(1)),
        );
        let ingest = IngestConfig {
            provider_timeout: Duration::from_secs(env_parse("PROVIDER_FETCH_TIMEOUT_SECS", 300u64)),
            page_concurrency: env_parse("PAGE_FETCH_CONCURRENCY", 8usize).max(1),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 15u64)),
        };

        let liki24 = env_flag("LIKI24_ENABLED", true).then(|| Liki24Config {
            base_url: env_opt("LIKI24_BASE_URL")
                .unwrap_or_else(|| "https://liki24.com/uk/api/products/".into()),
            pharmacy: Pharmacy {
                id: env_parse("LIKI24_PHARMACY_ID", 2i64),
                name: "Liki24".into(),
                medicine_link_template: Some("https://liki24.com/uk/p/{id}/".into()),
            },
        });
        let ds = env_flag("DS_ENABLED", true).then(|| DsConfig {
            base_url: env_opt("DS_BASE_URL")
                .unwrap_or_else(|| "https://api.apteka-ds.com.ua/api/v1".into()),
            page_size: env_parse("DS_PAGE_SIZE", 100u32).max(1),
            pharmacy: Pharmacy {
                id: env_parse("DS_PHARMACY_ID", 1i64),
                name: "Apteka DS".into(),
                medicine_link_template: Some("https://apteka-ds.com.ua/{id}".into()),
            },
        });

        Self {
            profile,
            scheduler,
            ingest,
            liki24,
            ds,
        }
    }

    pub fn pharmacies(&self) -> Vec<Pharmacy> {
        let mut out = Vec::new();
        if let Some(c) = &self.liki24 {
            out.push(c.pharmacy.clone());
        }
        if let Some(c) = &self.ds {
            out.push(c.pharmacy.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_disables_scheduler() {
        let cfg = SchedulerConfig::resolve("test", true, Duration::from_secs(60));
        assert!(!cfg.enabled);
        let cfg = SchedulerConfig::resolve("TEST", true, Duration::from_secs(60));
        assert!(!cfg.enabled);
    }

    #[test]
    fn prod_profile_honours_flag() {
        assert!(SchedulerConfig::resolve("prod", true, Duration::from_secs(1)).enabled);
        assert!(!SchedulerConfig::resolve("prod", false, Duration::from_secs(1)).enabled);
    }
}
