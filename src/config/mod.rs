#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use toml_config::FileConfig;

use crate::adapters::rdap;
use crate::core::ip;
use crate::core::{ConfigProvider, DumpSource, Registry};
use crate::utils::error::{FinderError, Result};
use crate::utils::validation::{
    validate_path, validate_positive_number, validate_range, validate_url, Validate,
};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_OUTPUT_PATH: &str = "result.csv";
pub const DEFAULT_CACHE_DIR: &str = ".cache";
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 5;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_CACHE_DAYS: i64 = 7;
pub const DEFAULT_USER_AGENT: &str = concat!("geofeed-finder/", env!("CARGO_PKG_VERSION"));

/// Fully resolved run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_path: String,
    pub test_prefix: Option<String>,
    pub registries: Vec<Registry>,
    pub arin_bulk: bool,
    pub include_zip: bool,
    pub keep_non_iso: bool,
    pub cache_dir: PathBuf,
    pub concurrent_requests: usize,
    pub timeout_seconds: u64,
    pub default_cache_days: i64,
    pub user_agent: String,
    pub dumps: BTreeMap<Registry, Vec<DumpSource>>,
    pub arin_stats_url: String,
    pub arin_rdap_url: String,
    pub monitor: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_path: DEFAULT_OUTPUT_PATH.to_string(),
            test_prefix: None,
            registries: Registry::ALL.to_vec(),
            arin_bulk: false,
            include_zip: false,
            keep_non_iso: false,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            concurrent_requests: DEFAULT_CONCURRENT_REQUESTS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            default_cache_days: DEFAULT_CACHE_DAYS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            dumps: Registry::ALL
                .into_iter()
                .map(|registry| (registry, registry.default_dumps()))
                .collect(),
            arin_stats_url: rdap::DEFAULT_STATS_URL.to_string(),
            arin_rdap_url: rdap::DEFAULT_RDAP_URL.to_string(),
            monitor: false,
        }
    }
}

impl Settings {
    /// Defaults, overridden by the file, overridden by explicit flags.
    #[cfg(feature = "cli")]
    pub fn resolve(cli: &CliConfig, file: Option<FileConfig>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(file) = file {
            settings.apply_file(file)?;
        }

        settings.output_path = cli.output_path.clone();
        settings.test_prefix = cli.test_prefix.clone();
        settings.registries = cli.include.clone();
        settings.arin_bulk = cli.arin_bulk;
        settings.include_zip = cli.include_zip;
        settings.keep_non_iso = cli.keep_non_iso;
        settings.monitor = cli.monitor;
        if let Some(timeout) = cli.download_timeout {
            settings.timeout_seconds = timeout;
        }
        if let Some(dir) = &cli.cache_dir {
            settings.cache_dir = PathBuf::from(dir);
        }
        if let Some(concurrency) = cli.concurrency {
            settings.concurrent_requests = concurrency;
        }
        if let Some(days) = cli.cache_days {
            settings.default_cache_days = days;
        }

        Ok(settings)
    }

    pub fn apply_file(&mut self, file: FileConfig) -> Result<()> {
        if let Some(dir) = file.cache.dir {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(days) = file.cache.default_cache_days {
            self.default_cache_days = days;
        }
        if let Some(concurrency) = file.fetch.concurrent_requests {
            self.concurrent_requests = concurrency;
        }
        if let Some(timeout) = file.fetch.timeout_seconds {
            self.timeout_seconds = timeout;
        }
        if let Some(user_agent) = file.fetch.user_agent {
            self.user_agent = user_agent;
        }

        for (name, section) in file.registries {
            let registry: Registry = name.parse()?;
            if !section.dumps.is_empty() {
                self.dumps.insert(registry, section.dumps);
            }
        }
        if let Some(url) = file.arin.stats_url {
            self.arin_stats_url = url;
        }
        if let Some(url) = file.arin.rdap_url {
            self.arin_rdap_url = url;
        }

        Ok(())
    }

    /// ARIN publishes no anonymous dump; without the bulk archive it is
    /// looked up live over RDAP.
    pub fn arin_live(&self) -> bool {
        !self.arin_bulk && self.registries.contains(&Registry::Arin)
    }

    /// Dump locations of the selected registries. ARIN's dumps only count in
    /// bulk mode.
    pub fn active_dumps(&self) -> BTreeMap<Registry, Vec<DumpSource>> {
        self.registries
            .iter()
            .filter(|registry| **registry != Registry::Arin || self.arin_bulk)
            .filter_map(|registry| {
                self.dumps
                    .get(registry)
                    .filter(|dumps| !dumps.is_empty())
                    .map(|dumps| (*registry, dumps.clone()))
            })
            .collect()
    }

    pub fn parsed_test_prefix(&self) -> Result<Option<IpNet>> {
        self.test_prefix
            .as_deref()
            .map(|prefix| {
                ip::parse_prefix(prefix).ok_or_else(|| FinderError::InvalidConfigValueError {
                    field: "test".to_string(),
                    value: prefix.to_string(),
                    reason: "expected an IP address or CIDR prefix".to_string(),
                })
            })
            .transpose()
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_prefix.is_some()
    }
}

impl ConfigProvider for Settings {
    fn output_path(&self) -> &str {
        &self.output_path
    }

    fn registries(&self) -> &[Registry] {
        &self.registries
    }

    fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn concurrent_requests(&self) -> usize {
        self.concurrent_requests
    }

    fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn default_cache_days(&self) -> i64 {
        self.default_cache_days
    }

    fn include_zip(&self) -> bool {
        self.include_zip
    }

    fn keep_non_iso(&self) -> bool {
        self.keep_non_iso
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        validate_path("output", &self.output_path)?;
        validate_path("cache.dir", &self.cache_dir.to_string_lossy())?;
        validate_positive_number(
            "fetch.concurrent_requests",
            self.concurrent_requests as u64,
            1,
        )?;
        validate_range("fetch.timeout_seconds", self.timeout_seconds, 1, 3600)?;
        validate_range("cache.default_cache_days", self.default_cache_days, 1, 3650)?;

        if self.is_test_mode() {
            self.parsed_test_prefix()?;
            return Ok(());
        }

        if self.registries.is_empty() {
            return Err(FinderError::ConfigValidationError {
                field: "include".to_string(),
                message: "no registry selected".to_string(),
            });
        }

        if self.arin_bulk
            && self.registries.contains(&Registry::Arin)
            && self.dumps.get(&Registry::Arin).map_or(true, Vec::is_empty)
        {
            return Err(FinderError::MissingConfigError {
                field: "registries.arin.dumps".to_string(),
            });
        }

        for (registry, dumps) in self.active_dumps() {
            for dump in dumps {
                validate_url(&format!("registries.{}.dumps", registry), &dump.url, true)?;
            }
        }

        if self.arin_live() {
            validate_url("arin.stats_url", &self.arin_stats_url, false)?;
            validate_url("arin.rdap_url", &self.arin_rdap_url, false)?;
        }

        Ok(())
    }
}
