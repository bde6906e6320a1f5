use crate::core::DumpSource;
use crate::utils::error::{FinderError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern compiles"));

/// Optional settings file. Every section and key may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub fetch: FetchSection,
    /// Keyed by registry name; names are checked when settings are resolved.
    #[serde(default)]
    pub registries: BTreeMap<String, RegistrySection>,
    #[serde(default)]
    pub arin: ArinSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSection {
    pub dir: Option<String>,
    pub default_cache_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchSection {
    pub concurrent_requests: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySection {
    #[serde(default)]
    pub dumps: Vec<DumpSource>,
}

/// Endpoints of the live ARIN lookups used without `--arin-bulk`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArinSection {
    pub stats_url: Option<String>,
    pub rdap_url: Option<String>,
}

impl FileConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            FinderError::InvalidConfigValueError {
                field: "config".to_string(),
                value: path.as_ref().display().to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| FinderError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the variable's value; unset variables stay as written.
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }
}
