//! Disk cache for downloaded files.
//!
//! Payloads live at `<dir>/<key>`; expiry times live in `<dir>/cache-index.json`,
//! which is read once at startup and written once at the end of the run.

use crate::utils::error::Result;
use crate::utils::logger::ERRORS_TARGET;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const INDEX_FILE_NAME: &str = "cache-index.json";

/// Lower bound applied to any `max-age` a server announces.
pub const MIN_TTL_SECONDS: i64 = 3600;

/// Content address of a URL; used as index key and payload file name.
pub fn cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// TTL from a `Cache-Control` value: the last `max-age` directive, floored at
/// one hour, or `default_cache_days` when no usable directive is present. An age
/// too large to represent is clamped to the longest duration.
pub fn ttl_from_cache_control(cache_control: Option<&str>, default_cache_days: i64) -> Duration {
    let max_age = cache_control.and_then(|header| {
        header
            .split(',')
            .map(str::trim)
            .filter(|directive| directive.contains("max-age"))
            .last()
            .and_then(|directive| directive.rsplit('=').next())
            .and_then(|age| age.trim().trim_matches('"').parse::<i64>().ok())
    });

    match max_age {
        Some(age) => Duration::try_seconds(age.max(MIN_TTL_SECONDS)).unwrap_or(Duration::MAX),
        None => Duration::days(default_cache_days),
    }
}

pub struct CacheStore {
    dir: PathBuf,
    index: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl CacheStore {
    /// Opens the cache in `dir`. A missing or unreadable index starts empty.
    pub async fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let index_path = dir.join(INDEX_FILE_NAME);

        let index = match tokio::fs::read_to_string(&index_path).await {
            Ok(json) => match serde_json::from_str::<BTreeMap<String, DateTime<Utc>>>(&json) {
                Ok(index) => {
                    tracing::debug!(
                        "Loaded {} cache entries from {}",
                        index.len(),
                        index_path.display()
                    );
                    index
                }
                Err(e) => {
                    tracing::warn!(
                        target: ERRORS_TARGET,
                        "Ignoring corrupt cache index {}: {}",
                        index_path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(
                    target: ERRORS_TARGET,
                    "Cannot read cache index {}: {}",
                    index_path.display(),
                    e
                );
                BTreeMap::new()
            }
        };

        Self {
            dir,
            index: Mutex::new(index),
        }
    }

    fn index(&self) -> MutexGuard<'_, BTreeMap<String, DateTime<Utc>>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn payload_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.index().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index().is_empty()
    }

    /// Fresh payload on disk and an index entry expiring at or after `now`.
    pub async fn is_valid(&self, key: &str, now: DateTime<Utc>) -> bool {
        if !self.expires_at(key).is_some_and(|expires| expires >= now) {
            return false;
        }
        tokio::fs::metadata(self.payload_path(key))
            .await
            .is_ok_and(|metadata| metadata.is_file())
    }

    pub async fn read(&self, key: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.payload_path(key)).await?)
    }

    pub async fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.payload_path(key)).await?)
    }

    /// Stores a downloaded payload, with its lifetime taken from the response's
    /// `Cache-Control` header.
    pub async fn write(
        &self,
        key: &str,
        payload: &[u8],
        cache_control: Option<&str>,
        now: DateTime<Utc>,
        default_cache_days: i64,
    ) -> Result<DateTime<Utc>> {
        let ttl = ttl_from_cache_control(cache_control, default_cache_days);
        self.write_with_ttl(key, payload, ttl, now).await
    }

    pub async fn write_with_ttl(
        &self,
        key: &str,
        payload: &[u8],
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.payload_path(key), payload).await?;

        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.index().insert(key.to_string(), expires_at);
        Ok(expires_at)
    }

    /// Writes the whole index through a temporary file and a rename.
    pub async fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.index())?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let index_path = self.dir.join(INDEX_FILE_NAME);
        let tmp_path = self.dir.join(format!("{}.tmp", INDEX_FILE_NAME));
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &index_path).await?;

        tracing::debug!("Persisted {} cache entries to {}", self.len(), index_path.display());
        Ok(())
    }
}
