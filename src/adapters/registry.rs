//! Bulk registry databases (RPSL text dumps) as a source of allocation records.
//! ARIN can instead be served live by [`ArinRdapSource`].

use crate::adapters::rdap::ArinRdapSource;
use crate::core::cache::{cache_key, CacheStore};
use crate::core::candidates::has_geofeed_reference;
use crate::core::{AllocationRecord, Compression, DumpSource, RecordSource, Registry};
use crate::utils::error::{FinderError, Result};
use crate::utils::logger::ERRORS_TARGET;
use chrono::{DateTime, NaiveDate, Utc};
use flate2::read::MultiGzDecoder;
use reqwest::Client;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Cursor};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Dumps are refreshed at most once a day.
pub const DUMP_TTL_DAYS: i64 = 1;

const DUMP_TIMEOUT: Duration = Duration::from_secs(600);

const RANGE_KEYS: [&str; 3] = ["inetnum", "inet6num", "netrange"];
const REMARK_KEYS: [&str; 2] = ["remarks", "comment"];
const UPDATE_KEYS: [&str; 3] = ["last-modified", "last-updated", "updated"];

pub struct RegistryDumpSource {
    client: Client,
    cache: Arc<CacheStore>,
    dumps: BTreeMap<Registry, Vec<DumpSource>>,
    live_arin: Option<ArinRdapSource>,
    now: DateTime<Utc>,
}

impl RegistryDumpSource {
    pub fn new(
        client: Client,
        cache: Arc<CacheStore>,
        dumps: BTreeMap<Registry, Vec<DumpSource>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client,
            cache,
            dumps,
            live_arin: None,
            now,
        }
    }

    /// Answers ARIN through `source` instead of a configured dump.
    pub fn with_live_arin(mut self, source: ArinRdapSource) -> Self {
        self.live_arin = Some(source);
        self
    }

    async fn load_dump(&self, dump: &DumpSource) -> Result<Vec<u8>> {
        if dump.url.starts_with("file://") {
            let path = Url::parse(&dump.url)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| FinderError::InvalidConfigValueError {
                    field: "dumps.url".to_string(),
                    value: dump.url.clone(),
                    reason: "not a local file path".to_string(),
                })?;
            return Ok(tokio::fs::read(path).await?);
        }

        let key = cache_key(&dump.url);
        if self.cache.is_valid(&key, self.now).await {
            match self.cache.read_bytes(&key).await {
                Ok(bytes) => {
                    tracing::info!("{} [cache]", dump.url);
                    return Ok(bytes);
                }
                Err(e) => tracing::warn!(
                    target: ERRORS_TARGET,
                    "Cached dump {} unreadable: {}",
                    dump.url,
                    e
                ),
            }
        }

        tracing::info!("{} [download]", dump.url);
        let bytes = self
            .client
            .get(&dump.url)
            .timeout(DUMP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if let Err(e) = self
            .cache
            .write_with_ttl(&key, &bytes, chrono::Duration::days(DUMP_TTL_DAYS), self.now)
            .await
        {
            tracing::warn!(target: ERRORS_TARGET, "Cannot cache {}: {}", dump.url, e);
        }

        Ok(bytes.to_vec())
    }

    async fn records_from(&self, dump: &DumpSource) -> Result<Vec<AllocationRecord>> {
        let bytes = self.load_dump(dump).await?;
        let compression = dump.compression();

        tokio::task::spawn_blocking(move || parse_dump(&bytes, compression))
            .await
            .map_err(|e| FinderError::ProcessingError {
                message: format!("Dump parser stopped: {}", e),
            })?
    }
}

#[async_trait::async_trait]
impl RecordSource for RegistryDumpSource {
    /// Records with a geofeed reference from every dump of `registries`.
    ///
    /// A failing dump is logged and skipped. The call fails only when every
    /// attempted dump failed.
    async fn fetch_records(&self, registries: &[Registry]) -> Result<Vec<AllocationRecord>> {
        let mut records = Vec::new();
        let mut attempted = 0;
        let mut failures = Vec::new();

        for registry in registries {
            if let (Registry::Arin, Some(live)) = (registry, &self.live_arin) {
                attempted += 1;
                match live.fetch_records(&[Registry::Arin]).await {
                    Ok(found) => records.extend(found),
                    Err(e) => {
                        tracing::error!(target: ERRORS_TARGET, "Cannot retrieve arin: {}", e);
                        failures.push(registry.as_str());
                    }
                }
                continue;
            }

            let dumps = match self.dumps.get(registry) {
                Some(dumps) if !dumps.is_empty() => dumps,
                _ => {
                    tracing::warn!("No bulk dump configured for {}, skipping", registry);
                    continue;
                }
            };

            for dump in dumps {
                attempted += 1;
                match self.records_from(dump).await {
                    Ok(found) => {
                        tracing::debug!("{}: {} records from {}", registry, found.len(), dump.url);
                        records.extend(found);
                    }
                    Err(e) => {
                        tracing::error!(
                            target: ERRORS_TARGET,
                            "Cannot retrieve {} dump {}: {}",
                            registry,
                            dump.url,
                            e
                        );
                        failures.push(registry.as_str());
                    }
                }
            }
        }

        if attempted > 0 && failures.len() == attempted {
            failures.dedup();
            return Err(FinderError::RegistryError {
                registry: failures.join(","),
                message: "no registry dump could be retrieved".to_string(),
            });
        }

        Ok(records)
    }
}

/// Decompresses and parses one dump. Zip archives contribute every file they hold.
pub fn parse_dump(bytes: &[u8], compression: Compression) -> Result<Vec<AllocationRecord>> {
    match compression {
        Compression::None => parse_rpsl(bytes),
        Compression::Gzip => parse_rpsl(BufReader::new(MultiGzDecoder::new(bytes))),
        Compression::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
            let mut records = Vec::new();
            for i in 0..archive.len() {
                let file = archive.by_index(i)?;
                if file.is_dir() {
                    continue;
                }
                records.extend(parse_rpsl(BufReader::new(file))?);
            }
            Ok(records)
        }
    }
}

#[derive(Default)]
struct ObjectBuilder {
    record: AllocationRecord,
    last_key: Option<String>,
}

impl ObjectBuilder {
    fn attribute(&mut self, key: &str, value: &str) {
        if RANGE_KEYS.contains(&key) {
            if self.record.range.is_empty() {
                self.record.range = value.to_string();
            }
        } else if key == "geofeed" {
            self.record.geofeed = Some(value.to_string());
        } else if REMARK_KEYS.contains(&key) {
            self.record.remarks.push(value.to_string());
        } else if UPDATE_KEYS.contains(&key) {
            if let Some(updated) = parse_timestamp(value) {
                self.record.last_update = Some(updated);
            }
        }
        self.last_key = Some(key.to_string());
    }

    fn continuation(&mut self, value: &str) {
        let Some(key) = self.last_key.as_deref() else {
            return;
        };
        if value.is_empty() {
            return;
        }
        if REMARK_KEYS.contains(&key) {
            if let Some(remark) = self.record.remarks.last_mut() {
                remark.push(' ');
                remark.push_str(value);
            }
        } else if key == "geofeed" {
            if let Some(geofeed) = self.record.geofeed.as_mut() {
                geofeed.push(' ');
                geofeed.push_str(value);
            }
        }
    }

    fn finish(&mut self) -> Option<AllocationRecord> {
        let builder = std::mem::take(self);
        let record = builder.record;
        (!record.range.is_empty() && has_geofeed_reference(&record)).then_some(record)
    }
}

/// Parses RPSL objects separated by blank lines, keeping the allocation
/// objects that reference a geofeed. Invalid UTF-8 is replaced.
pub fn parse_rpsl<R: BufRead>(mut reader: R) -> Result<Vec<AllocationRecord>> {
    let mut records = Vec::new();
    let mut object = ObjectBuilder::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            records.extend(object.finish());
            continue;
        }
        if line.starts_with('%') || line.starts_with('#') {
            continue;
        }
        if line.starts_with([' ', '\t', '+']) {
            object.continuation(line.trim_start_matches('+').trim());
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            object.attribute(&key.trim().to_ascii_lowercase(), value.trim());
        }
    }
    records.extend(object.finish());

    Ok(records)
}

/// Accepts RFC 3339 timestamps and the date-only forms registries use.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%d", "%Y%m%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
