//! Live ARIN records for runs without the bulk whois archive.
//!
//! ARIN's delegation statistics list every allocation; each one is looked up
//! over RDAP and its registration comments are read for a geofeed reference.

use crate::core::cache::{cache_key, CacheStore};
use crate::core::candidates::has_geofeed_reference;
use crate::core::{AllocationRecord, ConfigProvider, RecordSource, Registry};
use crate::utils::error::{FinderError, Result};
use crate::utils::logger::ERRORS_TARGET;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STATS_URL: &str =
    "https://ftp.arin.net/pub/stats/arin/delegated-arin-extended-latest";
pub const DEFAULT_RDAP_URL: &str = "https://rdap.arin.net/registry";

/// The statistics file is refreshed at most once a day.
const STATS_TTL_DAYS: i64 = 1;
const STATS_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapNetwork {
    start_address: String,
    end_address: String,
    #[serde(default)]
    remarks: Vec<RdapRemark>,
    #[serde(default)]
    events: Vec<RdapEvent>,
}

#[derive(Debug, Deserialize)]
struct RdapRemark {
    #[serde(default)]
    description: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapEvent {
    event_action: String,
    event_date: DateTime<Utc>,
}

pub struct ArinRdapSource {
    client: Client,
    cache: Arc<CacheStore>,
    stats_url: String,
    rdap_url: String,
    batch_size: usize,
    timeout: Duration,
    default_cache_days: i64,
    now: DateTime<Utc>,
}

impl ArinRdapSource {
    pub fn new<C: ConfigProvider>(
        client: Client,
        cache: Arc<CacheStore>,
        config: &C,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client,
            cache,
            stats_url: DEFAULT_STATS_URL.to_string(),
            rdap_url: DEFAULT_RDAP_URL.to_string(),
            batch_size: config.concurrent_requests().max(1),
            timeout: config.download_timeout(),
            default_cache_days: config.default_cache_days(),
            now,
        }
    }

    pub fn with_endpoints(
        mut self,
        stats_url: impl Into<String>,
        rdap_url: impl Into<String>,
    ) -> Self {
        self.stats_url = stats_url.into();
        self.rdap_url = rdap_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Start addresses of ARIN's allocated and assigned blocks.
    pub async fn allocations(&self) -> Result<Vec<IpAddr>> {
        let key = cache_key(&self.stats_url);
        if let Some(cached) = self.cached(&key, &self.stats_url).await {
            return Ok(parse_delegated_stats(&cached));
        }

        tracing::info!("{} [download]", self.stats_url);
        let (body, _) = self.request(&self.stats_url, STATS_TIMEOUT).await?;
        let ttl = chrono::Duration::days(STATS_TTL_DAYS);
        let stored = self
            .cache
            .write_with_ttl(&key, body.as_bytes(), ttl, self.now)
            .await;
        if let Err(e) = stored {
            tracing::warn!(target: ERRORS_TARGET, "Cannot cache {}: {}", self.stats_url, e);
        }

        Ok(parse_delegated_stats(&body))
    }

    /// The network RDAP reports for `address`, if it references a geofeed.
    pub async fn lookup(&self, address: IpAddr) -> Result<Option<AllocationRecord>> {
        let url = format!("{}/ip/{}", self.rdap_url, address);
        let key = cache_key(&url);

        let body = match self.cached(&key, &url).await {
            Some(body) => body,
            None => {
                let (body, cache_control) = self.request(&url, self.timeout).await?;
                let stored = self
                    .cache
                    .write(
                        &key,
                        body.as_bytes(),
                        cache_control.as_deref(),
                        self.now,
                        self.default_cache_days,
                    )
                    .await;
                if let Err(e) = stored {
                    tracing::warn!(target: ERRORS_TARGET, "Cannot cache {}: {}", url, e);
                }
                body
            }
        };

        let record = parse_rdap_network(&body)?;
        Ok(has_geofeed_reference(&record).then_some(record))
    }

    async fn cached(&self, key: &str, url: &str) -> Option<String> {
        if !self.cache.is_valid(key, self.now).await {
            return None;
        }
        match self.cache.read(key).await {
            Ok(body) => {
                tracing::debug!("{} [cache]", url);
                Some(body)
            }
            Err(e) => {
                tracing::warn!(target: ERRORS_TARGET, "Cached copy of {} unreadable: {}", url, e);
                None
            }
        }
    }

    async fn request(&self, url: &str, timeout: Duration) -> Result<(String, Option<String>)> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;

        let cache_control = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok((response.text().await?, cache_control))
    }
}

#[async_trait::async_trait]
impl RecordSource for ArinRdapSource {
    /// ARIN records with a geofeed reference. Other registries yield nothing.
    ///
    /// A failed lookup is logged and skipped; the call fails when the
    /// statistics file is unavailable or every lookup failed.
    async fn fetch_records(&self, registries: &[Registry]) -> Result<Vec<AllocationRecord>> {
        if !registries.contains(&Registry::Arin) {
            return Ok(Vec::new());
        }

        let addresses = self
            .allocations()
            .await
            .map_err(|e| FinderError::RegistryError {
                registry: Registry::Arin.to_string(),
                message: format!("delegation statistics unavailable: {}", e),
            })?;
        tracing::info!("arin: {} allocations to look up over RDAP", addresses.len());

        let mut records = Vec::new();
        let mut failed = 0;
        for batch in addresses.chunks(self.batch_size) {
            let answers = join_all(batch.iter().map(|address| self.lookup(*address))).await;
            for (address, answer) in batch.iter().zip(answers) {
                match answer {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            target: ERRORS_TARGET,
                            "RDAP lookup of {} failed: {}",
                            address,
                            e
                        );
                        failed += 1;
                    }
                }
            }
        }

        if !addresses.is_empty() && failed == addresses.len() {
            return Err(FinderError::RegistryError {
                registry: Registry::Arin.to_string(),
                message: "no RDAP lookup succeeded".to_string(),
            });
        }

        tracing::debug!("arin: {} records with a geofeed reference", records.len());
        Ok(records)
    }
}

/// Start addresses of the `allocated`/`assigned` IPv4 and IPv6 lines of an
/// RIR delegation statistics file, without duplicates.
pub fn parse_delegated_stats(text: &str) -> Vec<IpAddr> {
    let mut seen = BTreeSet::new();
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 7 {
                return None;
            }
            let family = matches!(fields[2], "ipv4" | "ipv6");
            let status = matches!(fields[6], "allocated" | "assigned");
            if !family || !status {
                return None;
            }
            fields[3].parse::<IpAddr>().ok()
        })
        .filter(|address| seen.insert(*address))
        .collect()
}

/// Maps an RDAP `ip network` object onto an allocation record. Every remark
/// description line becomes one remark; `last changed` gives the update time.
pub fn parse_rdap_network(json: &str) -> Result<AllocationRecord> {
    let network: RdapNetwork = serde_json::from_str(json)?;

    let last_update = network
        .events
        .iter()
        .filter(|event| event.event_action.eq_ignore_ascii_case("last changed"))
        .map(|event| event.event_date)
        .max();

    Ok(AllocationRecord {
        range: format!("{} - {}", network.start_address, network.end_address),
        geofeed: None,
        remarks: network
            .remarks
            .into_iter()
            .flat_map(|remark| remark.description)
            .collect(),
        last_update,
    })
}
