use crate::core::cache::{cache_key, CacheStore};
use crate::core::ConfigProvider;
use crate::domain::model::FetchCandidate;
use crate::utils::error::Result;
use crate::utils::logger::ERRORS_TARGET;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A download other candidates of the same run can attach to.
type PendingDownload = Shared<BoxFuture<'static, Option<Arc<str>>>>;

#[derive(Debug, Clone)]
pub struct FetchedGeofeed {
    pub candidate: FetchCandidate,
    pub payload: Option<Arc<str>>,
}

pub fn build_http_client<C: ConfigProvider>(config: &C) -> Result<Client> {
    Ok(Client::builder().user_agent(config.user_agent()).build()?)
}

pub struct GeofeedFetcher {
    client: Client,
    cache: Arc<CacheStore>,
    timeout: Duration,
    batch_size: usize,
    default_cache_days: i64,
    now: DateTime<Utc>,
    in_flight: Mutex<HashMap<String, PendingDownload>>,
}

impl GeofeedFetcher {
    pub fn new<C: ConfigProvider>(
        client: Client,
        cache: Arc<CacheStore>,
        config: &C,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client,
            cache,
            timeout: config.download_timeout(),
            batch_size: config.concurrent_requests().max(1),
            default_cache_days: config.default_cache_days(),
            now,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches every candidate, `batch_size` at a time, then persists the
    /// cache index. Failed downloads come back with no payload.
    pub async fn fetch_all(&self, candidates: Vec<FetchCandidate>) -> Vec<FetchedGeofeed> {
        let mut fetched = Vec::with_capacity(candidates.len());

        for batch in candidates.chunks(self.batch_size) {
            let payloads = join_all(batch.iter().map(|candidate| self.fetch_one(candidate))).await;
            fetched.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(payloads)
                    .map(|(candidate, payload)| FetchedGeofeed { candidate, payload }),
            );
        }

        if let Err(e) = self.cache.persist().await {
            tracing::error!(target: ERRORS_TARGET, "Cannot persist cache index: {}", e);
        }

        fetched
    }

    pub async fn fetch_one(&self, candidate: &FetchCandidate) -> Option<Arc<str>> {
        let url = candidate.geofeed_url.as_deref()?;
        let key = cache_key(url);

        if self.cache.is_valid(&key, self.now).await {
            match self.cache.read(&key).await {
                Ok(payload) => {
                    log_entry(&candidate.ip_range, url, true);
                    return Some(Arc::from(payload));
                }
                Err(e) => tracing::warn!(
                    target: ERRORS_TARGET,
                    "Cached copy of {} unreadable, downloading again: {}",
                    url,
                    e
                ),
            }
        }

        let (download, attached) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(&key) {
                Some(pending) => (pending.clone(), true),
                None => {
                    let pending = self.download(url.to_string(), key.clone());
                    in_flight.insert(key, pending.clone());
                    (pending, false)
                }
            }
        };

        log_entry(&candidate.ip_range, url, attached);
        download.await
    }

    fn download(&self, url: String, key: String) -> PendingDownload {
        let client = self.client.clone();
        let cache = Arc::clone(&self.cache);
        let timeout = self.timeout;
        let now = self.now;
        let default_cache_days = self.default_cache_days;

        async move {
            match request_geofeed(&client, &url, timeout).await {
                Ok((body, cache_control)) => {
                    let cached = cache
                        .write(
                            &key,
                            body.as_bytes(),
                            cache_control.as_deref(),
                            now,
                            default_cache_days,
                        )
                        .await;
                    if let Err(e) = cached {
                        tracing::warn!(target: ERRORS_TARGET, "Cannot cache {}: {}", url, e);
                    }
                    Some(Arc::from(body))
                }
                Err(e) => {
                    tracing::warn!(target: ERRORS_TARGET, "error {} {}", url, e);
                    None
                }
            }
        }
        .boxed()
        .shared()
    }
}

async fn request_geofeed(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<(String, Option<String>)> {
    let response = client
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
    let body = response.text().await?;

    Ok((body, cache_control))
}

fn log_entry(ip_range: &str, url: &str, cached: bool) {
    tracing::info!(
        "inetnum: {} {} {}",
        ip_range,
        url,
        if cached { "[cache]" } else { "[download]" }
    );
}
