use crate::adapters::whois::WhoisClient;
use crate::core::cache::CacheStore;
use crate::core::candidates::{build_candidates, candidates_from_whois, most_recent_per_range};
use crate::core::fetcher::{FetchedGeofeed, GeofeedFetcher};
use crate::core::output::render_rows;
use crate::core::resolver::resolve_priority;
use crate::core::validator::RowValidator;
use crate::core::{ConfigProvider, FetchCandidate, LocationRow, Pipeline, RecordSource, Storage};
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use reqwest::Client;
use std::sync::Arc;

fn validate_all(validator: &RowValidator, fetched: &[FetchedGeofeed]) -> Vec<LocationRow> {
    fetched
        .iter()
        .flat_map(|f| {
            validator.validate(
                &f.candidate.ip_range,
                f.candidate.last_update,
                f.payload.as_deref(),
            )
        })
        .collect()
}

/// Full run: registry records in, deconflicted geofeed CSV out.
pub struct BulkPipeline<S: Storage, C: ConfigProvider, R: RecordSource> {
    storage: S,
    config: C,
    source: R,
    fetcher: GeofeedFetcher,
    validator: RowValidator,
}

impl<S: Storage, C: ConfigProvider, R: RecordSource> BulkPipeline<S, C, R> {
    pub fn new(
        storage: S,
        config: C,
        source: R,
        client: Client,
        cache: Arc<CacheStore>,
        now: DateTime<Utc>,
    ) -> Self {
        let fetcher = GeofeedFetcher::new(client, cache, &config, now);
        let validator = RowValidator::from_config(&config);
        Self {
            storage,
            config,
            source,
            fetcher,
            validator,
        }
    }
}

#[async_trait::async_trait]
impl<S: Storage, C: ConfigProvider, R: RecordSource> Pipeline for BulkPipeline<S, C, R> {
    async fn extract(&self) -> Result<Vec<FetchCandidate>> {
        let records = self.source.fetch_records(self.config.registries()).await?;
        tracing::info!("Found {} allocation records with a geofeed reference", records.len());

        let candidates: Vec<FetchCandidate> = records.iter().flat_map(build_candidates).collect();
        let total = candidates.len();
        let candidates = most_recent_per_range(candidates);
        tracing::debug!("{} candidates, {} after deduplication", total, candidates.len());

        Ok(candidates)
    }

    async fn transform(&self, candidates: Vec<FetchCandidate>) -> Result<Vec<LocationRow>> {
        let fetched = self.fetcher.fetch_all(candidates).await;
        let rows = validate_all(&self.validator, &fetched);
        tracing::info!("{} geofeed rows passed validation", rows.len());

        Ok(resolve_priority(rows))
    }

    async fn load(&self, rows: Vec<LocationRow>) -> Result<String> {
        let bytes = render_rows(&rows)?;
        tracing::debug!("Writing {} rows ({} bytes)", rows.len(), bytes.len());
        self.storage
            .write_file(self.config.output_path(), &bytes)
            .await?;

        Ok(self.config.output_path().to_string())
    }
}

/// Single-prefix check: one whois lookup, rows printed instead of written.
pub struct PrefixPipeline {
    whois: WhoisClient,
    prefix: IpNet,
    fetcher: GeofeedFetcher,
    validator: RowValidator,
    now: DateTime<Utc>,
}

impl PrefixPipeline {
    pub fn new<C: ConfigProvider>(
        config: &C,
        whois: WhoisClient,
        prefix: IpNet,
        client: Client,
        cache: Arc<CacheStore>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            whois,
            prefix,
            fetcher: GeofeedFetcher::new(client, cache, config, now),
            validator: RowValidator::from_config(config),
            now,
        }
    }
}

#[async_trait::async_trait]
impl Pipeline for PrefixPipeline {
    async fn extract(&self) -> Result<Vec<FetchCandidate>> {
        let query = self.prefix.addr().to_string();
        let response = self.whois.lookup(&query).await?;
        Ok(candidates_from_whois(&response, &self.prefix, self.now))
    }

    async fn transform(&self, candidates: Vec<FetchCandidate>) -> Result<Vec<LocationRow>> {
        let fetched = self.fetcher.fetch_all(candidates).await;
        Ok(validate_all(&self.validator, &fetched))
    }

    async fn load(&self, rows: Vec<LocationRow>) -> Result<String> {
        let bytes = render_rows(&rows)?;
        print!("{}", String::from_utf8_lossy(&bytes));
        Ok("stdout".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AllocationRecord, Registry};
    use crate::utils::error::FinderError;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    struct MockStorage {
        files: std::sync::Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                files: std::sync::Arc::new(Mutex::new(HashMap::new())),
            }
        }

        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().await.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            self.files
                .lock()
                .await
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    struct MockConfig {
        cache_dir: PathBuf,
        registries: Vec<Registry>,
    }

    impl ConfigProvider for MockConfig {
        fn output_path(&self) -> &str {
            "result.csv"
        }

        fn registries(&self) -> &[Registry] {
            &self.registries
        }

        fn cache_dir(&self) -> &Path {
            &self.cache_dir
        }

        fn concurrent_requests(&self) -> usize {
            2
        }

        fn download_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        fn default_cache_days(&self) -> i64 {
            7
        }

        fn include_zip(&self) -> bool {
            false
        }

        fn keep_non_iso(&self) -> bool {
            false
        }

        fn user_agent(&self) -> &str {
            "geofeed-finder-test"
        }
    }

    struct StaticSource {
        records: Vec<AllocationRecord>,
    }

    #[async_trait::async_trait]
    impl RecordSource for StaticSource {
        async fn fetch_records(&self, _registries: &[Registry]) -> Result<Vec<AllocationRecord>> {
            Ok(self.records.clone())
        }
    }

    struct FailingSource;

    #[async_trait::async_trait]
    impl RecordSource for FailingSource {
        async fn fetch_records(&self, _registries: &[Registry]) -> Result<Vec<AllocationRecord>> {
            Err(FinderError::RegistryError {
                registry: "ripe".to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn record(range: &str, url: &str, year: i32) -> AllocationRecord {
        AllocationRecord {
            range: range.to_string(),
            geofeed: Some(url.to_string()),
            remarks: vec![],
            last_update: Some(Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    async fn pipeline<R: RecordSource>(
        dir: &TempDir,
        storage: MockStorage,
        source: R,
    ) -> BulkPipeline<MockStorage, MockConfig, R> {
        let config = MockConfig {
            cache_dir: dir.path().to_path_buf(),
            registries: vec![Registry::Ripe],
        };
        let cache = Arc::new(CacheStore::load(dir.path()).await);
        let client = crate::core::fetcher::build_http_client(&config).unwrap();
        BulkPipeline::new(storage, config, source, client, cache, Utc::now())
    }

    #[tokio::test]
    async fn test_extract_builds_and_deduplicates_candidates() {
        let dir = TempDir::new().unwrap();
        let source = StaticSource {
            records: vec![
                record("192.0.2.0/24", "https://old.example/feed.csv", 2020),
                record("192.0.2.0 - 192.0.2.255", "https://new.example/feed.csv", 2021),
                record("198.51.100.0/24", "https://x.example/feed.csv", 2019),
            ],
        };
        let pipeline = pipeline(&dir, MockStorage::new(), source).await;

        let candidates = pipeline.extract().await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0].geofeed_url.as_deref(),
            Some("https://new.example/feed.csv")
        );
    }

    #[tokio::test]
    async fn test_extract_propagates_source_failure() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, MockStorage::new(), FailingSource).await;
        assert!(pipeline.extract().await.is_err());
    }

    #[tokio::test]
    async fn test_transform_and_load_resolve_overlaps() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/broad.csv");
            then.status(200)
                .body("10.0.0.0/8,US,US-CA,Broad\n10.2.0.0/16,US,US-TX,Austin\n");
        });
        server.mock(|when, then| {
            when.method(GET).path("/narrow.csv");
            then.status(200).body("10.1.0.0/16,NL,NL-NH,Amsterdam,1011\n");
        });

        let dir = TempDir::new().unwrap();
        let storage = MockStorage::new();
        let source = StaticSource {
            records: vec![
                record("10.0.0.0/8", &server.url("/broad.csv"), 2021),
                record("10.1.0.0/16", &server.url("/narrow.csv"), 2021),
            ],
        };
        let pipeline = pipeline(&dir, storage.clone(), source).await;

        let candidates = pipeline.extract().await.unwrap();
        let rows = pipeline.transform(candidates).await.unwrap();
        let output_path = pipeline.load(rows).await.unwrap();

        assert_eq!(output_path, "result.csv");
        let written = String::from_utf8(storage.get_file("result.csv").await.unwrap()).unwrap();
        assert_eq!(
            written,
            "10.2.0.0/16,US,US-TX,Austin\n10.1.0.0/16,NL,NL-NH,Amsterdam\n"
        );
    }
}
