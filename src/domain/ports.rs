use crate::domain::model::{AllocationRecord, FetchCandidate, LocationRow, Registry};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

pub trait Storage: Send + Sync {
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn output_path(&self) -> &str;
    fn registries(&self) -> &[Registry];
    fn cache_dir(&self) -> &Path;
    fn concurrent_requests(&self) -> usize;
    fn download_timeout(&self) -> Duration;
    fn default_cache_days(&self) -> i64;
    fn include_zip(&self) -> bool;
    fn keep_non_iso(&self) -> bool;
    fn user_agent(&self) -> &str;
}

/// Where allocation records come from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(&self, registries: &[Registry]) -> Result<Vec<AllocationRecord>>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<FetchCandidate>>;
    async fn transform(&self, candidates: Vec<FetchCandidate>) -> Result<Vec<LocationRow>>;
    async fn load(&self, rows: Vec<LocationRow>) -> Result<String>;
}
