pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliConfig;
pub use crate::config::{FileConfig, Settings};

pub use crate::adapters::{ArinRdapSource, LocalStorage, RegistryDumpSource, WhoisClient};
pub use crate::core::{
    cache::CacheStore,
    etl::FinderEngine,
    pipeline::{BulkPipeline, PrefixPipeline},
};
pub use crate::utils::error::{FinderError, Result};
