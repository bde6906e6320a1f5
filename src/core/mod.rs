pub mod cache;
pub mod candidates;
pub mod etl;
pub mod fetcher;
pub mod geofeed;
pub mod ip;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod validator;

pub use crate::domain::model::{
    AddressFamily, AllocationRecord, Compression, DumpSource, FetchCandidate, LocationRow,
    Registry,
};
pub use crate::domain::ports::{ConfigProvider, Pipeline, RecordSource, Storage};
pub use crate::utils::error::Result;
