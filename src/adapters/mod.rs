//! Concrete implementations of the domain ports: registry dumps, live ARIN
//! lookups, whois and the local filesystem.

pub mod rdap;
pub mod registry;
pub mod storage;
pub mod whois;

pub use rdap::ArinRdapSource;
pub use registry::RegistryDumpSource;
pub use storage::LocalStorage;
pub use whois::WhoisClient;
