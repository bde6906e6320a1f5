use crate::core::ip;
use crate::utils::error::FinderError;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regional internet registries whose allocation records can be scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Registry {
    Ripe,
    Apnic,
    Lacnic,
    Afrinic,
    Arin,
}

impl Registry {
    pub const ALL: [Registry; 5] = [
        Registry::Ripe,
        Registry::Apnic,
        Registry::Lacnic,
        Registry::Afrinic,
        Registry::Arin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Registry::Ripe => "ripe",
            Registry::Apnic => "apnic",
            Registry::Lacnic => "lacnic",
            Registry::Afrinic => "afrinic",
            Registry::Arin => "arin",
        }
    }

    /// Public database dumps. ARIN has none without an API key.
    pub fn default_dumps(&self) -> Vec<DumpSource> {
        let urls: &[&str] = match self {
            Registry::Ripe => &[
                "https://ftp.ripe.net/ripe/dbase/split/ripe.db.inetnum.gz",
                "https://ftp.ripe.net/ripe/dbase/split/ripe.db.inet6num.gz",
            ],
            Registry::Apnic => &[
                "https://ftp.apnic.net/apnic/whois/apnic.db.inetnum.gz",
                "https://ftp.apnic.net/apnic/whois/apnic.db.inet6num.gz",
            ],
            Registry::Lacnic => &["https://ftp.lacnic.net/lacnic/dbase/lacnic.db.gz"],
            Registry::Afrinic => &["https://ftp.afrinic.net/pub/dbase/afrinic.db.gz"],
            Registry::Arin => &[],
        };
        urls.iter().map(|url| DumpSource::new(*url)).collect()
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Registry {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Registry::ALL
            .into_iter()
            .find(|registry| registry.as_str() == name)
            .ok_or_else(|| FinderError::InvalidConfigValueError {
                field: "include".to_string(),
                value: s.to_string(),
                reason: "expected one of ripe, apnic, lacnic, afrinic, arin".to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Zip,
}

impl Compression {
    pub fn infer(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.ends_with(".gz") {
            Compression::Gzip
        } else if path.ends_with(".zip") {
            Compression::Zip
        } else {
            Compression::None
        }
    }
}

/// One downloadable registry database file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpSource {
    pub url: String,
    #[serde(default)]
    pub compression: Option<Compression>,
}

impl DumpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            compression: None,
        }
    }

    pub fn compression(&self) -> Compression {
        self.compression
            .unwrap_or_else(|| Compression::infer(&self.url))
    }
}

/// A registry allocation object (inetnum, inet6num or NetRange).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationRecord {
    /// Either CIDR notation or `start - end`.
    pub range: String,
    pub geofeed: Option<String>,
    pub remarks: Vec<String>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchCandidate {
    pub ip_range: String,
    pub geofeed_url: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A geofeed row anchored to the allocation range that published it.
///
/// The address fields are derived from `declared_prefix` at construction and
/// never change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRow {
    pub ip_range: IpNet,
    pub declared_prefix: IpNet,
    pub country: String,
    pub region: String,
    pub city: String,
    pub postal_code: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub address_family: AddressFamily,
    pub prefix_bits: u8,
    pub ip_binary: u128,
}

impl LocationRow {
    pub fn new(
        ip_range: IpNet,
        declared_prefix: IpNet,
        country: impl Into<String>,
        region: impl Into<String>,
        city: impl Into<String>,
        postal_code: Option<String>,
        last_update: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            ip_range,
            declared_prefix,
            country: country.into(),
            region: region.into(),
            city: city.into(),
            postal_code,
            last_update,
            address_family: ip::address_family(&declared_prefix),
            prefix_bits: declared_prefix.prefix_len(),
            ip_binary: ip::network_bits(&declared_prefix),
        }
    }

    /// Output fields in geofeed column order.
    pub fn fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.declared_prefix.to_string(),
            self.country.clone(),
            self.region.clone(),
            self.city.clone(),
        ];
        if let Some(postal_code) = &self.postal_code {
            fields.push(postal_code.clone());
        }
        fields
    }
}
