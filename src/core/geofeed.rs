//! Geofeed file format: `prefix,country,region,city,postal_code` rows.

use crate::core::ip;
use crate::utils::logger::ERRORS_TARGET;
use csv::{ReaderBuilder, Trim};
use ipnet::IpNet;
use std::fmt;

/// ISO 3166-1 alpha-2 country codes.
const ISO_COUNTRIES: [&str; 249] = [
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX", "AZ",
    "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ", "BR", "BS",
    "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK", "CL", "CM", "CN",
    "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM", "DO", "DZ", "EC", "EE",
    "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR", "GA", "GB", "GD", "GE", "GF",
    "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS", "GT", "GU", "GW", "GY", "HK", "HM",
    "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN", "IO", "IQ", "IR", "IS", "IT", "JE", "JM",
    "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN", "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC",
    "LI", "LK", "LR", "LS", "LT", "LU", "LV", "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK",
    "ML", "MM", "MN", "MO", "MP", "MQ", "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA",
    "NC", "NE", "NF", "NG", "NI", "NL", "NO", "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG",
    "PH", "PK", "PL", "PM", "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW",
    "SA", "SB", "SC", "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS",
    "ST", "SV", "SX", "SY", "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO",
    "TR", "TT", "TV", "TW", "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
    "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
];

pub fn is_iso_country(code: &str) -> bool {
    ISO_COUNTRIES.binary_search(&code).is_ok()
}

/// ISO 3166-2 shape `CC-XXX`, where `CC` must be `country`.
pub fn is_iso_region(code: &str, country: &str) -> bool {
    match code.split_once('-') {
        Some((prefix, subdivision)) => {
            prefix == country
                && (1..=3).contains(&subdivision.len())
                && subdivision
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        }
        None => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeofeedEntry {
    pub prefix: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub postal_code: String,
}

impl GeofeedEntry {
    pub fn network(&self) -> Option<IpNet> {
        ip::parse_prefix(&self.prefix)
    }

    /// Format problems with this row; empty when the row is clean.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.network().is_none() {
            errors.push(format!("invalid prefix '{}'", self.prefix));
        }
        if !self.country.is_empty() && !is_iso_country(&self.country) {
            errors.push(format!("invalid country code '{}'", self.country));
        }
        if !self.region.is_empty() && !is_iso_region(&self.region, &self.country) {
            errors.push(format!("invalid region code '{}'", self.region));
        }

        errors
    }
}

impl fmt::Display for GeofeedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.prefix, self.country, self.region, self.city, self.postal_code
        )
    }
}

/// Reads every data row of a geofeed file. Comment and blank lines are skipped,
/// missing trailing columns are empty and extra columns are ignored.
pub fn parse_geofeed(payload: &str) -> Vec<GeofeedEntry> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(payload.as_bytes());

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(target: ERRORS_TARGET, "Unreadable geofeed line: {}", e);
                continue;
            }
        };

        let field = |index: usize| record.get(index).unwrap_or_default().to_string();
        let prefix = field(0);
        if prefix.is_empty() {
            continue;
        }

        entries.push(GeofeedEntry {
            prefix,
            country: field(1).to_uppercase(),
            region: field(2).to_uppercase(),
            city: field(3),
            postal_code: field(4),
        });
    }

    entries
}
