use crate::core::geofeed::parse_geofeed;
use crate::core::ip;
use crate::core::ConfigProvider;
use crate::domain::model::LocationRow;
use crate::utils::logger::ERRORS_TARGET;
use chrono::{DateTime, Utc};

/// Filters geofeed rows down to the ones the publishing range is allowed to claim.
#[derive(Debug, Clone, Copy)]
pub struct RowValidator {
    keep_non_iso: bool,
    include_zip: bool,
}

impl RowValidator {
    pub fn new(keep_non_iso: bool, include_zip: bool) -> Self {
        Self {
            keep_non_iso,
            include_zip,
        }
    }

    pub fn from_config<C: ConfigProvider>(config: &C) -> Self {
        Self::new(config.keep_non_iso(), config.include_zip())
    }

    /// Rows of `payload` that pass format checks and whose prefix lies within
    /// `ip_range`. Postal codes are dropped unless explicitly requested.
    pub fn validate(
        &self,
        ip_range: &str,
        last_update: Option<DateTime<Utc>>,
        payload: Option<&str>,
    ) -> Vec<LocationRow> {
        let Some(payload) = payload else {
            return Vec::new();
        };
        let Some(anchor) = ip::parse_prefix(ip_range) else {
            tracing::warn!(target: ERRORS_TARGET, "Error: unusable range '{}'", ip_range);
            return Vec::new();
        };

        let mut rows = Vec::new();
        for entry in parse_geofeed(payload) {
            let errors = entry.validate();
            if !errors.is_empty() {
                tracing::warn!(target: ERRORS_TARGET, "Error: {} {}", entry, errors.join(", "));
            }

            let Some(prefix) = entry.network() else {
                continue;
            };
            if !errors.is_empty() && !self.keep_non_iso {
                continue;
            }
            if !(ip::is_equal_prefix(&anchor, &prefix) || ip::is_subnet(&prefix, &anchor)) {
                tracing::warn!(
                    target: ERRORS_TARGET,
                    "Error: {} is outside {}",
                    entry,
                    ip_range
                );
                continue;
            }

            let postal_code = self.include_zip.then(|| entry.postal_code.clone());
            rows.push(LocationRow::new(
                anchor,
                prefix,
                entry.country,
                entry.region,
                entry.city,
                postal_code,
                last_update,
            ));
        }

        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "\
10.1.0.0/16,US,US-NY,New York,10001
10.2.0.0/16,XX,,Nowhere,
11.0.0.0/16,DE,DE-BE,Berlin,10115
10.0.0.0/8,IT,IT-MI,Milan,20100
";

    fn prefixes(rows: &[LocationRow]) -> Vec<String> {
        rows.iter().map(|r| r.declared_prefix.to_string()).collect()
    }

    #[test]
    fn test_rows_outside_range_or_invalid_are_dropped() {
        let rows = RowValidator::new(false, false).validate("10.0.0.0/8", None, Some(FEED));
        assert_eq!(prefixes(&rows), vec!["10.1.0.0/16", "10.0.0.0/8"]);
        assert!(rows
            .iter()
            .all(|r| r.ip_range.to_string() == "10.0.0.0/8"));
    }

    #[test]
    fn test_keep_non_iso_retains_bad_codes() {
        let rows = RowValidator::new(true, false).validate("10.0.0.0/8", None, Some(FEED));
        assert_eq!(
            prefixes(&rows),
            vec!["10.1.0.0/16", "10.2.0.0/16", "10.0.0.0/8"]
        );
    }

    #[test]
    fn test_postal_codes_only_when_requested() {
        let without = RowValidator::new(false, false).validate("10.0.0.0/8", None, Some(FEED));
        assert!(without.iter().all(|r| r.postal_code.is_none()));

        let with = RowValidator::new(false, true).validate("10.0.0.0/8", None, Some(FEED));
        assert_eq!(with[0].postal_code.as_deref(), Some("10001"));
    }

    #[test]
    fn test_accepted_rows_lie_within_the_record_range() {
        let rows = RowValidator::new(true, true).validate("10.1.0.0/16", None, Some(FEED));
        assert_eq!(prefixes(&rows), vec!["10.1.0.0/16"]);
        for row in &rows {
            assert!(ip::is_subnet(&row.declared_prefix, &row.ip_range));
        }
    }

    #[test]
    fn test_broader_declared_prefix_is_rejected() {
        let validator = RowValidator::new(false, false);

        let broader = validator.validate("10.1.0.0/16", None, Some("10.0.0.0/8,US,,,"));
        assert!(broader.is_empty());

        let contained = validator.validate("10.0.0.0/8", None, Some("10.1.0.0/16,US,,,"));
        assert_eq!(prefixes(&contained), vec!["10.1.0.0/16"]);

        let equal = validator.validate("10.1.0.0/16", None, Some("10.1.0.0/16,US,,,"));
        assert_eq!(prefixes(&equal), vec!["10.1.0.0/16"]);
    }

    #[test]
    fn test_missing_payload_yields_nothing() {
        assert!(RowValidator::new(true, true)
            .validate("10.0.0.0/8", None, None)
            .is_empty());
    }
}
