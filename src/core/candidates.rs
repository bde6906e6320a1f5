//! Turns allocation records into fetch candidates and keeps the most recent
//! candidate per range.

use crate::core::ip;
use crate::domain::model::{AllocationRecord, FetchCandidate};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bhttps?://\S+").expect("URL pattern compiles"));

/// Where a geofeed URL was found on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeofeedOrigin {
    Attribute,
    Remark,
}

/// Lookup order: the dedicated attribute beats a remark.
const LOOKUP_ORDER: [GeofeedOrigin; 2] = [GeofeedOrigin::Attribute, GeofeedOrigin::Remark];

impl GeofeedOrigin {
    fn locate(self, record: &AllocationRecord) -> Option<String> {
        match self {
            GeofeedOrigin::Attribute => record
                .geofeed
                .as_deref()
                .filter(|value| !value.trim().is_empty())
                .and_then(last_url),
            GeofeedOrigin::Remark => geofeed_remark(record).and_then(last_url),
        }
    }
}

/// All URL-looking tokens in `text`, in order of appearance.
pub fn find_urls(text: &str) -> Vec<&str> {
    URL_PATTERN.find_iter(text).map(|m| m.as_str()).collect()
}

fn last_url(text: &str) -> Option<String> {
    find_urls(text).last().map(|url| url.to_string())
}

fn is_geofeed_remark(remark: &str) -> bool {
    remark.trim_start().to_lowercase().starts_with("geofeed")
}

fn geofeed_remark(record: &AllocationRecord) -> Option<&str> {
    record
        .remarks
        .iter()
        .map(String::as_str)
        .find(|remark| is_geofeed_remark(remark))
}

/// Records without a geofeed attribute or a `geofeed` remark are not candidates.
pub fn has_geofeed_reference(record: &AllocationRecord) -> bool {
    record
        .geofeed
        .as_deref()
        .is_some_and(|value| !value.trim().is_empty())
        || record.remarks.iter().any(|remark| is_geofeed_remark(remark))
}

pub fn locate_geofeed(record: &AllocationRecord) -> Option<(GeofeedOrigin, String)> {
    LOOKUP_ORDER
        .into_iter()
        .find_map(|origin| origin.locate(record).map(|url| (origin, url)))
}

/// One candidate per CIDR block of the record's range. Malformed ranges yield nothing.
pub fn build_candidates(record: &AllocationRecord) -> Vec<FetchCandidate> {
    if !has_geofeed_reference(record) {
        return Vec::new();
    }

    let range = record.range.trim();
    let ranges: Vec<String> = if range.contains('/') {
        vec![range.to_string()]
    } else {
        match ip::split_range(range) {
            Some(blocks) => blocks.iter().map(IpNet::to_string).collect(),
            None => {
                tracing::debug!("Skipping record with malformed range '{}'", range);
                return Vec::new();
            }
        }
    };

    let geofeed_url = match locate_geofeed(record) {
        Some((origin, url)) => {
            tracing::trace!("{}: geofeed {} from {:?}", range, url, origin);
            Some(url)
        }
        None => None,
    };

    ranges
        .into_iter()
        .map(|ip_range| FetchCandidate {
            ip_range,
            geofeed_url: geofeed_url.clone(),
            last_update: record.last_update,
        })
        .collect()
}

/// Keeps the most recently updated candidate per range string. On ties the
/// first one seen wins; output follows first-seen order.
pub fn most_recent_per_range(
    candidates: impl IntoIterator<Item = FetchCandidate>,
) -> Vec<FetchCandidate> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<FetchCandidate> = Vec::new();

    for candidate in candidates {
        match positions.get(&candidate.ip_range) {
            Some(&position) => {
                if candidate.last_update > kept[position].last_update {
                    kept[position] = candidate;
                }
            }
            None => {
                positions.insert(candidate.ip_range.clone(), kept.len());
                kept.push(candidate);
            }
        }
    }

    kept
}

/// Candidates for single-prefix mode, read from a raw whois answer.
///
/// The last `inetnum:`/`netrange:` line gives the range; every line that
/// mentions a geofeed contributes all of its URLs.
pub fn candidates_from_whois(
    response: &str,
    prefix: &IpNet,
    now: DateTime<Utc>,
) -> Vec<FetchCandidate> {
    let range = response
        .lines()
        .filter(|line| {
            let line = line.trim_start().to_lowercase();
            line.starts_with("inetnum") || line.starts_with("netrange")
        })
        .last()
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string());

    let Some(range) = range else {
        tracing::warn!("No inetnum found in the whois answer for {}", prefix);
        return Vec::new();
    };

    let ip_range = if range.contains('/') {
        Some(range)
    } else {
        ip::split_range(&range).and_then(|blocks| {
            blocks
                .into_iter()
                .find(|block| ip::is_subnet(prefix, block) || ip::is_subnet(block, prefix))
                .map(|block| block.to_string())
        })
    };

    let Some(ip_range) = ip_range else {
        tracing::warn!("Range in the whois answer does not cover {}", prefix);
        return Vec::new();
    };

    response
        .lines()
        .filter(|line| line.to_lowercase().contains("geofeed"))
        .flat_map(find_urls)
        .map(|url| FetchCandidate {
            ip_range: ip_range.clone(),
            geofeed_url: Some(url.to_string()),
            last_update: Some(now),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(range: &str, geofeed: Option<&str>, remarks: &[&str]) -> AllocationRecord {
        AllocationRecord {
            range: range.to_string(),
            geofeed: geofeed.map(str::to_string),
            remarks: remarks.iter().map(|r| r.to_string()).collect(),
            last_update: Some(Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap()),
        }
    }

    fn candidate(range: &str, url: &str, year: i32) -> FetchCandidate {
        FetchCandidate {
            ip_range: range.to_string(),
            geofeed_url: Some(url.to_string()),
            last_update: Some(Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_records_without_geofeed_reference_are_skipped() {
        let plain = record("192.0.2.0/24", None, &["Abuse contact: abuse@example.net"]);
        assert!(!has_geofeed_reference(&plain));
        assert!(build_candidates(&plain).is_empty());

        let blank = record("192.0.2.0/24", Some("  "), &[]);
        assert!(build_candidates(&blank).is_empty());
    }

    #[test]
    fn test_attribute_wins_over_remark() {
        let rec = record(
            "192.0.2.0/24",
            Some("https://example.net/feed.csv"),
            &["Geofeed https://other.example/remark.csv"],
        );
        let (origin, url) = locate_geofeed(&rec).unwrap();
        assert_eq!(origin, GeofeedOrigin::Attribute);
        assert_eq!(url, "https://example.net/feed.csv");
    }

    #[test]
    fn test_remark_used_when_attribute_has_no_url() {
        let rec = record(
            "192.0.2.0/24",
            Some("see remarks"),
            &["descr", "geofeed: https://example.net/a.csv https://example.net/b.csv"],
        );
        let (origin, url) = locate_geofeed(&rec).unwrap();
        assert_eq!(origin, GeofeedOrigin::Remark);
        assert_eq!(url, "https://example.net/b.csv");
    }

    #[test]
    fn test_last_url_in_geofeed_attribute_wins() {
        let rec = record(
            "192.0.2.0/24",
            Some("https://a.example/1.csv https://b.example/2.csv"),
            &[],
        );
        let (origin, url) = locate_geofeed(&rec).unwrap();
        assert_eq!(origin, GeofeedOrigin::Attribute);
        assert_eq!(url, "https://b.example/2.csv");

        let candidates = build_candidates(&rec);
        assert_eq!(
            candidates[0].geofeed_url.as_deref(),
            Some("https://b.example/2.csv")
        );
    }

    #[test]
    fn test_ipv6_range_expands_into_blocks() {
        let aligned = record(
            "2001:db8:: - 2001:db8:1:ffff:ffff:ffff:ffff:ffff",
            Some("https://example.net/v6.csv"),
            &[],
        );
        let ranges: Vec<String> = build_candidates(&aligned)
            .into_iter()
            .map(|c| c.ip_range)
            .collect();
        assert_eq!(ranges, vec!["2001:db8::/47"]);

        let unaligned = record(
            "2001:db8:: - 2001:db8:2:ffff:ffff:ffff:ffff:ffff",
            Some("https://example.net/v6.csv"),
            &[],
        );
        let ranges: Vec<String> = build_candidates(&unaligned)
            .into_iter()
            .map(|c| c.ip_range)
            .collect();
        assert_eq!(ranges, vec!["2001:db8::/47", "2001:db8:2::/48"]);
    }

    #[test]
    fn test_range_expands_into_one_candidate_per_block() {
        let rec = record(
            "10.0.0.0 - 10.0.2.255",
            None,
            &["Geofeed https://example.net/feed.csv"],
        );
        let candidates = build_candidates(&rec);
        let ranges: Vec<&str> = candidates.iter().map(|c| c.ip_range.as_str()).collect();
        assert_eq!(ranges, vec!["10.0.0.0/23", "10.0.2.0/24"]);
        assert!(candidates
            .iter()
            .all(|c| c.geofeed_url.as_deref() == Some("https://example.net/feed.csv")));
        assert!(candidates.iter().all(|c| c.last_update == rec.last_update));
    }

    #[test]
    fn test_malformed_range_yields_nothing() {
        let rec = record("10.0.0.0 to 10.0.0.255", Some("https://example.net/f.csv"), &[]);
        assert!(build_candidates(&rec).is_empty());
    }

    #[test]
    fn test_geofeed_remark_without_url_keeps_candidate_without_url() {
        let rec = record("192.0.2.0/24", None, &["geofeed coming soon"]);
        let candidates = build_candidates(&rec);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].geofeed_url, None);
    }

    #[test]
    fn test_most_recent_candidate_per_range_is_kept() {
        let older = candidate("192.0.2.0/24", "https://old.example/feed.csv", 2020);
        let newer = candidate("192.0.2.0/24", "https://new.example/feed.csv", 2021);
        let other = candidate("198.51.100.0/24", "https://x.example/feed.csv", 2019);

        let kept = most_recent_per_range(vec![older, other.clone(), newer.clone()]);
        assert_eq!(kept, vec![newer, other]);
    }

    #[test]
    fn test_ties_keep_first_seen_candidate() {
        let first = candidate("192.0.2.0/24", "https://first.example/feed.csv", 2021);
        let second = candidate("192.0.2.0/24", "https://second.example/feed.csv", 2021);

        let kept = most_recent_per_range(vec![first.clone(), second]);
        assert_eq!(kept, vec![first]);
    }

    #[test]
    fn test_candidates_from_whois_answer() {
        let answer = "\
% IANA WHOIS server
refer:        whois.ripe.net

inetnum:        192.0.2.0 - 192.0.3.255
netname:        EXAMPLE-NET
geofeed:        https://Example.net/Geofeed.csv
remarks:        Geofeed https://example.net/second.csv
";
        let prefix: IpNet = "192.0.2.10/32".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();

        let candidates = candidates_from_whois(answer, &prefix, now);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.ip_range == "192.0.2.0/23"));
        assert_eq!(
            candidates[0].geofeed_url.as_deref(),
            Some("https://Example.net/Geofeed.csv")
        );
        assert_eq!(candidates[1].last_update, Some(now));
    }

    #[test]
    fn test_whois_answer_without_range() {
        let prefix: IpNet = "192.0.2.0/24".parse().unwrap();
        assert!(candidates_from_whois("refer: whois.arin.net", &prefix, Utc::now()).is_empty());
    }
}
