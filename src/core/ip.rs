//! Prefix arithmetic shared by the candidate builder, the row validator and
//! the priority resolver.

use crate::domain::model::AddressFamily;
use ipnet::{IpNet, Ipv4Subnets, Ipv6Subnets};
use std::net::IpAddr;

/// Parses `addr/len` or a bare address (treated as a host prefix).
pub fn parse_prefix(input: &str) -> Option<IpNet> {
    let input = input.trim();
    if input.contains('/') {
        input.parse::<IpNet>().ok()
    } else {
        input.parse::<IpAddr>().ok().map(IpNet::from)
    }
}

/// Splits an inclusive address range into the minimal list of CIDR blocks.
pub fn range_to_cidrs(start: &str, end: &str) -> Option<Vec<IpNet>> {
    match (start.trim().parse::<IpAddr>().ok()?, end.trim().parse::<IpAddr>().ok()?) {
        (IpAddr::V4(start), IpAddr::V4(end)) if start <= end => {
            Some(Ipv4Subnets::new(start, end, 0).map(IpNet::V4).collect())
        }
        (IpAddr::V6(start), IpAddr::V6(end)) if start <= end => {
            Some(Ipv6Subnets::new(start, end, 0).map(IpNet::V6).collect())
        }
        _ => None,
    }
}

/// Parses a `start - end` range string.
pub fn split_range(range: &str) -> Option<Vec<IpNet>> {
    let (start, end) = range.split_once('-')?;
    range_to_cidrs(start, end)
}

pub fn address_family(net: &IpNet) -> AddressFamily {
    match net {
        IpNet::V4(_) => AddressFamily::V4,
        IpNet::V6(_) => AddressFamily::V6,
    }
}

fn address_width(family: AddressFamily) -> u8 {
    match family {
        AddressFamily::V4 => 32,
        AddressFamily::V6 => 128,
    }
}

/// Network address with host bits cleared, as an integer.
pub fn network_bits(net: &IpNet) -> u128 {
    match net.trunc() {
        IpNet::V4(v4) => u32::from(v4.network()) as u128,
        IpNet::V6(v6) => u128::from(v6.network()),
    }
}

pub fn is_equal_prefix(a: &IpNet, b: &IpNet) -> bool {
    a.trunc() == b.trunc()
}

/// True when `inner` lies within `outer` (equal prefixes included).
pub fn is_subnet(inner: &IpNet, outer: &IpNet) -> bool {
    outer.trunc().contains(&inner.trunc())
}

/// Containment test on precomputed masked networks of the same family.
pub fn is_subnet_binary(
    family: AddressFamily,
    inner_bits: u128,
    inner_len: u8,
    outer_bits: u128,
    outer_len: u8,
) -> bool {
    if inner_len < outer_len {
        return false;
    }
    let shift = u32::from(address_width(family) - outer_len);
    if shift >= 128 {
        return true;
    }
    (inner_bits >> shift) == (outer_bits >> shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_prefix_accepts_bare_addresses() {
        assert_eq!(parse_prefix("192.0.2.1"), Some(net("192.0.2.1/32")));
        assert_eq!(parse_prefix(" 2001:db8::/32 "), Some(net("2001:db8::/32")));
        assert_eq!(parse_prefix("2001:db8::1"), Some(net("2001:db8::1/128")));
        assert_eq!(parse_prefix("not-a-prefix"), None);
    }

    #[test]
    fn test_split_range_into_cidrs() {
        assert_eq!(
            split_range("192.0.2.0 - 192.0.2.255"),
            Some(vec![net("192.0.2.0/24")])
        );
        assert_eq!(
            split_range("10.0.0.0 - 10.0.2.255"),
            Some(vec![net("10.0.0.0/23"), net("10.0.2.0/24")])
        );
        assert_eq!(split_range("10.0.2.0 - 10.0.0.0"), None);
        assert_eq!(split_range("10.0.0.0 - 2001:db8::"), None);
        assert_eq!(split_range("garbage"), None);
    }

    #[test]
    fn test_subnet_checks() {
        assert!(is_subnet(&net("10.1.0.0/16"), &net("10.0.0.0/8")));
        assert!(is_subnet(&net("10.0.0.0/8"), &net("10.0.0.0/8")));
        assert!(!is_subnet(&net("10.0.0.0/8"), &net("10.1.0.0/16")));
        assert!(!is_subnet(&net("2001:db8::/48"), &net("10.0.0.0/8")));
        assert!(is_equal_prefix(&net("10.0.0.1/8"), &net("10.0.0.0/8")));
    }

    #[test]
    fn test_subnet_binary_matches_prefix_containment() {
        let outer = net("10.0.0.0/8");
        let inner = net("10.1.0.0/16");
        let other = net("11.0.0.0/16");
        let v4 = AddressFamily::V4;

        assert!(is_subnet_binary(v4, network_bits(&inner), 16, network_bits(&outer), 8));
        assert!(!is_subnet_binary(v4, network_bits(&outer), 8, network_bits(&inner), 16));
        assert!(!is_subnet_binary(v4, network_bits(&other), 16, network_bits(&outer), 8));
        assert!(is_subnet_binary(v4, network_bits(&other), 16, 0, 0));
    }
}
