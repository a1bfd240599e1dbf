//! Client IP extraction and IP-range / CIDR matching used by the
//! `authorized_iprange` / `blacklist_iprange` predicates.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

/// Extracts the client IP from an HTTP "remote address" string of the form
/// `host:port` (`1.2.3.4:54321`) or `[ipv6]:port` (`[::1]:54321`).
///
/// An unparseable address is treated as the zero address, per spec: it
/// fails every CIDR/equality predicate rather than panicking or being
/// skipped.
pub fn client_ip(remote_addr: &str) -> IpAddr {
    parse_remote_addr(remote_addr).unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

fn parse_remote_addr(remote_addr: &str) -> Option<IpAddr> {
    let idx = remote_addr.rfind(':')?;
    let (host, _port) = remote_addr.split_at(idx);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    IpAddr::from_str(host).ok()
}

/// One entry of an `authorized_iprange` / `blacklist_iprange` list: either a
/// bare IP (equality match) or a CIDR range (containment match).
#[derive(Debug, Clone)]
pub enum IpRangeEntry {
    Single(IpAddr),
    Range(IpNet),
}

impl IpRangeEntry {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            IpRangeEntry::Single(single) => single == ip,
            IpRangeEntry::Range(net) => net.contains(ip),
        }
    }
}

impl FromStr for IpRangeEntry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            IpNet::from_str(s)
                .map(IpRangeEntry::Range)
                .map_err(|e| e.to_string())
        } else {
            IpAddr::from_str(s)
                .map(IpRangeEntry::Single)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_remote_addr() {
        assert_eq!(client_ip("1.2.3.4:54321").to_string(), "1.2.3.4");
    }

    #[test]
    fn parses_ipv6_remote_addr_with_brackets() {
        assert_eq!(client_ip("[::1]:54321").to_string(), "::1");
    }

    #[test]
    fn unparseable_remote_addr_is_zero_address() {
        assert_eq!(client_ip("not-an-address").to_string(), "0.0.0.0");
    }

    #[test]
    fn single_entry_matches_equality_only() {
        let e: IpRangeEntry = "10.0.0.5".parse().unwrap();
        assert!(e.contains(&"10.0.0.5".parse().unwrap()));
        assert!(!e.contains(&"10.0.0.6".parse().unwrap()));
    }

    #[test]
    fn cidr_entry_matches_containment() {
        let e: IpRangeEntry = "10.0.0.0/24".parse().unwrap();
        assert!(e.contains(&"10.0.0.200".parse().unwrap()));
        assert!(!e.contains(&"10.0.1.1".parse().unwrap()));
    }

    #[test]
    fn malformed_entry_fails_to_parse() {
        assert!("not a cidr/".parse::<IpRangeEntry>().is_err());
    }
}
