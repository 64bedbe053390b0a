// Routes module - destination parsing, kernel backend and the bulk installation engine

pub mod backend;
pub mod classify;
pub mod dispatcher;
pub mod installer;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// A destination network parsed from a route file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    pub network: IpAddr,
    pub prefix_len: u8,
}

impl Destination {
    /// Parse CIDR notation or a bare address.
    ///
    /// Host bits are cleared, so `10.0.0.5/24` yields `10.0.0.0/24`. A bare
    /// address is a host route (/32 for IPv4, /128 for IPv6).
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        let (addr, prefix) = match input.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (input, None),
        };

        let address: IpAddr = addr.parse().ok()?;
        let max_len = max_prefix_len(address);
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|len| *len <= max_len)?,
            None => max_len,
        };

        Some(Destination {
            network: network_address(address, prefix_len),
            prefix_len,
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// One route to program: destination via gateway out of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub destination: Destination,
    pub gateway: IpAddr,
    pub interface_index: u32,
}

/// Gateway and interface resolved once per batch and shared by every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub gateway: IpAddr,
    pub interface: String,
    pub interface_index: u32,
}

impl RouteTarget {
    /// Text written to the duplicate log for a destination that already existed.
    pub fn describe(&self, destination: &str) -> String {
        format!("{} via {} dev {}", destination, self.gateway, self.interface)
    }
}

fn max_prefix_len(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn network_address(addr: IpAddr, prefix_len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - prefix_len)
            };
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - prefix_len)
            };
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr() {
        let dest = Destination::parse("10.0.0.0/24").unwrap();
        assert_eq!(dest.network, "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(dest.prefix_len, 24);
    }

    #[test]
    fn test_parse_clears_host_bits() {
        let dest = Destination::parse("192.168.1.77/16").unwrap();
        assert_eq!(dest.to_string(), "192.168.0.0/16");

        let dest = Destination::parse("2001:db8::1/32").unwrap();
        assert_eq!(dest.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_bare_address_is_host_route() {
        let v4 = Destination::parse("8.8.8.8").unwrap();
        assert_eq!(v4.prefix_len, 32);

        let v6 = Destination::parse("2001:4860:4860::8888").unwrap();
        assert_eq!(v6.prefix_len, 128);
    }

    #[test]
    fn test_parse_edges() {
        assert_eq!(Destination::parse("0.0.0.0/0").unwrap().prefix_len, 0);
        assert_eq!(Destination::parse(" 1.2.3.4 ").unwrap().prefix_len, 32);
        assert_eq!(Destination::parse("::/0").unwrap().prefix_len, 0);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Destination::parse("not-an-ip").is_none());
        assert!(Destination::parse("").is_none());
        assert!(Destination::parse("10.0.0.0/33").is_none());
        assert!(Destination::parse("10.0.0.0/").is_none());
        assert!(Destination::parse("10.0.0.0/abc").is_none());
        assert!(Destination::parse("2001:db8::/129").is_none());
        assert!(Destination::parse("300.1.1.1").is_none());
    }

    #[test]
    fn test_describe_duplicate() {
        let target = RouteTarget {
            gateway: "10.8.0.1".parse().unwrap(),
            interface: "tun0".to_string(),
            interface_index: 7,
        };
        assert_eq!(target.describe("1.1.1.0/24"), "1.1.1.0/24 via 10.8.0.1 dev tun0");
    }
}
