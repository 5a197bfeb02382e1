//! IPv4 CIDR blocks and subnet carving.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::IacError;

/// An IPv4 network in CIDR notation, normalised to its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// `224.0.0.0/4`, the IPv4 multicast range.
    pub const MULTICAST: Ipv4Cidr = Ipv4Cidr {
        network: Ipv4Addr::new(224, 0, 0, 0),
        prefix: 4,
    };

    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self, IacError> {
        if prefix > 32 {
            return Err(IacError::InvalidCidr(format!("{}/{}", address, prefix)));
        }
        let network = Ipv4Addr::from(u32::from(address) & Self::mask(prefix));
        Ok(Self { network, prefix })
    }

    /// `0.0.0.0/0`
    pub fn any() -> Self {
        Self {
            network: Ipv4Addr::UNSPECIFIED,
            prefix: 0,
        }
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        u32::from(address) & Self::mask(self.prefix) == u32::from(self.network)
    }

    /// Whether `other` lies entirely inside this block.
    pub fn covers(&self, other: &Ipv4Cidr) -> bool {
        other.prefix >= self.prefix && self.contains(other.network)
    }

    /// Carve `count` consecutive blocks of length `prefix`, starting at the
    /// network address. Returns `None` if they do not fit.
    pub fn subdivide(&self, prefix: u8, count: usize) -> Option<Vec<Ipv4Cidr>> {
        if prefix < self.prefix || prefix > 32 {
            return None;
        }
        let step = 1u64 << (32 - u32::from(prefix));
        if step.checked_mul(count as u64)? > self.size() {
            return None;
        }

        let base = u64::from(u32::from(self.network));
        (0..count as u64)
            .map(|i| {
                let start = u32::try_from(base + i * step).ok()?;
                Some(Ipv4Cidr {
                    network: Ipv4Addr::from(start),
                    prefix,
                })
            })
            .collect()
    }
}

impl FromStr for Ipv4Cidr {
    type Err = IacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IacError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let address = Ipv4Addr::from_str(addr).map_err(|_| invalid())?;
        let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
        Self::new(address, prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_normalise() {
        let cidr: Ipv4Cidr = "10.10.3.7/16".parse().unwrap();
        assert_eq!(cidr.to_string(), "10.10.0.0/16");
        assert_eq!(cidr.size(), 65536);

        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("300.0.0.0/8".parse::<Ipv4Cidr>().is_err());
        assert_eq!(Ipv4Cidr::any().to_string(), "0.0.0.0/0");
    }

    #[test]
    fn test_subdivide_sequential() {
        let vpc: Ipv4Cidr = "10.10.0.0/16".parse().unwrap();
        let subnets = vpc.subdivide(24, 4).unwrap();
        let rendered: Vec<String> = subnets.iter().map(|s| s.to_string()).collect();
        assert_eq!(rendered, ["10.10.0.0/24", "10.10.1.0/24", "10.10.2.0/24", "10.10.3.0/24"]);
        assert!(subnets.iter().all(|s| vpc.covers(s)));
    }

    #[test]
    fn test_subdivide_exhausted() {
        let small: Ipv4Cidr = "192.168.0.0/23".parse().unwrap();
        assert!(small.subdivide(24, 2).is_some());
        assert!(small.subdivide(24, 3).is_none());
        assert!(small.subdivide(22, 1).is_none());
    }

    #[test]
    fn test_multicast_range_contains() {
        let multicast: Ipv4Cidr = "224.0.0.0/4".parse().unwrap();
        assert!(multicast.contains(Ipv4Addr::new(224, 0, 0, 1)));
        assert!(multicast.contains(Ipv4Addr::new(239, 255, 255, 255)));
        assert!(!multicast.contains(Ipv4Addr::new(10, 10, 0, 1)));
    }
}
