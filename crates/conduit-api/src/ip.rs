// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::ConduitError;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub use core::net::IpAddr;
pub use core::net::Ipv4Addr;
pub use core::net::Ipv6Addr;

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum Protocol {
    ICMP,
    TCP,
    UDP,
    ICMPv6,
    #[serde(untagged)]
    Unknown(u8),
}

pub const PROTO_ICMP: u8 = 0x1;
pub const PROTO_TCP: u8 = 0x6;
pub const PROTO_UDP: u8 = 0x11;
pub const PROTO_ICMPV6: u8 = 0x3A;

impl Default for Protocol {
    fn default() -> Self {
        Self::Unknown(255)
    }
}

impl Protocol {
    /// Does this protocol carry source and destination ports?
    pub fn has_ports(&self) -> bool {
        matches!(self, Self::TCP | Self::UDP)
    }

    pub fn is_icmp(&self) -> bool {
        matches!(self, Self::ICMP | Self::ICMPv6)
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ICMP => write!(f, "ICMP"),
            Self::TCP => write!(f, "TCP"),
            Self::UDP => write!(f, "UDP"),
            Self::ICMPv6 => write!(f, "ICMPv6"),
            Self::Unknown(p) => write!(f, "PROTO-{p}"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icmp" => Ok(Self::ICMP),
            "tcp" => Ok(Self::TCP),
            "udp" => Ok(Self::UDP),
            "icmpv6" | "icmp6" => Ok(Self::ICMPv6),
            other => other
                .parse::<u8>()
                .map(Self::from)
                .map_err(|_| ConduitError::InvalidProtocol(s.to_string())),
        }
    }
}

impl From<u8> for Protocol {
    fn from(proto: u8) -> Self {
        match proto {
            PROTO_ICMP => Self::ICMP,
            PROTO_TCP => Self::TCP,
            PROTO_UDP => Self::UDP,
            PROTO_ICMPV6 => Self::ICMPv6,
            _ => Self::Unknown(proto),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::ICMP => PROTO_ICMP,
            Protocol::TCP => PROTO_TCP,
            Protocol::UDP => PROTO_UDP,
            Protocol::ICMPv6 => PROTO_ICMPV6,
            Protocol::Unknown(v) => v,
        }
    }
}

/// An IPv4 prefix.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Ipv4Cidr {
    ip: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Create a new prefix, masking off any host bits in `ip`.
    pub fn new_checked(ip: Ipv4Addr, prefix_len: u8) -> Result<Self, ConduitError> {
        if prefix_len > 32 {
            return Err(ConduitError::InvalidCidr(format!("{ip}/{prefix_len}")));
        }

        let ip = Ipv4Addr::from(u32::from(ip) & Self::mask(prefix_len));
        Ok(Self { ip, prefix_len })
    }

    fn mask(prefix_len: u8) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0)
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_member(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask(self.prefix_len) == u32::from(self.ip)
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

/// An IPv6 prefix.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Ipv6Cidr {
    ip: Ipv6Addr,
    prefix_len: u8,
}

impl Ipv6Cidr {
    /// Create a new prefix, masking off any host bits in `ip`.
    pub fn new_checked(ip: Ipv6Addr, prefix_len: u8) -> Result<Self, ConduitError> {
        if prefix_len > 128 {
            return Err(ConduitError::InvalidCidr(format!("{ip}/{prefix_len}")));
        }

        let ip = Ipv6Addr::from(u128::from(ip) & Self::mask(prefix_len));
        Ok(Self { ip, prefix_len })
    }

    fn mask(prefix_len: u8) -> u128 {
        u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0)
    }

    pub fn ip(&self) -> Ipv6Addr {
        self.ip
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_member(&self, ip: Ipv6Addr) -> bool {
        u128::from(ip) & Self::mask(self.prefix_len) == u128::from(self.ip)
    }
}

impl Display for Ipv6Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

/// An IPv4 or IPv6 prefix.
///
/// Serialized as its textual form, e.g. `"10.0.0.0/8"`. A bare
/// address parses as a host prefix.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum IpCidr {
    Ip4(Ipv4Cidr),
    Ip6(Ipv6Cidr),
}

impl IpCidr {
    pub fn is_member(&self, ip: IpAddr) -> bool {
        match (self, ip) {
            (Self::Ip4(cidr), IpAddr::V4(ip)) => cidr.is_member(ip),
            (Self::Ip6(cidr), IpAddr::V6(ip)) => cidr.is_member(ip),
            _ => false,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        match self {
            Self::Ip4(cidr) => cidr.prefix_len(),
            Self::Ip6(cidr) => cidr.prefix_len(),
        }
    }

    /// The prefix covering exactly `ip`.
    pub fn host(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => Self::Ip4(Ipv4Cidr { ip, prefix_len: 32 }),
            IpAddr::V6(ip) => Self::Ip6(Ipv6Cidr { ip, prefix_len: 128 }),
        }
    }
}

impl Display for IpCidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ip4(cidr) => write!(f, "{cidr}"),
            Self::Ip6(cidr) => write!(f, "{cidr}"),
        }
    }
}

impl FromStr for IpCidr {
    type Err = ConduitError;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        let bad = || ConduitError::InvalidCidr(val.to_string());

        let (ip_s, prefix_s) = match val.split_once('/') {
            Some((ip, prefix)) => (ip, Some(prefix)),
            None => (val, None),
        };

        let ip = ip_s.parse::<IpAddr>().map_err(|_| bad())?;
        let prefix_len = match prefix_s {
            Some(s) => s.parse::<u8>().map_err(|_| bad())?,
            None => match ip {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            },
        };

        match ip {
            IpAddr::V4(ip) => Ipv4Cidr::new_checked(ip, prefix_len).map(Self::Ip4),
            IpAddr::V6(ip) => Ipv6Cidr::new_checked(ip, prefix_len).map(Self::Ip6),
        }
    }
}

impl TryFrom<String> for IpCidr {
    type Error = ConduitError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpCidr> for String {
    fn from(cidr: IpCidr) -> String {
        cidr.to_string()
    }
}

/// An inclusive range of ports, written either as a single port
/// (`"443"`) or as `"start-end"`.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ConduitError> {
        if start > end {
            return Err(ConduitError::InvalidPortRange(format!("{start}-{end}")));
        }

        Ok(Self { start, end })
    }

    pub const fn single(port: u16) -> Self {
        Self { start: port, end: port }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

impl Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PortRange {
    type Err = ConduitError;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        let bad = || ConduitError::InvalidPortRange(val.to_string());

        match val.split_once('-') {
            Some((start, end)) => {
                let start = start.trim().parse::<u16>().map_err(|_| bad())?;
                let end = end.trim().parse::<u16>().map_err(|_| bad())?;
                Self::new(start, end)
            }

            None => val.trim().parse::<u16>().map(Self::single).map_err(|_| bad()),
        }
    }
}

impl TryFrom<String> for PortRange {
    type Error = ConduitError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PortRange> for String {
    fn from(range: PortRange) -> String {
        range.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cidr_membership() {
        let cidr: IpCidr = "10.0.0.0/8".parse().unwrap();
        assert!(cidr.is_member("10.1.2.3".parse().unwrap()));
        assert!(!cidr.is_member("11.0.0.1".parse().unwrap()));
        assert!(!cidr.is_member("fd00::1".parse().unwrap()));

        let all: IpCidr = "0.0.0.0/0".parse().unwrap();
        assert!(all.is_member("192.168.7.7".parse().unwrap()));

        let v6: IpCidr = "fd00:1::/32".parse().unwrap();
        assert!(v6.is_member("fd00:1:2::9".parse().unwrap()));
        assert!(!v6.is_member("fd00:2::9".parse().unwrap()));
    }

    #[test]
    fn cidr_masks_host_bits() {
        let cidr: IpCidr = "10.1.2.3/16".parse().unwrap();
        assert_eq!(cidr.to_string(), "10.1.0.0/16");

        let host: IpCidr = "10.1.2.3".parse().unwrap();
        assert_eq!(host.prefix_len(), 32);
        assert!("10.0.0.0/33".parse::<IpCidr>().is_err());
        assert!("fd00::/129".parse::<IpCidr>().is_err());
    }

    #[test]
    fn port_ranges() {
        let r: PortRange = "8000-8080".parse().unwrap();
        assert!(r.contains(8000));
        assert!(r.contains(8080));
        assert!(!r.contains(8081));
        assert_eq!("22".parse::<PortRange>().unwrap(), PortRange::single(22));
        assert!("90-80".parse::<PortRange>().is_err());
        assert!("http".parse::<PortRange>().is_err());
    }

    #[test]
    fn protocol_names() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::TCP);
        assert_eq!("132".parse::<Protocol>().unwrap(), Protocol::Unknown(132));
        assert_eq!(u8::from(Protocol::from(17)), 17);
    }
}
