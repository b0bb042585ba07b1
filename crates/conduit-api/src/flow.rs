// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::ConduitError;
use crate::IpAddr;
use crate::Protocol;
use core::fmt;
use core::fmt::Display;
use core::net::SocketAddr;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// An address and port pair.
///
/// Serialized as `"10.0.0.1:80"` or `"[fd00::1]:80"`.
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
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", SocketAddr::new(self.ip, self.port))
    }
}

impl FromStr for Endpoint {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>()
            .map(Self::from)
            .map_err(|_| ConduitError::InvalidEndpoint(s.to_string()))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(sa: SocketAddr) -> Self {
        Self { ip: sa.ip(), port: sa.port() }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(ep: Endpoint) -> Self {
        SocketAddr::new(ep.ip, ep.port)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ConduitError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(ep: Endpoint) -> String {
        ep.to_string()
    }
}

/// The 5-tuple identifying one direction of a connection.
///
/// For ICMP echo traffic the echo identifier stands in for both
/// ports, so that a request and its reply produce mirrored keys.
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
pub struct FlowKey {
    pub proto: Protocol,
    pub src: IpAddr,
    pub src_port: u16,
    pub dst: IpAddr,
    pub dst_port: u16,
}

impl FlowKey {
    pub fn new(proto: Protocol, src: Endpoint, dst: Endpoint) -> Self {
        Self {
            proto,
            src: src.ip,
            src_port: src.port,
            dst: dst.ip,
            dst_port: dst.port,
        }
    }

    /// The key of traffic flowing the opposite way.
    pub fn reversed(&self) -> Self {
        Self {
            proto: self.proto,
            src: self.dst,
            src_port: self.dst_port,
            dst: self.src,
            dst_port: self.src_port,
        }
    }

    pub fn src_endpoint(&self) -> Endpoint {
        Endpoint::new(self.src, self.src_port)
    }

    pub fn dst_endpoint(&self) -> Endpoint {
        Endpoint::new(self.dst, self.dst_port)
    }

    pub fn with_src(&self, src: Endpoint) -> Self {
        Self { src: src.ip, src_port: src.port, ..*self }
    }

    pub fn with_dst(&self, dst: Endpoint) -> Self {
        Self { dst: dst.ip, dst_port: dst.port, ..*self }
    }

    pub fn is_ipv6(&self) -> bool {
        self.src.is_ipv6()
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.proto, self.src, self.src_port, self.dst, self.dst_port,
        )
    }
}
