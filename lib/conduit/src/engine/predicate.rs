// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Predicates used for rule matching.

use conduit_api::FlowKey;
use conduit_api::IpAddr;
use conduit_api::IpCidr;
use conduit_api::PortRange;
use conduit_api::Protocol;
use core::fmt;
use core::fmt::Display;
use core::ops::RangeInclusive;
use itertools::Itertools;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IpAddrMatch {
    Exact(IpAddr),
    Prefix(IpCidr),
}

impl IpAddrMatch {
    pub fn is_match(&self, ip: IpAddr) -> bool {
        match self {
            Self::Exact(addr) => *addr == ip,
            Self::Prefix(cidr) => cidr.is_member(ip),
        }
    }
}

impl From<IpCidr> for IpAddrMatch {
    fn from(cidr: IpCidr) -> Self {
        Self::Prefix(cidr)
    }
}

impl Display for IpAddrMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exact(ip) => write!(f, "{ip}"),
            Self::Prefix(cidr) => write!(f, "{cidr}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IpProtoMatch {
    Exact(Protocol),
}

impl Display for IpProtoMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exact(proto) => write!(f, "{proto}"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Match<T> {
    Exact(T),
    Range(RangeInclusive<T>),
}

impl<T> Match<T>
where
    T: PartialEq + PartialOrd,
{
    pub fn is_match(&self, val: &T) -> bool {
        match self {
            Self::Exact(target) => val == target,
            Self::Range(range) => range.contains(val),
        }
    }
}

impl<T: Display> Display for Match<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(target) => write!(f, "{target}"),
            Self::Range(range) => write!(f, "{}-{}", range.start(), range.end()),
        }
    }
}

impl<T> From<T> for Match<T> {
    fn from(value: T) -> Self {
        Match::Exact(value)
    }
}

impl<T> From<RangeInclusive<T>> for Match<T> {
    fn from(value: RangeInclusive<T>) -> Self {
        Match::Range(value)
    }
}

impl From<PortRange> for Match<u16> {
    fn from(r: PortRange) -> Self {
        if r.start() == r.end() {
            Match::Exact(r.start())
        } else {
            Match::Range(r.start()..=r.end())
        }
    }
}

/// A test against a flow key. Each variant holds a list of values
/// which match if any one of them does.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Predicate {
    IpProto(Vec<IpProtoMatch>),
    SrcIp(Vec<IpAddrMatch>),
    DstIp(Vec<IpAddrMatch>),
    /// Never matches a flow without ports.
    SrcPort(Vec<Match<u16>>),
    /// Never matches a flow without ports.
    DstPort(Vec<Match<u16>>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn is_match(&self, flow: &FlowKey) -> bool {
        match self {
            Self::IpProto(list) => list.iter().any(|m| match m {
                IpProtoMatch::Exact(p) => *p == flow.proto,
            }),
            Self::SrcIp(list) => list.iter().any(|m| m.is_match(flow.src)),
            Self::DstIp(list) => list.iter().any(|m| m.is_match(flow.dst)),
            Self::SrcPort(list) => {
                flow.proto.has_ports()
                    && list.iter().any(|m| m.is_match(&flow.src_port))
            }
            Self::DstPort(list) => {
                flow.proto.has_ports()
                    && list.iter().any(|m| m.is_match(&flow.dst_port))
            }
            Self::Not(pred) => !pred.is_match(flow),
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IpProto(list) => write!(f, "proto={}", list.iter().join(",")),
            Self::SrcIp(list) => write!(f, "src={}", list.iter().join(",")),
            Self::DstIp(list) => write!(f, "dst={}", list.iter().join(",")),
            Self::SrcPort(list) => write!(f, "sport={}", list.iter().join(",")),
            Self::DstPort(list) => write!(f, "dport={}", list.iter().join(",")),
            Self::Not(pred) => write!(f, "!{pred}"),
        }
    }
}
