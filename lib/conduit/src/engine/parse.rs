// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Header parsing.
//!
//! [`parse`] validates the Ethernet, IP, and transport headers of a
//! frame and produces a [`PacketMeta`]: the flow key plus the offsets
//! the rewrite stage needs. Every header is read through a zerocopy
//! view of a bounds-checked subslice, so no read can go past the end
//! of the buffer.
//!
//! [`peek`] is the cheap variant used by the fast path. It only pulls
//! out the source address, protocol, and destination port, and
//! validates nothing beyond the bounds of the reads themselves.

use super::ether::ETHER_TYPE_IPV4;
use super::ether::ETHER_TYPE_IPV6;
use super::ether::ETHER_TYPE_VLAN;
use super::ether::EtherHdrRaw;
use super::ether::VlanTagRaw;
use super::icmp::IcmpEchoRaw;
use super::ip4::IPV4_VERSION;
use super::ip4::Ipv4HdrRaw;
use super::ip6::IPV6_EXT_HEADERS;
use super::ip6::IPV6_VERSION;
use super::ip6::Ipv6HdrRaw;
use super::tcp::TcpFlags;
use super::tcp::TcpHdrRaw;
use super::udp::UdpHdrRaw;
use conduit_api::FlowKey;
use conduit_api::IpAddr;
use conduit_api::PROTO_ICMP;
use conduit_api::PROTO_ICMPV6;
use conduit_api::PROTO_TCP;
use conduit_api::PROTO_UDP;
use conduit_api::Protocol;
use core::fmt;
use core::fmt::Display;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layer {
    Ether,
    Vlan,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Icmp,
}

impl Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Ether => "Ethernet",
            Self::Vlan => "802.1Q",
            Self::Ipv4 => "IPv4",
            Self::Ipv6 => "IPv6",
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Icmp => "ICMP",
        };
        write!(f, "{s}")
    }
}

/// Traffic that parses fine but that the dataplane does not track.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Unsupported {
    EtherType(u16),
    IpProto(u8),
    /// A non-initial IPv4 fragment, which carries no L4 header.
    Fragment,
    Ipv6ExtHeader(u8),
}

impl Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EtherType(et) => write!(f, "ether type 0x{et:04x}"),
            Self::IpProto(p) => write!(f, "IP protocol {p}"),
            Self::Fragment => write!(f, "non-initial fragment"),
            Self::Ipv6ExtHeader(nh) => write!(f, "IPv6 extension header {nh}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("truncated {layer} header")]
    Truncated { layer: Layer },

    #[error("malformed {layer} header: {msg}")]
    Malformed { layer: Layer, msg: &'static str },

    #[error("unsupported: {0}")]
    Unsupported(Unsupported),
}

impl ParseError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// The parsed view of a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PacketMeta {
    pub flow: FlowKey,
    pub l3_offset: usize,
    pub l4_offset: usize,
    /// Length of the IP datagram, header included.
    pub ip_len: usize,
    pub tcp_flags: Option<TcpFlags>,
}

impl PacketMeta {
    pub fn is_ipv6(&self) -> bool {
        self.flow.is_ipv6()
    }
}

fn hdr_at<T>(pkt: &[u8], off: usize, layer: Layer) -> Result<&T, ParseError>
where
    T: FromBytes + KnownLayout + Immutable,
{
    pkt.get(off..)
        .and_then(|bytes| T::ref_from_prefix(bytes).ok())
        .map(|(hdr, _)| hdr)
        .ok_or(ParseError::Truncated { layer })
}

fn malformed(layer: Layer, msg: &'static str) -> ParseError {
    ParseError::Malformed { layer, msg }
}

/// Find the L3 offset and ether type, stepping over one VLAN tag.
fn l2(pkt: &[u8]) -> Result<(usize, u16), ParseError> {
    let eth = hdr_at::<EtherHdrRaw>(pkt, 0, Layer::Ether)?;
    match eth.ether_type() {
        ETHER_TYPE_VLAN => {
            let tag = hdr_at::<VlanTagRaw>(pkt, EtherHdrRaw::SIZE, Layer::Vlan)?;
            Ok((EtherHdrRaw::SIZE + VlanTagRaw::SIZE, tag.ether_type()))
        }

        et => Ok((EtherHdrRaw::SIZE, et)),
    }
}

/// Parse the headers of the Ethernet frame in `pkt`.
pub fn parse(pkt: &[u8]) -> Result<PacketMeta, ParseError> {
    let (l3_offset, ether_type) = l2(pkt)?;

    match ether_type {
        ETHER_TYPE_IPV4 => parse_ip4(pkt, l3_offset),
        ETHER_TYPE_IPV6 => parse_ip6(pkt, l3_offset),
        et => Err(ParseError::Unsupported(Unsupported::EtherType(et))),
    }
}

fn parse_ip4(pkt: &[u8], l3_offset: usize) -> Result<PacketMeta, ParseError> {
    let ip = hdr_at::<Ipv4HdrRaw>(pkt, l3_offset, Layer::Ipv4)?;

    if ip.version() != IPV4_VERSION {
        return Err(malformed(Layer::Ipv4, "bad version"));
    }

    let hdr_len = ip.hdr_len();
    if hdr_len < Ipv4HdrRaw::SIZE {
        return Err(malformed(Layer::Ipv4, "header length below minimum"));
    }

    let ip_len = ip.total_len();
    if ip_len < hdr_len {
        return Err(malformed(Layer::Ipv4, "total length shorter than header"));
    }

    if l3_offset + ip_len > pkt.len() {
        return Err(ParseError::Truncated { layer: Layer::Ipv4 });
    }

    if ip.frag_offset() != 0 {
        return Err(ParseError::Unsupported(Unsupported::Fragment));
    }

    let l4 = L4Window {
        // Trailing link-layer padding is not part of the datagram.
        bytes: &pkt[..l3_offset + ip_len],
        offset: l3_offset + hdr_len,
    };
    let (proto, ports, tcp_flags) = match ip.proto {
        PROTO_TCP => l4.tcp()?,
        PROTO_UDP => l4.udp()?,
        PROTO_ICMP => l4.icmp(false)?,
        p => return Err(ParseError::Unsupported(Unsupported::IpProto(p))),
    };

    Ok(PacketMeta {
        flow: FlowKey {
            proto,
            src: IpAddr::V4(ip.src()),
            src_port: ports.0,
            dst: IpAddr::V4(ip.dst()),
            dst_port: ports.1,
        },
        l3_offset,
        l4_offset: l4.offset,
        ip_len,
        tcp_flags,
    })
}

fn parse_ip6(pkt: &[u8], l3_offset: usize) -> Result<PacketMeta, ParseError> {
    let ip = hdr_at::<Ipv6HdrRaw>(pkt, l3_offset, Layer::Ipv6)?;

    if ip.version() != IPV6_VERSION {
        return Err(malformed(Layer::Ipv6, "bad version"));
    }

    let ip_len = Ipv6HdrRaw::SIZE + ip.payload_len();
    if l3_offset + ip_len > pkt.len() {
        return Err(ParseError::Truncated { layer: Layer::Ipv6 });
    }

    if IPV6_EXT_HEADERS.contains(&ip.next_hdr) {
        return Err(ParseError::Unsupported(Unsupported::Ipv6ExtHeader(
            ip.next_hdr,
        )));
    }

    let l4 = L4Window {
        bytes: &pkt[..l3_offset + ip_len],
        offset: l3_offset + Ipv6HdrRaw::SIZE,
    };
    let (proto, ports, tcp_flags) = match ip.next_hdr {
        PROTO_TCP => l4.tcp()?,
        PROTO_UDP => l4.udp()?,
        PROTO_ICMPV6 => l4.icmp(true)?,
        p => return Err(ParseError::Unsupported(Unsupported::IpProto(p))),
    };

    Ok(PacketMeta {
        flow: FlowKey {
            proto,
            src: IpAddr::V6(ip.src()),
            src_port: ports.0,
            dst: IpAddr::V6(ip.dst()),
            dst_port: ports.1,
        },
        l3_offset,
        l4_offset: l4.offset,
        ip_len,
        tcp_flags,
    })
}

type L4Parsed = (Protocol, (u16, u16), Option<TcpFlags>);

/// The transport header and payload, bounded by the IP length.
struct L4Window<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl L4Window<'_> {
    fn avail(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn tcp(&self) -> Result<L4Parsed, ParseError> {
        let tcp = hdr_at::<TcpHdrRaw>(self.bytes, self.offset, Layer::Tcp)?;
        let hdr_len = tcp.hdr_len();
        if hdr_len < TcpHdrRaw::SIZE {
            return Err(malformed(Layer::Tcp, "data offset below minimum"));
        }

        if hdr_len > self.avail() {
            return Err(ParseError::Truncated { layer: Layer::Tcp });
        }

        Ok((Protocol::TCP, (tcp.src_port(), tcp.dst_port()), Some(tcp.flags())))
    }

    fn udp(&self) -> Result<L4Parsed, ParseError> {
        let udp = hdr_at::<UdpHdrRaw>(self.bytes, self.offset, Layer::Udp)?;
        let len = udp.length();
        if len < UdpHdrRaw::SIZE {
            return Err(malformed(Layer::Udp, "length below minimum"));
        }

        if len > self.avail() {
            return Err(ParseError::Truncated { layer: Layer::Udp });
        }

        Ok((Protocol::UDP, (udp.src_port(), udp.dst_port()), None))
    }

    fn icmp(&self, v6: bool) -> Result<L4Parsed, ParseError> {
        let icmp = hdr_at::<IcmpEchoRaw>(self.bytes, self.offset, Layer::Icmp)?;
        let proto = if v6 { Protocol::ICMPv6 } else { Protocol::ICMP };

        // The echo identifier names the conversation; everything
        // else is keyed on addresses alone.
        let id = if icmp.is_echo(v6) { icmp.ident() } else { 0 };
        Ok((proto, (id, id), None))
    }
}

/// The few fields the fast path looks at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Peek {
    pub src: IpAddr,
    pub proto: u8,
    pub dst_port: Option<u16>,
}

/// Pull the source address, protocol, and destination port out of
/// `pkt` without validating it.
pub fn peek(pkt: &[u8]) -> Option<Peek> {
    let (l3_offset, ether_type) = l2(pkt).ok()?;

    let (src, proto, l4_offset) = match ether_type {
        ETHER_TYPE_IPV4 => {
            let ip = hdr_at::<Ipv4HdrRaw>(pkt, l3_offset, Layer::Ipv4).ok()?;
            let l4 = (ip.frag_offset() == 0).then(|| l3_offset + ip.hdr_len());
            (IpAddr::V4(ip.src()), ip.proto, l4)
        }

        ETHER_TYPE_IPV6 => {
            let ip = hdr_at::<Ipv6HdrRaw>(pkt, l3_offset, Layer::Ipv6).ok()?;
            (IpAddr::V6(ip.src()), ip.next_hdr, Some(l3_offset + Ipv6HdrRaw::SIZE))
        }

        _ => return None,
    };

    let dst_port = match (proto, l4_offset) {
        (PROTO_TCP, Some(off)) => hdr_at::<TcpHdrRaw>(pkt, off, Layer::Tcp)
            .ok()
            .map(|tcp| tcp.dst_port()),
        (PROTO_UDP, Some(off)) => hdr_at::<UdpHdrRaw>(pkt, off, Layer::Udp)
            .ok()
            .map(|udp| udp.dst_port()),
        _ => None,
    };

    Some(Peek { src, proto, dst_port })
}
