// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Apply a [`NatRewrite`] to the bytes of a packet.
//!
//! Addresses and ports are replaced in place and every checksum that
//! covers them is patched incrementally: the IPv4 header checksum,
//! and the TCP, UDP, or ICMPv6 checksum through its pseudo-header.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use super::checksum::update;
use super::icmp::IcmpEchoRaw;
use super::ip4::Ipv4HdrRaw;
use super::ip6::Ipv6HdrRaw;
use super::nat::NatField;
use super::nat::NatRewrite;
use super::parse::Layer;
use super::parse::PacketMeta;
use super::tcp::TcpHdrRaw;
use super::udp::UdpHdrRaw;
use conduit_api::IpAddr;
use conduit_api::Protocol;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RewriteError {
    #[error("{layer} header not found at expected offset")]
    Truncated { layer: Layer },

    #[error("cannot rewrite {from} to {to}: address family mismatch")]
    AddressFamily { from: IpAddr, to: IpAddr },
}

fn hdr_mut<T>(pkt: &mut [u8], off: usize, layer: Layer) -> Result<&mut T, RewriteError>
where
    T: FromBytes + IntoBytes + KnownLayout,
{
    pkt.get_mut(off..)
        .and_then(|bytes| T::mut_from_prefix(bytes).ok())
        .map(|(hdr, _)| hdr)
        .ok_or(RewriteError::Truncated { layer })
}

/// Adjust an L4 checksum for an address and port change.
fn l4_update(
    hc: [u8; 2],
    old_ip: &[u8],
    new_ip: &[u8],
    old_port: Option<[u8; 2]>,
    new_port: Option<[u8; 2]>,
) -> [u8; 2] {
    let mut csum = Checksum::from(HeaderChecksum::wrap(hc));
    csum.sub_bytes(old_ip);
    csum.add_bytes(new_ip);
    if let (Some(old), Some(new)) = (old_port, new_port) {
        csum.sub_bytes(&old);
        csum.add_bytes(&new);
    }
    HeaderChecksum::from(csum).bytes()
}

/// Rewrite the packet in `pkt`, previously parsed into `meta`.
pub fn rewrite(
    pkt: &mut [u8],
    meta: &PacketMeta,
    rw: &NatRewrite,
) -> Result<(), RewriteError> {
    let new_ip = rw.to.ip;
    let (old_ip_bytes, new_ip_bytes): (heapless::Vec<u8, 16>, heapless::Vec<u8, 16>) =
        match (meta.flow.src, new_ip) {
            (IpAddr::V4(_), IpAddr::V4(new)) => {
                let ip = hdr_mut::<Ipv4HdrRaw>(pkt, meta.l3_offset, Layer::Ipv4)?;
                let slot = match rw.field {
                    NatField::Src => &mut ip.src,
                    NatField::Dst => &mut ip.dst,
                };
                let old = *slot;
                *slot = new.octets();
                ip.csum = update(ip.csum, &old, &new.octets());
                (octets(&old), octets(&new.octets()))
            }

            (IpAddr::V6(_), IpAddr::V6(new)) => {
                let ip = hdr_mut::<Ipv6HdrRaw>(pkt, meta.l3_offset, Layer::Ipv6)?;
                let slot = match rw.field {
                    NatField::Src => &mut ip.src,
                    NatField::Dst => &mut ip.dst,
                };
                let old = *slot;
                *slot = new.octets();
                (octets(&old), octets(&new.octets()))
            }

            (from, to) => return Err(RewriteError::AddressFamily { from, to }),
        };

    let new_port = rw.to.port.to_be_bytes();
    let l4 = meta.l4_offset;

    match meta.flow.proto {
        Protocol::TCP => {
            let tcp = hdr_mut::<TcpHdrRaw>(pkt, l4, Layer::Tcp)?;
            let slot = match rw.field {
                NatField::Src => &mut tcp.src_port,
                NatField::Dst => &mut tcp.dst_port,
            };
            let old_port = *slot;
            *slot = new_port;
            tcp.csum = l4_update(
                tcp.csum,
                &old_ip_bytes,
                &new_ip_bytes,
                Some(old_port),
                Some(new_port),
            );
        }

        Protocol::UDP => {
            let udp = hdr_mut::<UdpHdrRaw>(pkt, l4, Layer::Udp)?;
            let slot = match rw.field {
                NatField::Src => &mut udp.src_port,
                NatField::Dst => &mut udp.dst_port,
            };
            let old_port = *slot;
            *slot = new_port;

            // Over IPv4 a zero checksum means none was computed.
            let unset = udp.csum == [0; 2] && !meta.is_ipv6();
            if !unset {
                let csum = l4_update(
                    udp.csum,
                    &old_ip_bytes,
                    &new_ip_bytes,
                    Some(old_port),
                    Some(new_port),
                );
                udp.csum = if csum == [0; 2] { [0xFF; 2] } else { csum };
            }
        }

        // ICMPv4 has no pseudo-header; the echo identifier is left
        // alone.
        Protocol::ICMP => {}

        Protocol::ICMPv6 => {
            let icmp = hdr_mut::<IcmpEchoRaw>(pkt, l4, Layer::Icmp)?;
            icmp.csum =
                l4_update(icmp.csum, &old_ip_bytes, &new_ip_bytes, None, None);
        }

        Protocol::Unknown(_) => {}
    }

    Ok(())
}

fn octets(bytes: &[u8]) -> heapless::Vec<u8, 16> {
    heapless::Vec::from_slice(bytes).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::checksum::pseudo_header;
    use crate::engine::ether::ETHER_TYPE_IPV4;
    use crate::engine::ether::EtherHdrRaw;
    use crate::engine::parse::parse;
    use conduit_api::Endpoint;
    use conduit_api::PROTO_UDP;

    fn udp4(csum: bool) -> Vec<u8> {
        let src = "10.0.0.1".parse().unwrap();
        let dst = "10.96.0.10".parse().unwrap();
        let payload = b"ping";
        let udp_len = UdpHdrRaw::SIZE + payload.len();

        let mut pkt = EtherHdrRaw {
            dst: [0; 6],
            src: [0; 6],
            ether_type: ETHER_TYPE_IPV4.to_be_bytes(),
        }
        .as_bytes()
        .to_vec();
        pkt.extend_from_slice(Ipv4HdrRaw::new(src, dst, PROTO_UDP, udp_len).as_bytes());

        let mut udp = UdpHdrRaw {
            src_port: 40000u16.to_be_bytes(),
            dst_port: 53u16.to_be_bytes(),
            length: (udp_len as u16).to_be_bytes(),
            csum: [0; 2],
        };
        if csum {
            let mut sum = pseudo_header(
                IpAddr::V4(src),
                IpAddr::V4(dst),
                PROTO_UDP,
                udp_len as u32,
            );
            sum.add_bytes(udp.as_bytes());
            sum.add_bytes(payload);
            udp.csum = HeaderChecksum::from(sum).bytes();
        }
        pkt.extend_from_slice(udp.as_bytes());
        pkt.extend_from_slice(payload);
        pkt
    }

    fn dnat() -> NatRewrite {
        NatRewrite {
            field: NatField::Dst,
            from: "10.96.0.10:53".parse().unwrap(),
            to: "10.0.1.5:5353".parse().unwrap(),
        }
    }

    // Sum of pseudo-header and datagram, checksum included.
    fn udp_sum(pkt: &[u8]) -> u16 {
        let meta = parse(pkt).unwrap();
        let l4 = &pkt[meta.l4_offset..meta.l3_offset + meta.ip_len];
        let mut sum = pseudo_header(
            meta.flow.src,
            meta.flow.dst,
            PROTO_UDP,
            l4.len() as u32,
        );
        sum.add_bytes(l4);
        sum.finalize()
    }

    #[test]
    fn dnat_udp4() {
        let mut pkt = udp4(true);
        let meta = parse(&pkt).unwrap();
        rewrite(&mut pkt, &meta, &dnat()).unwrap();

        let after = parse(&pkt).unwrap();
        assert_eq!(after.flow.dst_endpoint(), "10.0.1.5:5353".parse::<Endpoint>().unwrap());
        assert_eq!(after.flow.src_endpoint(), meta.flow.src_endpoint());

        let ip = &pkt[meta.l3_offset..meta.l4_offset];
        assert_eq!(Checksum::compute(ip).finalize(), 0xFFFF);
        assert_eq!(udp_sum(&pkt), 0xFFFF);
    }

    #[test]
    fn zero_udp_checksum_stays_zero() {
        let mut pkt = udp4(false);
        let meta = parse(&pkt).unwrap();
        rewrite(&mut pkt, &meta, &dnat()).unwrap();
        let csum_off = meta.l4_offset + 6;
        assert_eq!(&pkt[csum_off..csum_off + 2], &[0, 0]);
    }

    #[test]
    fn family_mismatch() {
        let mut pkt = udp4(true);
        let meta = parse(&pkt).unwrap();
        let rw = NatRewrite {
            field: NatField::Dst,
            from: "10.96.0.10:53".parse().unwrap(),
            to: "[fd00::5]:53".parse().unwrap(),
        };
        assert!(matches!(
            rewrite(&mut pkt, &meta, &rw),
            Err(RewriteError::AddressFamily { .. })
        ));
    }
}
