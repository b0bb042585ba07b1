// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Independent checksum verification, using smoltcp's wire types
//! rather than the engine's own checksum code.

use smoltcp::wire::EthernetFrame;
use smoltcp::wire::EthernetProtocol;
use smoltcp::wire::Icmpv4Packet;
use smoltcp::wire::Icmpv6Packet;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::Ipv6Packet;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::UdpPacket;

/// Check every checksum in an Ethernet frame carrying IPv4 or IPv6.
/// Panics with a description of the first bad one.
pub fn verify_checksums(pkt: &[u8]) {
    let eth = EthernetFrame::new_checked(pkt).unwrap();

    match eth.ethertype() {
        EthernetProtocol::Ipv4 => {
            let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
            assert!(ip.verify_checksum(), "bad IPv4 header checksum");
            let src = IpAddress::from(ip.src_addr());
            let dst = IpAddress::from(ip.dst_addr());
            verify_l4(ip.next_header(), &src, &dst, ip.payload());
        }

        EthernetProtocol::Ipv6 => {
            let ip = Ipv6Packet::new_checked(eth.payload()).unwrap();
            let src = IpAddress::from(ip.src_addr());
            let dst = IpAddress::from(ip.dst_addr());
            verify_l4(ip.next_header(), &src, &dst, ip.payload());
        }

        other => panic!("no checksums to verify for {other}"),
    }
}

fn verify_l4(proto: IpProtocol, src: &IpAddress, dst: &IpAddress, l4: &[u8]) {
    match proto {
        IpProtocol::Tcp => {
            let tcp = TcpPacket::new_checked(l4).unwrap();
            assert!(tcp.verify_checksum(src, dst), "bad TCP checksum");
        }

        IpProtocol::Udp => {
            let udp = UdpPacket::new_checked(l4).unwrap();
            assert!(udp.verify_checksum(src, dst), "bad UDP checksum");
        }

        IpProtocol::Icmp => {
            let icmp = Icmpv4Packet::new_checked(l4).unwrap();
            assert!(icmp.verify_checksum(), "bad ICMP checksum");
        }

        IpProtocol::Icmpv6 => {
            let icmp = Icmpv6Packet::new_checked(l4).unwrap();
            assert!(icmp.verify_checksum(src, dst), "bad ICMPv6 checksum");
        }

        _ => (),
    }
}
