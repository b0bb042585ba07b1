// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for integration tests and benchmarks.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod pcap;
pub mod verify;

pub use conduit;
pub use conduit::api::*;
pub use conduit::ddi::time::Moment;
pub use conduit::engine::Dispatcher;
pub use conduit::engine::DropReason;
pub use conduit::engine::ProcessResult;
pub use conduit::engine::conn_table::ConnTable;
pub use conduit::engine::event::RingSink;
pub use conduit::engine::reaper::Reaper;
pub use conduit::engine::snapshot::Tables;
pub use conduit::engine::sock_lb::ConnectOutcome;
pub use conduit::engine::sock_lb::ConnectRequest;
pub use conduit::engine::sock_lb::ConnectTimeLb;
pub use conduit::engine::tcp::TcpFlags;
pub use conduit::provider::PrintlnLog;
pub use conduit::provider::Providers;
pub use verify::verify_checksums;

use conduit::engine::checksum::Checksum;
use conduit::engine::checksum::HeaderChecksum;
use conduit::engine::checksum::pseudo_header;
use conduit::engine::ether::ETHER_TYPE_IPV4;
use conduit::engine::ether::ETHER_TYPE_IPV6;
use conduit::engine::ether::EtherHdrRaw;
use conduit::engine::icmp::ICMP_ECHO_REQUEST;
use conduit::engine::icmp::IcmpEchoRaw;
use conduit::engine::ip4::Ipv4HdrRaw;
use conduit::engine::ip6::Ipv6HdrRaw;
use conduit::engine::tcp::TcpHdrRaw;
use conduit::engine::udp::UdpHdrRaw;
use std::collections::BTreeMap;
use std::sync::Arc;
use zerocopy::IntoBytes;

pub const GUEST_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0xF7, 0x00, 0x01];
pub const GW_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0xFF, 0x77, 0x77];

/// Number of verdict events kept by [`TestDataplane`].
pub const EVENT_RING_SIZE: usize = 256;

/// The service used by the NAT scenarios.
pub const SVC_VIP: &str = "10.0.0.1:80";
pub const SVC_BACKENDS: [&str; 2] = ["10.1.1.1:8080", "10.1.1.2:8080"];
pub const CLIENT: &str = "10.2.2.2:5000";

pub fn ep(s: &str) -> Endpoint {
    match s.parse() {
        Ok(ep) => ep,
        Err(e) => panic!("bad endpoint {s}: {e}"),
    }
}

fn eth(ether_type: u16) -> Vec<u8> {
    EtherHdrRaw {
        dst: GW_MAC,
        src: GUEST_MAC,
        ether_type: ether_type.to_be_bytes(),
    }
    .as_bytes()
    .to_vec()
}

/// Wrap the L4 segment `l4` in IP and Ethernet headers. The L4
/// checksum field at `csum_off` is filled in, covering the
/// pseudo-header when `pseudo` is set.
fn frame(
    src: IpAddr,
    dst: IpAddr,
    proto: u8,
    mut l4: Vec<u8>,
    csum_off: usize,
    pseudo: bool,
) -> Vec<u8> {
    let mut sum = if pseudo {
        pseudo_header(src, dst, proto, l4.len() as u32)
    } else {
        Checksum::new()
    };
    sum.add_bytes(&l4);
    let csum = HeaderChecksum::from(sum).bytes();
    l4[csum_off..csum_off + 2].copy_from_slice(&csum);

    let mut pkt = match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            let mut pkt = eth(ETHER_TYPE_IPV4);
            pkt.extend_from_slice(Ipv4HdrRaw::new(s, d, proto, l4.len()).as_bytes());
            pkt
        }
        (IpAddr::V6(s), IpAddr::V6(d)) => {
            let mut pkt = eth(ETHER_TYPE_IPV6);
            pkt.extend_from_slice(Ipv6HdrRaw::new(s, d, proto, l4.len()).as_bytes());
            pkt
        }
        _ => panic!("mixed address families: {src} -> {dst}"),
    };
    pkt.extend_from_slice(&l4);
    pkt
}

/// A TCP segment from `src` to `dst` with the given flags and a short
/// payload.
pub fn tcp(src: &str, dst: &str, flags: TcpFlags) -> Vec<u8> {
    let (src, dst) = (ep(src), ep(dst));
    let hdr = TcpHdrRaw {
        src_port: src.port.to_be_bytes(),
        dst_port: dst.port.to_be_bytes(),
        seq: 4224u32.to_be_bytes(),
        ack: if flags.contains(TcpFlags::ACK) {
            7777u32.to_be_bytes()
        } else {
            [0; 4]
        },
        offset: 5 << 4,
        flags: flags.bits(),
        win: 64240u16.to_be_bytes(),
        csum: [0; 2],
        urg: [0; 2],
    };
    let mut l4 = hdr.as_bytes().to_vec();
    l4.extend_from_slice(b"tcp payload");
    frame(src.ip, dst.ip, PROTO_TCP, l4, 16, true)
}

/// An IPv4 TCP segment. Addresses are `ip:port`.
pub fn tcp4(src: &str, dst: &str, flags: TcpFlags) -> Vec<u8> {
    tcp(src, dst, flags)
}

/// An IPv6 TCP segment. Addresses are `[ip]:port`.
pub fn tcp6(src: &str, dst: &str, flags: TcpFlags) -> Vec<u8> {
    tcp(src, dst, flags)
}

/// A UDP datagram carrying `payload`.
pub fn udp(src: &str, dst: &str, payload: &[u8]) -> Vec<u8> {
    let (src, dst) = (ep(src), ep(dst));
    let len = UdpHdrRaw::SIZE + payload.len();
    let hdr = UdpHdrRaw {
        src_port: src.port.to_be_bytes(),
        dst_port: dst.port.to_be_bytes(),
        length: (len as u16).to_be_bytes(),
        csum: [0; 2],
    };
    let mut l4 = hdr.as_bytes().to_vec();
    l4.extend_from_slice(payload);
    frame(src.ip, dst.ip, PROTO_UDP, l4, 6, true)
}

pub fn udp4(src: &str, dst: &str, payload: &[u8]) -> Vec<u8> {
    udp(src, dst, payload)
}

/// An ICMPv4 echo request.
pub fn icmp4_echo(src: &str, dst: &str, ident: u16, seq: u16) -> Vec<u8> {
    let src: IpAddr = src.parse().unwrap();
    let dst: IpAddr = dst.parse().unwrap();
    let hdr = IcmpEchoRaw {
        msg_type: ICMP_ECHO_REQUEST,
        code: 0,
        csum: [0; 2],
        ident: ident.to_be_bytes(),
        seq: seq.to_be_bytes(),
    };
    let mut l4 = hdr.as_bytes().to_vec();
    l4.extend_from_slice(b"reunion\0");
    frame(src, dst, PROTO_ICMP, l4, 2, false)
}

/// Parse `pkt` and return its flow key.
pub fn flow_of(pkt: &[u8]) -> FlowKey {
    match conduit::engine::parse::parse(pkt) {
        Ok(meta) => meta.flow,
        Err(e) => panic!("failed to parse test packet: {e}"),
    }
}

/// A tier with a single rule allowing everything in both directions.
pub fn allow_all_tier() -> TierCfg {
    let rule = |direction| RuleCfg {
        name: Some(format!("allow-all-{direction}")),
        direction,
        selector: Selector::All,
        action: RuleAction::Allow,
        matches: RuleMatchCfg::default(),
    };
    TierCfg {
        name: "default-allow".to_string(),
        rules: vec![rule(Direction::In), rule(Direction::Out)],
    }
}

/// The service `SVC_VIP` balanced over `SVC_BACKENDS`, with policy
/// allowing all traffic.
pub fn nat_scenario() -> TablesCfg {
    let mut cfg = TablesCfg::default();
    cfg.policy.tiers.push(allow_all_tier());
    cfg.services.services.push(ServiceCfg {
        name: Some("frontend".to_string()),
        protocol: Protocol::TCP,
        vip: ep(SVC_VIP),
        backends: SVC_BACKENDS
            .iter()
            .map(|b| BackendCfg { addr: ep(b), weight: 1 })
            .collect(),
    });
    cfg
}

/// Ingress policy: tier 1 denies TCP to port 22 from anywhere, tier 2
/// allows any TCP, everything else falls to the default verdict.
pub fn tier_scenario() -> TablesCfg {
    let mut cfg = TablesCfg::default();
    cfg.policy.tiers = vec![
        TierCfg {
            name: "security".to_string(),
            rules: vec![RuleCfg {
                name: Some("no-ssh".to_string()),
                direction: Direction::In,
                selector: Selector::All,
                action: RuleAction::Deny,
                matches: RuleMatchCfg {
                    protocols: vec![Protocol::TCP],
                    src_nets: vec!["0.0.0.0/0".parse().unwrap()],
                    dst_ports: vec![PortRange::single(22)],
                    ..Default::default()
                },
            }],
        },
        TierCfg {
            name: "application".to_string(),
            rules: vec![RuleCfg {
                name: Some("allow-tcp".to_string()),
                direction: Direction::In,
                selector: Selector::All,
                action: RuleAction::Allow,
                matches: RuleMatchCfg {
                    protocols: vec![Protocol::TCP],
                    ..Default::default()
                },
            }],
        },
    ];
    cfg
}

/// A named endpoint with the given labels.
pub fn endpoint(name: &str, addr: &str, labels: &[(&str, &str)]) -> EndpointCfg {
    EndpointCfg {
        name: name.to_string(),
        addrs: vec![addr.parse().unwrap()],
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// A complete dataplane over one connection table: the packet path,
/// the connect-time balancer, and the reaper, with events captured in
/// a ring.
pub struct TestDataplane {
    pub dp: Dispatcher,
    pub lb: ConnectTimeLb,
    pub reaper: Reaper,
    pub tables: Arc<Tables>,
    pub ct: Arc<ConnTable>,
    pub events: Arc<RingSink<EVENT_RING_SIZE>>,
}

impl TestDataplane {
    pub fn new(cfg: &DataplaneCfg, tables: &TablesCfg) -> Self {
        let events = Arc::new(RingSink::<EVENT_RING_SIZE>::new());
        let providers = Arc::new(Providers::new(
            Box::new(PrintlnLog),
            Box::new(events.clone()),
        ));
        let tables = Arc::new(Tables::from_cfg(tables).unwrap());
        let ct = Arc::new(ConnTable::new(cfg.conn_table_capacity).unwrap());

        let dp = Dispatcher::new(
            "test-dp",
            cfg,
            tables.clone(),
            ct.clone(),
            providers.clone(),
        )
        .unwrap();
        let lb = ConnectTimeLb::new(
            tables.clone(),
            ct.clone(),
            cfg.ttl,
            providers.clone(),
        );
        let reaper = Reaper::new(ct.clone(), providers);

        Self { dp, lb, reaper, tables, ct, events }
    }

    /// A dataplane with default settings.
    pub fn with_tables(tables: &TablesCfg) -> Self {
        Self::new(&DataplaneCfg::default(), tables)
    }

    pub fn process(
        &self,
        dir: Direction,
        pkt: &mut [u8],
        now: u64,
    ) -> ProcessResult {
        self.dp.process_at(dir, pkt, Moment::from_raw_millis(now))
    }

    /// Dump the connection table to stdout, for failing tests.
    pub fn print_conns(&self) {
        conduit::print::print_conn_table(&self.ct.dump()).unwrap();
    }
}

#[macro_export]
macro_rules! expect_forward {
    ($res:expr) => {
        assert!(
            matches!($res, $crate::ProcessResult::Forward),
            "expected Forward, got {:?}",
            $res
        )
    };
}

#[macro_export]
macro_rules! assert_drop {
    ($res:expr, $expected:pat) => {
        match &$res {
            $crate::ProcessResult::Drop { reason } => assert!(
                matches!(reason, $expected),
                "expected drop type: {}, but got: {:?}",
                stringify!($expected),
                reason,
            ),

            _ => panic!("expected drop, but got: {:?}", $res),
        }
    };
}
