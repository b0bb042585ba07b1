// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Integration tests.
//!
//! These tests drive complete frames through a [`TestDataplane`]: the
//! packet path, the connect-time balancer, and the reaper sharing one
//! connection table. Time is always supplied explicitly so that
//! expiry is deterministic.

use conduit::engine::tcp_state::ConnState;
use conduit_test_utils::*;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;

fn svc_key() -> FlowKey {
    FlowKey::new(Protocol::TCP, ep(CLIENT), ep(SVC_VIP))
}

// Send the SYN of a new connection to the service and return the
// rewritten frame.
fn syn_to_service(g: &TestDataplane, now: u64) -> Vec<u8> {
    let mut pkt = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN);
    let res = g.process(Direction::Out, &mut pkt, now);
    expect_forward!(res);
    pkt
}

#[test]
fn service_dnat_picks_a_backend() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let pkt = syn_to_service(&g, 0);
    verify_checksums(&pkt);

    let out = flow_of(&pkt);
    assert_eq!(out.src_endpoint(), ep(CLIENT));
    assert!(
        SVC_BACKENDS.iter().any(|b| ep(b) == out.dst_endpoint()),
        "unexpected destination {}",
        out.dst_endpoint()
    );
    assert_eq!(g.ct.num_entries(), 2);

    let entry = g.ct.lookup(&svc_key()).unwrap();
    assert_eq!(entry.state(), ConnState::SynSent);
    assert_eq!(entry.nat().unwrap().to, out.dst_endpoint());
}

#[test]
fn syn_retransmit_keeps_backend() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let first = syn_to_service(&g, 0);
    let second = syn_to_service(&g, 1_000);
    assert_eq!(first, second);

    let stats = g.dp.stats().snapshot();
    assert_eq!(stats.pipeline.ct_new, 1);
    assert_eq!(stats.pipeline.ct_hit, 1);
    assert_eq!(stats.pipeline.nat_translated, 1);
    assert_eq!(stats.egress.forward, 2);
    assert_eq!(g.ct.num_entries(), 2);
}

#[test]
fn reply_is_untranslated() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let syn = syn_to_service(&g, 0);
    let backend = flow_of(&syn).dst_endpoint();

    let mut reply =
        tcp4(&backend.to_string(), CLIENT, TcpFlags::SYN | TcpFlags::ACK);
    let res = g.process(Direction::In, &mut reply, 10);
    expect_forward!(res);
    verify_checksums(&reply);

    // The client only ever sees the service address.
    assert_eq!(flow_of(&reply), svc_key().reversed());

    let fwd = g.ct.lookup(&svc_key()).unwrap();
    assert_eq!(fwd.state(), ConnState::Established);
    let rev = g.ct.lookup(&fwd.pair()).unwrap();
    assert_eq!(rev.state(), ConnState::Established);
    assert_eq!(rev.hits(), 1);
}

#[test]
fn translated_leg_passes_second_hook() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let syn = syn_to_service(&g, 0);

    // The already rewritten SYN arrives at the backend's own hook.
    let mut again = syn.clone();
    let res = g.process(Direction::In, &mut again, 5);
    expect_forward!(res);
    assert_eq!(again, syn);

    let stats = g.dp.stats().snapshot();
    assert_eq!(stats.pipeline.ct_new, 1);
    assert_eq!(stats.pipeline.ct_hit, 1);
    assert_eq!(g.ct.num_entries(), 2);
}

#[test]
fn ipv6_service() {
    let mut cfg = nat_scenario();
    cfg.services.services.push(ServiceCfg {
        name: Some("frontend-v6".to_string()),
        protocol: Protocol::TCP,
        vip: ep("[fd00::1]:80"),
        backends: vec![BackendCfg { addr: ep("[fd00::10]:8080"), weight: 1 }],
    });
    let g = TestDataplane::with_tables(&cfg);

    let mut pkt = tcp6("[fd00::99]:41000", "[fd00::1]:80", TcpFlags::SYN);
    let res = g.process(Direction::Out, &mut pkt, 0);
    expect_forward!(res);
    verify_checksums(&pkt);
    assert_eq!(flow_of(&pkt).dst_endpoint(), ep("[fd00::10]:8080"));

    let mut reply =
        tcp6("[fd00::10]:8080", "[fd00::99]:41000", TcpFlags::SYN | TcpFlags::ACK);
    let res = g.process(Direction::In, &mut reply, 1);
    expect_forward!(res);
    verify_checksums(&reply);
    assert_eq!(flow_of(&reply).src_endpoint(), ep("[fd00::1]:80"));
}

#[test]
fn plain_flow_is_tracked_untouched() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let orig = udp4(CLIENT, "10.9.9.9:53", b"query");
    let mut pkt = orig.clone();
    let res = g.process(Direction::Out, &mut pkt, 0);
    expect_forward!(res);
    assert_eq!(pkt, orig);

    let mut reply = udp4("10.9.9.9:53", CLIENT, b"answer");
    let res = g.process(Direction::In, &mut reply, 1);
    expect_forward!(res);
    assert_eq!(g.ct.num_entries(), 2);
    assert_eq!(g.dp.stats().snapshot().pipeline.nat_translated, 0);
}

#[test]
fn icmp_echo_tracked() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let mut pkt = icmp4_echo("10.2.2.2", "10.9.9.9", 7, 1);
    let res = g.process(Direction::Out, &mut pkt, 0);
    expect_forward!(res);
    verify_checksums(&pkt);

    let entry = g.ct.lookup(&flow_of(&pkt)).unwrap();
    assert_eq!(entry.state(), ConnState::Datagram);
}

#[test]
fn service_without_backends_drops() {
    let mut cfg = nat_scenario();
    cfg.services.services[0].backends.clear();
    let g = TestDataplane::with_tables(&cfg);

    let mut pkt = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN);
    let res = g.process(Direction::Out, &mut pkt, 0);
    assert_drop!(res, DropReason::NoBackend { .. });
    assert_eq!(g.ct.num_entries(), 0);

    let req = ConnectRequest {
        proto: Protocol::TCP,
        src: ep(CLIENT),
        dst: ep(SVC_VIP),
    };
    assert!(g.lb.connect_at(req, Moment::from_raw_millis(0)).is_err());
}

#[test]
fn tier_deny_is_not_cached() {
    let g = TestDataplane::with_tables(&tier_scenario());

    for now in [0, 100] {
        let mut ssh = tcp4("192.168.1.10:40000", "10.0.0.5:22", TcpFlags::SYN);
        let res = g.process(Direction::In, &mut ssh, now);
        assert_eq!(
            res,
            ProcessResult::Drop {
                reason: DropReason::Policy {
                    tier: Some("security".to_string()),
                    rule: Some("no-ssh".to_string()),
                }
            }
        );
    }

    assert_eq!(g.ct.num_entries(), 0);
    let stats = g.dp.stats().snapshot();
    assert_eq!(stats.pipeline.policy_deny, 2);
    assert_eq!(stats.ingress.drop, 2);

    let events = g.events.drain();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].disposition, Disposition::Drop);
    assert_eq!(
        events[0].reason,
        EventReason::PolicyDeny {
            tier: Some("security".to_string()),
            rule: Some("no-ssh".to_string()),
        }
    );
}

#[test]
fn tier_order_and_default() {
    let g = TestDataplane::with_tables(&tier_scenario());

    // Allowed by the second tier.
    let mut http = tcp4("192.168.1.10:40000", "10.0.0.5:80", TcpFlags::SYN);
    expect_forward!(g.process(Direction::In, &mut http, 0));
    assert_eq!(g.ct.num_entries(), 2);

    // Nothing matches UDP; the ingress default applies.
    let mut dns = udp4("192.168.1.10:40000", "10.0.0.5:53", b"q");
    let res = g.process(Direction::In, &mut dns, 0);
    assert_drop!(res, DropReason::Policy { tier: None, rule: None });

    let stats = g.dp.stats().snapshot();
    assert_eq!(stats.pipeline.policy_allow, 1);
    assert_eq!(stats.pipeline.policy_default, 1);
}

#[test]
fn policy_swap_revalidates_tracked_flows() {
    let g = TestDataplane::with_tables(&tier_scenario());
    let client = "192.168.1.10:40000";
    let server = "10.0.0.5:80";

    let mut syn = tcp4(client, server, TcpFlags::SYN);
    expect_forward!(g.process(Direction::In, &mut syn, 0));

    // A table that still allows the flow: the reply is revalidated
    // once and then served from the cache again.
    let mut cfg = tier_scenario();
    g.tables.swap_policy(
        conduit::engine::policy::PolicySnapshot::new(&cfg.policy).unwrap(),
    );
    let mut synack = tcp4(server, client, TcpFlags::SYN | TcpFlags::ACK);
    expect_forward!(g.process(Direction::Out, &mut synack, 10));
    let mut ack = tcp4(client, server, TcpFlags::ACK);
    expect_forward!(g.process(Direction::In, &mut ack, 20));
    assert_eq!(g.dp.stats().snapshot().pipeline.revalidated, 1);

    // Drop the allow tier. The next packet of the connection is
    // denied and the connection forgotten.
    cfg.policy.tiers.truncate(1);
    g.tables.swap_policy(
        conduit::engine::policy::PolicySnapshot::new(&cfg.policy).unwrap(),
    );
    let mut ack = tcp4(client, server, TcpFlags::ACK);
    let res = g.process(Direction::In, &mut ack, 30);
    assert_drop!(res, DropReason::Policy { tier: None, .. });
    assert_eq!(g.ct.num_entries(), 0);

    let stats = g.dp.stats().snapshot();
    assert_eq!(stats.pipeline.revalidated, 2);
    assert_eq!(stats.pipeline.revalidate_deny, 1);

    let last = g.events.drain().pop().unwrap();
    assert_eq!(last.reason, EventReason::Revalidated);
}

#[test]
fn full_table_spares_existing_flows() {
    let dp_cfg = DataplaneCfg { conn_table_capacity: 2, ..Default::default() };
    let g = TestDataplane::new(&dp_cfg, &nat_scenario());

    let mut a = udp4(CLIENT, "10.9.9.9:53", b"a");
    expect_forward!(g.process(Direction::Out, &mut a, 0));

    let mut b = udp4(CLIENT, "10.9.9.10:53", b"b");
    let res = g.process(Direction::Out, &mut b, 1);
    assert_drop!(res, DropReason::TableFull);

    let mut a = udp4(CLIENT, "10.9.9.9:53", b"a");
    expect_forward!(g.process(Direction::Out, &mut a, 2));

    assert_eq!(g.ct.num_entries(), 2);
    assert_eq!(g.dp.stats().snapshot().pipeline.table_full, 1);
    g.print_conns();
}

#[test]
fn concurrent_first_packets_create_one_connection() {
    const THREADS: usize = 8;
    let g = TestDataplane::with_tables(&nat_scenario());

    let outputs: Vec<Vec<u8>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    let mut pkt = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN);
                    let res = g.process(Direction::Out, &mut pkt, 0);
                    expect_forward!(res);
                    pkt
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Everyone ends up on the same backend.
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(g.ct.num_entries(), 2);

    let p = g.dp.stats().snapshot().pipeline;
    assert_eq!(p.ct_new, 1);
    assert_eq!(p.ct_new + p.ct_race_lost + p.ct_hit, THREADS as u64);
}

#[test]
fn connect_time_and_packet_path_agree() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let req = ConnectRequest {
        proto: Protocol::TCP,
        src: ep(CLIENT),
        dst: ep(SVC_VIP),
    };

    let out = g.lb.connect_at(req, Moment::from_raw_millis(0)).unwrap();
    let ConnectOutcome::Translated { backend } = out else {
        panic!("expected translation: {out:?}");
    };
    assert_eq!(g.ct.num_entries(), 2);

    // The first packet finds the installed connection, evaluates
    // policy for it, and is rewritten to the same backend.
    let pkt = syn_to_service(&g, 1);
    assert_eq!(flow_of(&pkt).dst_endpoint(), backend);

    let p = g.dp.stats().snapshot().pipeline;
    assert_eq!(p.ct_new, 0);
    assert_eq!(p.ct_hit, 1);
    assert_eq!(p.revalidated, 1);
    assert_eq!(g.ct.num_entries(), 2);
}

#[test]
fn packet_then_connect_reports_installed_backend() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let pkt = syn_to_service(&g, 0);
    let req = ConnectRequest {
        proto: Protocol::TCP,
        src: ep(CLIENT),
        dst: ep(SVC_VIP),
    };

    let out = g.lb.connect_at(req, Moment::from_raw_millis(1)).unwrap();
    assert_eq!(
        out,
        ConnectOutcome::Translated { backend: flow_of(&pkt).dst_endpoint() }
    );
    assert_eq!(g.lb.stats().snapshot().reused, 1);
}

#[test]
fn connect_time_connection_denied_by_policy() {
    // The service exists but egress falls to the default deny.
    let mut cfg = nat_scenario();
    cfg.policy.tiers.clear();
    let g = TestDataplane::with_tables(&cfg);
    let req = ConnectRequest {
        proto: Protocol::TCP,
        src: ep(CLIENT),
        dst: ep(SVC_VIP),
    };
    g.lb.connect_at(req, Moment::from_raw_millis(0)).unwrap();
    assert_eq!(g.ct.num_entries(), 2);

    let mut pkt = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN);
    let res = g.process(Direction::Out, &mut pkt, 1);
    assert_drop!(res, DropReason::Policy { tier: None, rule: None });
    assert_eq!(g.ct.num_entries(), 0);
}

fn connect_client(g: &TestDataplane) -> Endpoint {
    let req = ConnectRequest {
        proto: Protocol::TCP,
        src: ep(CLIENT),
        dst: ep(SVC_VIP),
    };
    match g.lb.connect_at(req, Moment::from_raw_millis(0)) {
        Ok(ConnectOutcome::Translated { backend }) => backend,
        res => panic!("expected translation: {res:?}"),
    }
}

#[test]
fn connected_socket_sends_to_backend() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let backend = connect_client(&g);

    // The socket already addresses the backend; nothing to rewrite.
    let orig = tcp4(CLIENT, &backend.to_string(), TcpFlags::SYN);
    let mut pkt = orig.clone();
    expect_forward!(g.process(Direction::Out, &mut pkt, 1));
    assert_eq!(pkt, orig);

    let p = g.dp.stats().snapshot().pipeline;
    assert_eq!(p.ct_new, 0);
    assert_eq!(p.revalidated, 1);
    let fwd = g.ct.lookup(&svc_key()).unwrap();
    assert!(fwd.allowed_at(g.tables.generation()));

    let mut synack =
        tcp4(&backend.to_string(), CLIENT, TcpFlags::SYN | TcpFlags::ACK);
    expect_forward!(g.process(Direction::In, &mut synack, 2));
    assert_eq!(fwd.state(), ConnState::Established);
    assert_eq!(g.ct.num_entries(), 2);
}

#[test]
fn connected_socket_to_backend_denied_by_policy() {
    let mut cfg = nat_scenario();
    cfg.policy.tiers.clear();
    let g = TestDataplane::with_tables(&cfg);
    let backend = connect_client(&g);
    assert_eq!(g.ct.num_entries(), 2);

    let mut pkt = tcp4(CLIENT, &backend.to_string(), TcpFlags::SYN);
    let res = g.process(Direction::Out, &mut pkt, 1);
    assert_drop!(res, DropReason::Policy { tier: None, rule: None });
    assert_eq!(g.ct.num_entries(), 0);
    assert_eq!(g.dp.stats().snapshot().pipeline.revalidate_deny, 1);

    // Once forgotten, the next attempt is a fresh connection and is
    // denied again.
    let mut pkt = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN);
    let res = g.process(Direction::Out, &mut pkt, 2);
    assert_drop!(res, DropReason::Policy { tier: None, rule: None });
    assert_eq!(g.ct.num_entries(), 0);
}

#[test]
fn connect_first_and_packet_first_redirect_alike() {
    let mut cfg = nat_scenario();
    cfg.redirects.rules.push(RedirectRuleCfg {
        protocol: Protocol::TCP,
        dst_nets: vec![],
        dst_ports: vec![PortRange::single(8080)],
        proxy: ep("127.0.0.1:15001"),
    });
    let proxied = ProcessResult::Redirect { to: ep("127.0.0.1:15001") };

    let packet_first = TestDataplane::with_tables(&cfg);
    let mut pkt = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN);
    assert_eq!(packet_first.process(Direction::Out, &mut pkt, 0), proxied);

    let connect_first = TestDataplane::with_tables(&cfg);
    let backend = connect_client(&connect_first);
    let mut pkt = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN);
    assert_eq!(connect_first.process(Direction::Out, &mut pkt, 1), proxied);
    let mut pkt = tcp4(CLIENT, &backend.to_string(), TcpFlags::ACK);
    assert_eq!(connect_first.process(Direction::Out, &mut pkt, 2), proxied);

    // Replies are never redirected.
    let mut reply = tcp4(&backend.to_string(), CLIENT, TcpFlags::ACK);
    expect_forward!(connect_first.process(Direction::In, &mut reply, 3));
}

#[test]
fn reused_tuple_after_reset_is_established() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let syn = syn_to_service(&g, 0);
    let backend = flow_of(&syn).dst_endpoint().to_string();

    let mut rst = tcp4(&backend, CLIENT, TcpFlags::RST);
    expect_forward!(g.process(Direction::In, &mut rst, 1));
    let fwd = g.ct.lookup(&svc_key()).unwrap();
    assert_eq!(fwd.state(), ConnState::Closing);

    // The client opens a new connection on the same tuple while the
    // old one is still within its closing TTL.
    syn_to_service(&g, 2_000);
    assert_eq!(fwd.state(), ConnState::SynSent);
    let mut synack = tcp4(&backend, CLIENT, TcpFlags::SYN | TcpFlags::ACK);
    expect_forward!(g.process(Direction::In, &mut synack, 2_001));
    assert_eq!(fwd.state(), ConnState::Established);

    let idle = TtlCfg::default().tcp_closing * 1000 + 1;
    assert_eq!(g.reaper.reap_at(Moment::from_raw_millis(2_001 + idle)), 0);
    assert_eq!(g.ct.num_entries(), 2);
}

#[test]
fn reaper_races_packets_without_orphans() {
    const PORTS: u64 = 64;
    const STEPS: u64 = 2_000;
    let g = TestDataplane::with_tables(&nat_scenario());
    let clock = AtomicU64::new(0);
    let done = AtomicBool::new(false);

    // Each port comes round again after its SYN TTL has run out, so
    // the reaper is evicting pairs while new ones are created. The
    // reaper never runs ahead of the packet clock.
    let results: Vec<ProcessResult> = thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                let now = clock.load(Ordering::Acquire);
                g.reaper.reap_at(Moment::from_raw_millis(now));
            }
        });

        let results = (0..STEPS)
            .map(|step| {
                let now = step * 1_000;
                clock.store(now, Ordering::Release);
                let src = format!("10.2.2.2:{}", 20_000 + step % PORTS);
                let mut pkt = tcp4(&src, SVC_VIP, TcpFlags::SYN);
                g.process(Direction::Out, &mut pkt, now)
            })
            .collect();
        done.store(true, Ordering::Release);
        results
    });

    // A packet may lose to a pair that is half way through eviction;
    // nothing else stops it.
    for res in &results {
        if *res != ProcessResult::Forward {
            assert_drop!(res, DropReason::FlowConflict { .. });
        }
    }

    let dump = g.ct.dump();
    assert_eq!(dump.entries.len(), g.ct.num_entries() as usize);
    for e in &dump.entries {
        let Some(other) = g.ct.lookup(&e.pair) else {
            g.print_conns();
            panic!("{} left without its partner {}", e.key, e.pair);
        };
        assert_eq!(other.pair(), e.key);
    }

    let end = (STEPS + PORTS) * 1_000;
    g.reaper.reap_at(Moment::from_raw_millis(end));
    assert_eq!(g.ct.num_entries(), 0);
}

#[test]
fn egress_redirect_to_proxy() {
    let mut cfg = nat_scenario();
    cfg.redirects.rules.push(RedirectRuleCfg {
        protocol: Protocol::TCP,
        dst_nets: vec![],
        dst_ports: vec![PortRange::single(443)],
        proxy: ep("127.0.0.1:15001"),
    });
    let g = TestDataplane::with_tables(&cfg);

    let mut pkt = tcp4(CLIENT, "93.184.216.34:443", TcpFlags::SYN);
    let res = g.process(Direction::Out, &mut pkt, 0);
    assert_eq!(res, ProcessResult::Redirect { to: ep("127.0.0.1:15001") });

    // Later packets of the connection follow.
    let mut pkt = tcp4(CLIENT, "93.184.216.34:443", TcpFlags::ACK);
    let res = g.process(Direction::Out, &mut pkt, 1);
    assert_eq!(res, ProcessResult::Redirect { to: ep("127.0.0.1:15001") });

    // Ingress traffic is never redirected.
    let mut pkt = tcp4("93.184.216.34:5555", "10.2.2.2:443", TcpFlags::SYN);
    expect_forward!(g.process(Direction::In, &mut pkt, 2));
    assert_eq!(g.dp.stats().snapshot().egress.redirect, 2);
}

#[test]
fn fast_path_deny_and_failsafe() {
    let mut dp_cfg = DataplaneCfg::default();
    dp_cfg.fast_path.deny_sources = vec!["192.168.66.0/24".parse().unwrap()];
    dp_cfg.fast_path.failsafe_in = vec![PortRange::single(22)];
    let g = TestDataplane::new(&dp_cfg, &tier_scenario());

    // Policy denies ssh, but failsafe ports bypass policy.
    let mut ssh = tcp4("192.168.1.10:40000", "10.0.0.5:22", TcpFlags::SYN);
    expect_forward!(g.process(Direction::In, &mut ssh, 0));
    assert_eq!(g.ct.num_entries(), 0);

    // The deny list wins over everything.
    let mut ssh = tcp4("192.168.66.5:40000", "10.0.0.5:22", TcpFlags::SYN);
    let res = g.process(Direction::In, &mut ssh, 0);
    assert_drop!(res, DropReason::FastPathDeny);

    let p = g.dp.stats().snapshot().pipeline;
    assert_eq!(p.failsafe, 1);
    assert_eq!(p.fast_path_deny, 1);
}

fn arp_frame() -> Vec<u8> {
    let mut pkt = vec![0xFF; 6];
    pkt.extend_from_slice(&GUEST_MAC);
    pkt.extend_from_slice(&[0x08, 0x06]);
    pkt.extend_from_slice(&[0; 28]);
    pkt
}

#[test]
fn parse_failure_policies() {
    let truncated = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN)[..20].to_vec();

    let g = TestDataplane::with_tables(&nat_scenario());
    let res = g.process(Direction::Out, &mut truncated.clone(), 0);
    assert_drop!(res, DropReason::Parse(_));
    let res = g.process(Direction::Out, &mut arp_frame(), 0);
    assert_eq!(res, ProcessResult::PassThrough);

    let dp_cfg = DataplaneCfg {
        on_parse_error: ParseErrorPolicy::PassThrough,
        on_unsupported: UnsupportedPolicy::Drop,
        ..Default::default()
    };
    let g = TestDataplane::new(&dp_cfg, &nat_scenario());
    let res = g.process(Direction::Out, &mut truncated.clone(), 0);
    assert_eq!(res, ProcessResult::PassThrough);
    let res = g.process(Direction::Out, &mut arp_frame(), 0);
    assert_drop!(res, DropReason::Unsupported(_));

    let p = g.dp.stats().snapshot().pipeline;
    assert_eq!(p.parse_error, 1);
    assert_eq!(p.unsupported, 1);
    assert_eq!(g.ct.num_entries(), 0);
}

#[test]
fn reaper_evicts_idle_connections() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let mut pkt = udp4(CLIENT, "10.9.9.9:53", b"q");
    expect_forward!(g.process(Direction::Out, &mut pkt, 0));

    // One-way traffic keeps both halves alive.
    let mut pkt = udp4(CLIENT, "10.9.9.9:53", b"q");
    expect_forward!(g.process(Direction::Out, &mut pkt, 50_000));
    assert_eq!(g.reaper.reap_at(Moment::from_raw_millis(60_001)), 0);
    assert_eq!(g.ct.num_entries(), 2);

    assert_eq!(g.reaper.reap_at(Moment::from_raw_millis(110_001)), 2);
    assert_eq!(g.ct.num_entries(), 0);

    // A new packet starts a new connection.
    let mut pkt = udp4(CLIENT, "10.9.9.9:53", b"q");
    expect_forward!(g.process(Direction::Out, &mut pkt, 110_002));
    assert_eq!(g.dp.stats().snapshot().pipeline.ct_new, 2);
}

#[test]
fn tcp_close_shortens_ttl() {
    let g = TestDataplane::with_tables(&nat_scenario());
    let syn = syn_to_service(&g, 0);
    let backend = flow_of(&syn).dst_endpoint().to_string();

    let mut synack = tcp4(&backend, CLIENT, TcpFlags::SYN | TcpFlags::ACK);
    expect_forward!(g.process(Direction::In, &mut synack, 1));
    let mut fin = tcp4(CLIENT, SVC_VIP, TcpFlags::FIN | TcpFlags::ACK);
    expect_forward!(g.process(Direction::Out, &mut fin, 2));

    let entry = g.ct.lookup(&svc_key()).unwrap();
    assert_eq!(entry.state(), ConnState::Closing);

    // Closing connections go after the short closing TTL.
    let ttl_ms = TtlCfg::default().tcp_closing * 1000;
    assert_eq!(g.reaper.reap_at(Moment::from_raw_millis(2 + ttl_ms)), 0);
    assert_eq!(g.reaper.reap_at(Moment::from_raw_millis(3 + ttl_ms)), 2);
}

#[test]
fn events_describe_each_verdict() {
    let g = TestDataplane::with_tables(&nat_scenario());
    syn_to_service(&g, 0);
    syn_to_service(&g, 1);

    let events = g.events.drain();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].reason, EventReason::NewFlow);
    assert_eq!(events[0].flow, Some(svc_key()));
    assert_eq!(events[0].dir, Direction::Out);
    assert_eq!(events[1].reason, EventReason::Tracked);
    assert_eq!(events[1].ts_millis, 1);
    assert!(g.events.drain().is_empty());
}
