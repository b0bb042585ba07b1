// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use conduit::engine::parse::parse;
use conduit::engine::policy::PolicySnapshot;
use conduit_bench::MeasurementInfo;
use conduit_bench::packet::BenchPacket;
use conduit_bench::packet::Established;
use conduit_bench::packet::established_dataplane;
use conduit_test_utils::*;
use criterion::BatchSize;
use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use rand::Rng;
use std::hint::black_box;

// Source ports cycled through by the new-flow benchmark. Each pair
// is removed again before its port comes round, so the table never
// fills.
const NEW_FLOW_PORTS: core::ops::Range<u16> = 10_000..11_024;

pub fn parse_only<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut c = c.benchmark_group(format!("parse/{}", M::label()));
    let exp = Established {};
    for case in exp.test_cases() {
        let (pkt, _) = case.generate();
        c.bench_with_input(
            BenchmarkId::new(exp.packet_label(), case.instance_name()),
            &pkt,
            |b, pkt| b.iter(|| parse(black_box(pkt))),
        );
    }
}

pub fn established<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let g = established_dataplane();
    let mut c = c.benchmark_group(format!("process/{}", M::label()));
    let exp = Established {};

    for case in exp.test_cases() {
        let (pkt, dir) = case.generate();
        c.bench_with_input(
            BenchmarkId::new(exp.packet_label(), case.instance_name()),
            &pkt,
            |b, pkt| {
                b.iter_batched_ref(
                    || pkt.clone(),
                    |pkt| g.process(dir, black_box(pkt), 1),
                    BatchSize::SmallInput,
                )
            },
        );
    }
}

pub fn new_flow<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let g = TestDataplane::with_tables(&nat_scenario());
    let mut rng = rand::rng();
    let mut c = c.benchmark_group(format!("process/{}", M::label()));

    c.bench_function("NewFlow/Tcp4Service", |b| {
        b.iter_batched_ref(
            || {
                let port = rng.random_range(NEW_FLOW_PORTS);
                let src = format!("10.2.2.2:{port}");
                let pkt = tcp4(&src, SVC_VIP, TcpFlags::SYN);
                g.ct.remove_pair(&flow_of(&pkt));
                pkt
            },
            |pkt| g.process(Direction::Out, black_box(pkt), 1),
            BatchSize::SmallInput,
        )
    });
}

// A policy whose only allowing rule sits at the end of the last tier.
fn deep_policy() -> PolicySnapshot {
    let mut rng = rand::rng();
    let mut cfg = PolicyTableCfg::default();
    for t in 0..8 {
        let rules = (0..MAX_RULES_PER_TIER)
            .map(|_| RuleCfg {
                name: None,
                direction: Direction::In,
                selector: Selector::All,
                action: RuleAction::Deny,
                matches: RuleMatchCfg {
                    protocols: vec![Protocol::TCP],
                    dst_ports: vec![PortRange::single(
                        rng.random_range(1..1024),
                    )],
                    ..Default::default()
                },
            })
            .collect();
        cfg.tiers.push(TierCfg { name: format!("tier-{t}"), rules });
    }
    cfg.tiers.push(allow_all_tier());

    PolicySnapshot::new(&cfg).unwrap()
}

pub fn policy_eval<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let policy = deep_policy();
    let defaults = DefaultVerdicts::default();
    let flow = FlowKey::new(Protocol::TCP, ep(CLIENT), ep("10.0.0.5:8443"));
    let mut c = c.benchmark_group(format!("policy/{}", M::label()));

    c.bench_function("WorstCase", |b| {
        b.iter(|| policy.evaluate(Direction::In, black_box(&flow), &defaults))
    });
}

pub fn connect<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let g = TestDataplane::with_tables(&nat_scenario());
    let req = ConnectRequest {
        proto: Protocol::TCP,
        src: ep(CLIENT),
        dst: ep(SVC_VIP),
    };
    let mut c = c.benchmark_group(format!("connect/{}", M::label()));

    c.bench_function("Reuse", |b| {
        b.iter(|| g.lb.connect_at(black_box(req), Moment::from_raw_millis(1)))
    });
}

criterion_group!(
    userland,
    parse_only,
    established,
    new_flow,
    policy_eval,
    connect
);
criterion_main!(userland);
