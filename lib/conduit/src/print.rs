// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print tables and counters in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both conduitadm and integration tests.

use crate::engine::conn_table::ConnEntryDump;
use crate::engine::conn_table::ConnTableDump;
use crate::engine::policy::PolicySnapshot;
use crate::engine::rule::Finalized;
use crate::engine::rule::Rule;
use crate::engine::service::RedirectSnapshot;
use crate::engine::service::ServiceSnapshot;
use crate::engine::stat::DirStatsSnap;
use crate::engine::stat::DispatchStatsSnap;
use itertools::Itertools;
use std::collections::VecDeque;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`ConnTableDump`].
pub fn print_conn_table(dump: &ConnTableDump) -> std::io::Result<()> {
    print_conn_table_into(&mut std::io::stdout(), dump)
}

/// Print a [`ConnTableDump`] into a given writer.
pub fn print_conn_table_into(
    writer: &mut impl Write,
    dump: &ConnTableDump,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Connections: {}/{}", dump.entries.len(), dump.capacity)?;
    write_hr(&mut t)?;
    print_conn_header(&mut t)?;
    for entry in &dump.entries {
        print_conn(&mut t, entry)?;
    }
    t.flush()
}

/// Print the header for the [`print_conn()`] output.
pub fn print_conn_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        t,
        "PROTO\tSRC IP\tSPORT\tDST IP\tDPORT\tDIR\tSTATE\tHITS\tTTL\tXFORM"
    )
}

/// Print one connection table entry.
pub fn print_conn(
    t: &mut impl Write,
    entry: &ConnEntryDump,
) -> std::io::Result<()> {
    let key = &entry.key;
    let xform = match (&entry.nat, entry.redirect) {
        (Some(nat), Some(to)) => format!("{nat}, REDIRECT {to}"),
        (Some(nat), None) => nat.to_string(),
        (None, Some(to)) => format!("REDIRECT {to}"),
        (None, None) => "--".to_string(),
    };

    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        key.proto,
        key.src,
        key.src_port,
        key.dst,
        key.dst_port,
        entry.dir,
        entry.state,
        entry.hits,
        entry.ttl_ms / 1000,
        xform,
    )
}

/// Print a [`PolicySnapshot`].
pub fn print_policy(policy: &PolicySnapshot) -> std::io::Result<()> {
    print_policy_into(&mut std::io::stdout(), policy)
}

/// Print a [`PolicySnapshot`] into a given writer.
pub fn print_policy_into(
    writer: &mut impl Write,
    policy: &PolicySnapshot,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Endpoints")?;
    write_hrb(&mut t)?;
    writeln!(t, "NAME\tADDRS\tLABELS")?;
    for ep in policy.endpoints() {
        let labels = ep.labels.iter().map(|(k, v)| format!("{k}={v}")).join(",");
        writeln!(
            t,
            "{}\t{}\t{}",
            ep.name,
            ep.addrs.iter().join(","),
            if labels.is_empty() { "--" } else { labels.as_str() },
        )?;
    }
    t.flush()?;

    for tier in policy.tiers() {
        writeln!(t, "\nTier {}", tier.name())?;
        write_hr(&mut t)?;
        print_rule_header(&mut t)?;
        for (i, rule) in tier.rules().iter().enumerate() {
            print_rule(&mut t, i, rule)?;
        }
        t.flush()?;
    }

    writeln!(t)?;
    t.flush()
}

/// Print the header for the [`print_rule()`] output.
pub fn print_rule_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "ID\tNAME\tDIR\tSELECTOR\tPREDICATES\tACTION")
}

/// Print a policy rule, one predicate per line.
pub fn print_rule(
    t: &mut impl Write,
    id: usize,
    rule: &Rule<Finalized>,
) -> std::io::Result<()> {
    let mut preds = rule
        .predicates()
        .iter()
        .map(ToString::to_string)
        .collect::<VecDeque<String>>();

    let first_pred = preds.pop_front().unwrap_or_else(|| "*".to_string());

    writeln!(
        t,
        "{id}\t{}\t{}\t{}\t{first_pred}\t{}",
        rule.name().unwrap_or("--"),
        rule.dir(),
        rule.selector(),
        rule.action(),
    )?;

    let mut multi_preds = false;
    while let Some(pred) = preds.pop_front() {
        writeln!(t, "\t\t\t\t{pred}\t")?;
        multi_preds = true;
    }

    // Separate multi-line rules from the next one.
    if multi_preds {
        writeln!(t, "\t\t\t\t\t")?;
    }

    Ok(())
}

/// Print a [`ServiceSnapshot`] and the redirect rules.
pub fn print_services(
    services: &ServiceSnapshot,
    redirects: &RedirectSnapshot,
) -> std::io::Result<()> {
    print_services_into(&mut std::io::stdout(), services, redirects)
}

/// Print a [`ServiceSnapshot`] and the redirect rules into a given
/// writer.
pub fn print_services_into(
    writer: &mut impl Write,
    services: &ServiceSnapshot,
    redirects: &RedirectSnapshot,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Services: {}", services.len())?;
    write_hr(&mut t)?;
    writeln!(t, "NAME\tPROTO\tVIP\tBACKEND\tWEIGHT")?;
    for svc in services.iter() {
        let name = svc.name.as_deref().unwrap_or("--");
        let mut backends = svc.backends().iter();
        match backends.next() {
            None => writeln!(t, "{name}\t{}\t{}\t--\t--", svc.proto, svc.vip)?,
            Some(b) => writeln!(
                t,
                "{name}\t{}\t{}\t{}\t{}",
                svc.proto, svc.vip, b.addr, b.weight
            )?,
        }
        for b in backends {
            writeln!(t, "\t\t\t{}\t{}", b.addr, b.weight)?;
        }
    }
    t.flush()?;

    writeln!(t, "\nRedirects: {}", redirects.rules().len())?;
    write_hr(&mut t)?;
    writeln!(t, "PROTO\tDST NETS\tDST PORTS\tPROXY")?;
    for r in redirects.rules() {
        writeln!(
            t,
            "{}\t{}\t{}\t{}",
            r.proto,
            or_any(r.dst_nets.iter().join(",")),
            or_any(r.dst_ports.iter().join(",")),
            r.proxy,
        )?;
    }
    t.flush()
}

fn or_any(s: String) -> String {
    if s.is_empty() { "*".to_string() } else { s }
}

/// Print a [`DispatchStatsSnap`].
pub fn print_stats(stats: &DispatchStatsSnap) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), stats)
}

/// Print a [`DispatchStatsSnap`] into a given writer.
pub fn print_stats_into(
    writer: &mut impl Write,
    stats: &DispatchStatsSnap,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "DIR\tFORWARD\tDROP\tREDIRECT\tPASS")?;
    print_dir_stats(&mut t, "IN", &stats.ingress)?;
    print_dir_stats(&mut t, "OUT", &stats.egress)?;
    t.flush()?;

    let p = &stats.pipeline;
    writeln!(t)?;
    write_hr(&mut t)?;
    for (name, val) in [
        ("ct_hit", p.ct_hit),
        ("ct_miss", p.ct_miss),
        ("ct_new", p.ct_new),
        ("ct_race_lost", p.ct_race_lost),
        ("nat_translated", p.nat_translated),
        ("policy_allow", p.policy_allow),
        ("policy_deny", p.policy_deny),
        ("policy_default", p.policy_default),
        ("revalidated", p.revalidated),
        ("revalidate_deny", p.revalidate_deny),
        ("fast_path_deny", p.fast_path_deny),
        ("failsafe", p.failsafe),
        ("parse_error", p.parse_error),
        ("unsupported", p.unsupported),
        ("table_full", p.table_full),
        ("no_backend", p.no_backend),
        ("flow_conflict", p.flow_conflict),
        ("rewrite_error", p.rewrite_error),
    ] {
        writeln!(t, "{name}\t{val}")?;
    }
    t.flush()
}

fn print_dir_stats(
    t: &mut impl Write,
    dir: &str,
    s: &DirStatsSnap,
) -> std::io::Result<()> {
    writeln!(
        t,
        "{dir}\t{}\t{}\t{}\t{}",
        s.forward, s.drop, s.redirect, s.pass_through
    )
}

/// Output a horizontal rule in bold to the given writer.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Output a horizontal rule to the given writer.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
