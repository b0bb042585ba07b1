// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The packet path.
//!
//! A [`Dispatcher`] is the entry point for both hooks of an
//! interface. Each packet runs through a fixed sequence of stages:
//!
//! 1. fast path: coarse deny and failsafe checks on raw bytes,
//! 2. parse,
//! 3. connection table lookup,
//! 4. on a miss: NAT, then policy, then connection creation,
//! 5. rewrite and final verdict.
//!
//! Every stage either continues with its output or ends processing
//! with a terminal [`ProcessResult`]. The stages are ordinary
//! functions returning [`ControlFlow`], chained with `?`; none of
//! them loops over unbounded input or calls back into an earlier
//! stage.
//!
//! Both directions share the same logic. What distinguishes the
//! forward and reply halves of a connection is the connection table
//! entry the packet hits, not the hook it arrived on.

use super::conn_table::ConnDir;
use super::conn_table::ConnEntry;
use super::conn_table::ConnInit;
use super::conn_table::ConnPair;
use super::conn_table::ConnTable;
use super::conn_table::InsertError;
use super::conn_table::Inserted;
use super::conn_table::PolicyInput;
use super::event::EventSink;
use super::fastpath::FastPath;
use super::fastpath::FastPathResult;
use super::nat;
use super::nat::NatError;
use super::parse::PacketMeta;
use super::parse::ParseError;
use super::parse::parse;
use super::policy::MatchedBy;
use super::rewrite::RewriteError;
use super::rewrite::rewrite;
use super::snapshot::Snapshot;
use super::snapshot::Tables;
use super::stat::DispatchStats;
use super::stat::incr;
use super::tcp_state::ConnState;
use crate::ddi::time::Moment;
use crate::provider::LogLevel;
use crate::provider::Providers;
use conduit_api::ConduitError;
use conduit_api::DataplaneCfg;
use conduit_api::Direction;
use conduit_api::Disposition;
use conduit_api::Endpoint;
use conduit_api::EventReason;
use conduit_api::FlowKey;
use conduit_api::ParseErrorPolicy;
use conduit_api::UnsupportedPolicy;
use conduit_api::Verdict;
use conduit_api::VerdictEvent;
use core::fmt;
use core::fmt::Display;
use core::ops::ControlFlow;
use std::sync::Arc;

/// Why a packet was dropped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DropReason {
    FastPathDeny,
    Parse(ParseError),
    Unsupported(ParseError),
    TableFull,
    NoBackend { vip: Endpoint },
    /// Denied by policy; `tier` and `rule` are absent when the default
    /// verdict applied.
    Policy { tier: Option<String>, rule: Option<String> },
    FlowConflict { key: FlowKey },
    Rewrite(RewriteError),
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FastPathDeny => write!(f, "fast-path deny"),
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::Unsupported(e) => write!(f, "{e}"),
            Self::TableFull => write!(f, "connection table full"),
            Self::NoBackend { vip } => write!(f, "no backend for {vip}"),
            Self::Policy { tier: None, .. } => write!(f, "default deny"),
            Self::Policy { tier: Some(tier), rule } => {
                write!(f, "denied by {tier}/{}", rule.as_deref().unwrap_or("-"))
            }
            Self::FlowConflict { key } => write!(f, "flow conflict on {key}"),
            Self::Rewrite(e) => write!(f, "rewrite failed: {e}"),
        }
    }
}

/// The verdict for one packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcessResult {
    /// Deliver the packet, rewritten in place if its connection is
    /// translated.
    Forward,
    Drop { reason: DropReason },
    /// Deliver the packet to the local proxy at `to`.
    Redirect { to: Endpoint },
    /// Deliver the packet untouched and untracked.
    PassThrough,
}

impl ProcessResult {
    fn disposition(&self) -> Disposition {
        match self {
            Self::Forward => Disposition::Forward,
            Self::Drop { .. } => Disposition::Drop,
            Self::Redirect { .. } => Disposition::Redirect,
            Self::PassThrough => Disposition::PassThrough,
        }
    }
}

/// A terminal decision along with what is reported about it.
struct Outcome {
    res: ProcessResult,
    flow: Option<FlowKey>,
    reason: EventReason,
}

impl Outcome {
    fn new(
        res: ProcessResult,
        flow: Option<FlowKey>,
        reason: EventReason,
    ) -> Self {
        Self { res, flow, reason }
    }

    fn drop(reason: DropReason, flow: Option<FlowKey>, ev: EventReason) -> Self {
        Self::new(ProcessResult::Drop { reason }, flow, ev)
    }
}

/// The result of one pipeline stage.
type Stage<T> = ControlFlow<Outcome, T>;

pub struct Dispatcher {
    name: String,
    cfg: DataplaneCfg,
    fast_path: FastPath,
    tables: Arc<Tables>,
    ct: Arc<ConnTable>,
    providers: Arc<Providers>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        name: &str,
        cfg: &DataplaneCfg,
        tables: Arc<Tables>,
        ct: Arc<ConnTable>,
        providers: Arc<Providers>,
    ) -> Result<Self, ConduitError> {
        Ok(Self {
            name: name.to_string(),
            cfg: cfg.clone(),
            fast_path: FastPath::new(&cfg.fast_path)?,
            tables,
            ct,
            providers,
            stats: DispatchStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn conn_table(&self) -> &Arc<ConnTable> {
        &self.ct
    }

    pub fn tables(&self) -> &Arc<Tables> {
        &self.tables
    }

    /// Process the Ethernet frame in `pkt`, travelling in direction
    /// `dir`. The frame may be rewritten in place.
    pub fn process(&self, dir: Direction, pkt: &mut [u8]) -> ProcessResult {
        self.process_at(dir, pkt, Moment::now())
    }

    /// As [`Self::process`], with the current time supplied by the
    /// caller.
    pub fn process_at(
        &self,
        dir: Direction,
        pkt: &mut [u8],
        now: Moment,
    ) -> ProcessResult {
        let out = match self.pipeline(dir, pkt, now) {
            ControlFlow::Break(out) | ControlFlow::Continue(out) => out,
        };

        self.record(dir, &out, now);
        out.res
    }

    fn pipeline(
        &self,
        dir: Direction,
        pkt: &mut [u8],
        now: Moment,
    ) -> ControlFlow<Outcome, Outcome> {
        self.fast_path(dir, pkt)?;
        let meta = self.parse(pkt)?;
        let snap = self.tables.load();

        let (entry, reason) = match self.lookup(&meta, &snap, now)? {
            Some(entry) => {
                incr!(self.stats.pipeline.ct_hit);
                (entry, EventReason::Tracked)
            }

            None => {
                incr!(self.stats.pipeline.ct_miss);
                self.create(dir, &meta, &snap, now)?
            }
        };

        self.revalidate(&meta, &entry, &snap)?;
        self.update_state(&meta, &entry, now);
        ControlFlow::Continue(self.finish(pkt, &meta, &entry, reason))
    }

    fn fast_path(&self, dir: Direction, pkt: &[u8]) -> Stage<()> {
        match self.fast_path.check(dir, pkt) {
            FastPathResult::Continue => ControlFlow::Continue(()),

            FastPathResult::Deny => {
                incr!(self.stats.pipeline.fast_path_deny);
                ControlFlow::Break(Outcome::drop(
                    DropReason::FastPathDeny,
                    None,
                    EventReason::FastPathDeny,
                ))
            }

            // Failsafe traffic bypasses the rest of the pipeline and
            // is not tracked.
            FastPathResult::Failsafe => {
                incr!(self.stats.pipeline.failsafe);
                ControlFlow::Break(Outcome::new(
                    ProcessResult::Forward,
                    None,
                    EventReason::Failsafe,
                ))
            }
        }
    }

    fn parse(&self, pkt: &[u8]) -> Stage<PacketMeta> {
        let err = match parse(pkt) {
            Ok(meta) => return ControlFlow::Continue(meta),
            Err(err) => err,
        };

        let out = if err.is_unsupported() {
            incr!(self.stats.pipeline.unsupported);
            match self.cfg.on_unsupported {
                UnsupportedPolicy::PassThrough => Outcome::new(
                    ProcessResult::PassThrough,
                    None,
                    EventReason::Unsupported,
                ),
                UnsupportedPolicy::Drop => Outcome::drop(
                    DropReason::Unsupported(err),
                    None,
                    EventReason::Unsupported,
                ),
            }
        } else {
            incr!(self.stats.pipeline.parse_error);
            self.providers.log.log(
                LogLevel::Debug,
                &format!("{}: malformed packet: {err}", self.name),
            );
            match self.cfg.on_parse_error {
                ParseErrorPolicy::Drop => Outcome::drop(
                    DropReason::Parse(err),
                    None,
                    EventReason::ParseError,
                ),
                ParseErrorPolicy::PassThrough => Outcome::new(
                    ProcessResult::PassThrough,
                    None,
                    EventReason::ParseError,
                ),
            }
        };

        ControlFlow::Break(out)
    }

    /// Find the connection `meta` belongs to.
    ///
    /// A miss on the exact key may still be a tracked packet: a
    /// translated connection seen again after translation, e.g. on a
    /// second hook of the same host, carries the key of neither half.
    /// Its reverse, however, is the other half's key. Such a packet
    /// needs no rewrite, but the connection's verdict must still hold
    /// under the current policy. Connections installed at connect time
    /// send their first packets this way, already addressed to the
    /// backend.
    fn lookup(
        &self,
        meta: &PacketMeta,
        snap: &Snapshot,
        now: Moment,
    ) -> Stage<Option<Arc<ConnEntry>>> {
        let key = meta.flow;
        if let Some(entry) = self.ct.lookup(&key) {
            return ControlFlow::Continue(Some(entry));
        }

        let other = match self.ct.lookup(&key.reversed()) {
            Some(other) if other.nat().is_some() => other,
            _ => return ControlFlow::Continue(None),
        };

        incr!(self.stats.pipeline.ct_hit);
        self.revalidate(meta, &other, snap)?;
        other.keep_alive(now);
        let partner = self.ct.lookup(&other.pair());
        if let Some(partner) = &partner {
            partner.touch(now);
        }

        // Only the original direction is redirected.
        let redirect = match other.dir() {
            ConnDir::Reply => partner.and_then(|p| p.redirect()),
            ConnDir::Original => None,
        };
        let res = match redirect {
            Some(to) => ProcessResult::Redirect { to },
            None => ProcessResult::Forward,
        };
        ControlFlow::Break(Outcome::new(res, Some(key), EventReason::Tracked))
    }

    /// Run NAT and policy for the first packet of a connection and,
    /// if allowed, track it.
    fn create(
        &self,
        dir: Direction,
        meta: &PacketMeta,
        snap: &Snapshot,
        now: Moment,
    ) -> Stage<(Arc<ConnEntry>, EventReason)> {
        let key = meta.flow;

        let plan = match nat::resolve(&snap.services, &key) {
            Ok(plan) => plan,
            Err(NatError::NoBackendAvailable { vip }) => {
                incr!(self.stats.pipeline.no_backend);
                self.providers.log.log(
                    LogLevel::Warn,
                    &format!(
                        "{}: no backend for service {vip}, dropping {key}",
                        self.name
                    ),
                );
                return ControlFlow::Break(Outcome::drop(
                    DropReason::NoBackend { vip },
                    Some(key),
                    EventReason::NoBackend { vip },
                ));
            }
        };

        let post_key = plan.as_ref().map_or(key, |p| p.post_key);
        let eval =
            snap.policy.evaluate(dir, &post_key, &self.cfg.default_verdict);
        if eval.matched == MatchedBy::Default {
            incr!(self.stats.pipeline.policy_default);
        }

        if eval.verdict == Verdict::Deny {
            incr!(self.stats.pipeline.policy_deny);
            let (tier, rule) = snap.policy.describe(eval.matched);
            return ControlFlow::Break(Outcome::drop(
                DropReason::Policy { tier: tier.clone(), rule: rule.clone() },
                Some(key),
                EventReason::PolicyDeny { tier, rule },
            ));
        }
        incr!(self.stats.pipeline.policy_allow);

        let redirect = match dir {
            Direction::Out => snap.redirects.lookup(&post_key),
            Direction::In => None,
        };
        let state = ConnState::initial(meta.tcp_flags);
        let init = ConnInit {
            policy: PolicyInput { dir, flow: post_key },
            redirect,
            state,
            ttl: state.ttl(key.proto, &self.cfg.ttl),
            allowed_gen: Some(snap.generation),
            now,
        };

        let pair = ConnPair::new(key, plan.as_ref(), init);
        match self.ct.insert_pair(pair) {
            Ok(Inserted::New(entry)) => {
                incr!(self.stats.pipeline.ct_new);
                if plan.is_some() {
                    incr!(self.stats.pipeline.nat_translated);
                }
                ControlFlow::Continue((entry, EventReason::NewFlow))
            }

            // Lost a race with another packet of the same flow; carry
            // on with the winner's entry.
            Ok(Inserted::Existing(entry)) => {
                incr!(self.stats.pipeline.ct_race_lost);
                ControlFlow::Continue((entry, EventReason::Tracked))
            }

            Err(InsertError::TableFull(e)) => {
                incr!(self.stats.pipeline.table_full);
                self.providers.log.log(
                    LogLevel::Note,
                    &format!("{}: {e}, dropping {key}", self.name),
                );
                ControlFlow::Break(Outcome::drop(
                    DropReason::TableFull,
                    Some(key),
                    EventReason::TableFull,
                ))
            }

            Err(InsertError::Conflict { key: other }) => {
                incr!(self.stats.pipeline.flow_conflict);
                self.providers.log.log(
                    LogLevel::Warn,
                    &format!(
                        "{}: reply key {other} of {key} belongs to another flow",
                        self.name
                    ),
                );
                ControlFlow::Break(Outcome::drop(
                    DropReason::FlowConflict { key: other },
                    Some(key),
                    EventReason::FlowConflict,
                ))
            }
        }
    }

    /// Make sure the cached verdict of `entry` is from the current
    /// policy generation. If the current policy denies the connection,
    /// both halves are removed and the packet is dropped.
    fn revalidate(
        &self,
        meta: &PacketMeta,
        entry: &ConnEntry,
        snap: &Snapshot,
    ) -> Stage<()> {
        if entry.allowed_at(snap.generation) {
            return ControlFlow::Continue(());
        }

        incr!(self.stats.pipeline.revalidated);
        let input = entry.policy();
        let eval = snap.policy.evaluate(
            input.dir,
            &input.flow,
            &self.cfg.default_verdict,
        );

        match eval.verdict {
            Verdict::Allow => {
                entry.mark_allowed(snap.generation);
                if let Some(other) = self.ct.lookup(&entry.pair()) {
                    other.mark_allowed(snap.generation);
                }
                ControlFlow::Continue(())
            }

            Verdict::Deny => {
                incr!(self.stats.pipeline.revalidate_deny);
                self.ct.remove_pair(&entry.pair());
                let (tier, rule) = snap.policy.describe(eval.matched);
                ControlFlow::Break(Outcome::drop(
                    DropReason::Policy { tier, rule },
                    Some(meta.flow),
                    EventReason::Revalidated,
                ))
            }
        }
    }

    /// Refresh both halves of the connection and move them along the
    /// TCP state machine. Traffic in either direction keeps the whole
    /// connection alive.
    fn update_state(&self, meta: &PacketMeta, entry: &ConnEntry, now: Moment) {
        entry.touch(now);
        let other = self.ct.lookup(&entry.pair());
        if let Some(other) = &other {
            other.keep_alive(now);
        }

        let reply = entry.dir() == ConnDir::Reply;
        let Some(next) = entry.state().next(meta.tcp_flags, reply) else {
            return;
        };

        let ttl = next.ttl(meta.flow.proto, &self.cfg.ttl);
        entry.set_state(next, ttl);
        if let Some(other) = other {
            other.set_state(next, ttl);
        }
    }

    /// Apply the translation of `entry`, if any, and pick the final
    /// verdict.
    fn finish(
        &self,
        pkt: &mut [u8],
        meta: &PacketMeta,
        entry: &ConnEntry,
        reason: EventReason,
    ) -> Outcome {
        if let Some(rw) = entry.nat() {
            if let Err(e) = rewrite(pkt, meta, rw) {
                incr!(self.stats.pipeline.rewrite_error);
                return Outcome::drop(
                    DropReason::Rewrite(e),
                    Some(meta.flow),
                    EventReason::RewriteFailed,
                );
            }
        }

        let res = match entry.redirect() {
            Some(to) => ProcessResult::Redirect { to },
            None => ProcessResult::Forward,
        };
        Outcome::new(res, Some(meta.flow), reason)
    }

    fn record(&self, dir: Direction, out: &Outcome, now: Moment) {
        let stats = self.stats.dir(dir);
        match out.res {
            ProcessResult::Forward => incr!(stats.forward),
            ProcessResult::Drop { .. } => incr!(stats.drop),
            ProcessResult::Redirect { .. } => incr!(stats.redirect),
            ProcessResult::PassThrough => incr!(stats.pass_through),
        };

        self.providers.events.emit(VerdictEvent {
            ts_millis: now.raw_millis(),
            dir,
            flow: out.flow,
            disposition: out.res.disposition(),
            reason: out.reason.clone(),
        });
    }
}
