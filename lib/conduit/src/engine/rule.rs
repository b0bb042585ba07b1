// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Policy rules.
//!
//! A rule is built in the [`Ready`] state, where predicates may be
//! added, and then finalized. Only a [`Finalized`] rule can be placed
//! in a tier and matched against traffic.

use super::predicate::IpAddrMatch;
use super::predicate::IpProtoMatch;
use super::predicate::Predicate;
use conduit_api::Direction;
use conduit_api::FlowKey;
use conduit_api::RuleAction;
use conduit_api::RuleCfg;
use conduit_api::Selector;
use core::fmt;
use core::fmt::Display;
use itertools::Itertools;

pub trait RuleState {}

#[derive(Clone, Debug)]
pub struct Ready {
    preds: Vec<Predicate>,
}

impl RuleState for Ready {}

#[derive(Clone, Debug)]
pub struct Finalized {
    // `None` matches every flow.
    preds: Option<Vec<Predicate>>,
}

impl RuleState for Finalized {}

#[derive(Clone, Debug)]
pub struct Rule<S: RuleState> {
    state: S,
    name: Option<String>,
    dir: Direction,
    selector: Selector,
    action: RuleAction,
}

impl<S: RuleState> Rule<S> {
    pub fn action(&self) -> RuleAction {
        self.action
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Rule<Ready> {
    /// Create a new rule applying to every endpoint in direction
    /// `dir`, with no predicates.
    pub fn new(dir: Direction, action: RuleAction) -> Self {
        Rule {
            state: Ready { preds: vec![] },
            name: None,
            dir,
            selector: Selector::All,
            action,
        }
    }

    /// Create a rule which matches all traffic in direction `dir`.
    pub fn match_any(dir: Direction, action: RuleAction) -> Rule<Finalized> {
        Rule::new(dir, action).finalize()
    }

    pub fn add_predicate(&mut self, pred: Predicate) {
        self.state.preds.push(pred);
    }

    pub fn add_predicates(&mut self, preds: Vec<Predicate>) {
        self.state.preds.extend(preds);
    }

    pub fn set_selector(&mut self, selector: Selector) {
        self.selector = selector;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn finalize(self) -> Rule<Finalized> {
        let preds = if self.state.preds.is_empty() {
            None
        } else {
            Some(self.state.preds)
        };

        Rule {
            state: Finalized { preds },
            name: self.name,
            dir: self.dir,
            selector: self.selector,
            action: self.action,
        }
    }
}

impl Rule<Finalized> {
    /// Do the rule's header predicates all hold for `flow`?
    pub fn is_match(&self, flow: &FlowKey) -> bool {
        match &self.state.preds {
            None => true,
            Some(preds) => preds.iter().all(|p| p.is_match(flow)),
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        self.state.preds.as_deref().unwrap_or(&[])
    }
}

impl From<&RuleCfg> for Rule<Finalized> {
    fn from(cfg: &RuleCfg) -> Self {
        let m = &cfg.matches;
        let mut rule = Rule::new(cfg.direction, cfg.action);
        rule.set_selector(cfg.selector.clone());
        if let Some(name) = &cfg.name {
            rule.set_name(name.as_str());
        }

        if !m.protocols.is_empty() {
            rule.add_predicate(Predicate::IpProto(
                m.protocols.iter().copied().map(IpProtoMatch::Exact).collect(),
            ));
        }

        let nets = |list: &[conduit_api::IpCidr]| -> Vec<IpAddrMatch> {
            list.iter().copied().map(IpAddrMatch::from).collect()
        };

        if !m.src_nets.is_empty() {
            rule.add_predicate(Predicate::SrcIp(nets(&m.src_nets)));
        }

        if !m.not_src_nets.is_empty() {
            rule.add_predicate(Predicate::Not(Box::new(Predicate::SrcIp(nets(
                &m.not_src_nets,
            )))));
        }

        if !m.dst_nets.is_empty() {
            rule.add_predicate(Predicate::DstIp(nets(&m.dst_nets)));
        }

        if !m.not_dst_nets.is_empty() {
            rule.add_predicate(Predicate::Not(Box::new(Predicate::DstIp(nets(
                &m.not_dst_nets,
            )))));
        }

        if !m.src_ports.is_empty() {
            rule.add_predicate(Predicate::SrcPort(
                m.src_ports.iter().copied().map(Into::into).collect(),
            ));
        }

        if !m.dst_ports.is_empty() {
            rule.add_predicate(Predicate::DstPort(
                m.dst_ports.iter().copied().map(Into::into).collect(),
            ));
        }

        rule.finalize()
    }
}

impl Display for Rule<Finalized> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preds = match &self.state.preds {
            None => "*".to_string(),
            Some(preds) => preds.iter().join(" "),
        };
        write!(f, "{} {} [{}] {}", self.dir, self.action, self.selector, preds)
    }
}
