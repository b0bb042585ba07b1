// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Tiered policy evaluation.
//!
//! Tiers are evaluated in order and, within a tier, rules are
//! evaluated in declared order. A rule applies to a packet when its
//! direction matches and its selector matches the local endpoint:
//! the source on egress, the (post-translation) destination on
//! ingress. The first applicable rule whose predicates hold decides:
//! `Allow` and `Deny` end evaluation, `NextTier` skips the rest of
//! the current tier. Traffic matching nothing gets the default
//! verdict for its direction.

use super::rule::Finalized;
use super::rule::Rule;
use conduit_api::ConduitError;
use conduit_api::DefaultVerdicts;
use conduit_api::Direction;
use conduit_api::EndpointCfg;
use conduit_api::FlowKey;
use conduit_api::IpAddr;
use conduit_api::MAX_ENDPOINTS;
use conduit_api::MAX_RULES_PER_TIER;
use conduit_api::MAX_TIERS;
use conduit_api::PolicyTableCfg;
use conduit_api::RuleAction;
use conduit_api::Verdict;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct Tier {
    name: String,
    rules: Vec<Rule<Finalized>>,
}

/// The outcome of evaluating a single tier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TierResult {
    Verdict { verdict: Verdict, rule: usize },
    NextTier { rule: usize },
    NoMatch,
}

impl Tier {
    pub fn new(name: impl Into<String>, rules: Vec<Rule<Finalized>>) -> Self {
        Self { name: name.into(), rules }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule<Finalized>] {
        &self.rules
    }

    pub fn evaluate(
        &self,
        dir: Direction,
        flow: &FlowKey,
        local: Option<&EndpointCfg>,
    ) -> TierResult {
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.dir() != dir
                || !rule.selector().matches(local)
                || !rule.is_match(flow)
            {
                continue;
            }

            return match rule.action() {
                RuleAction::Allow => {
                    TierResult::Verdict { verdict: Verdict::Allow, rule: i }
                }
                RuleAction::Deny => {
                    TierResult::Verdict { verdict: Verdict::Deny, rule: i }
                }
                RuleAction::NextTier => TierResult::NextTier { rule: i },
            };
        }

        TierResult::NoMatch
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchedBy {
    Rule { tier: usize, rule: usize },
    Default,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub matched: MatchedBy,
}

/// The policy table: known endpoints and ordered tiers of rules.
#[derive(Clone, Debug, Default)]
pub struct PolicySnapshot {
    endpoints: Vec<EndpointCfg>,
    by_addr: BTreeMap<IpAddr, usize>,
    tiers: Vec<Tier>,
}

impl PolicySnapshot {
    pub fn new(cfg: &PolicyTableCfg) -> Result<Self, ConduitError> {
        if cfg.tiers.len() > MAX_TIERS {
            return Err(ConduitError::TooMany {
                what: "tiers".to_string(),
                count: cfg.tiers.len(),
                max: MAX_TIERS,
            });
        }

        if cfg.endpoints.len() > MAX_ENDPOINTS {
            return Err(ConduitError::TooMany {
                what: "endpoints".to_string(),
                count: cfg.endpoints.len(),
                max: MAX_ENDPOINTS,
            });
        }

        let mut by_addr = BTreeMap::new();
        for (i, ep) in cfg.endpoints.iter().enumerate() {
            for addr in &ep.addrs {
                if by_addr.insert(*addr, i).is_some() {
                    return Err(ConduitError::DuplicateEndpoint(*addr));
                }
            }
        }

        let mut tiers = Vec::with_capacity(cfg.tiers.len());
        for tier in &cfg.tiers {
            if tier.rules.len() > MAX_RULES_PER_TIER {
                return Err(ConduitError::TooMany {
                    what: format!("tier {} rules", tier.name),
                    count: tier.rules.len(),
                    max: MAX_RULES_PER_TIER,
                });
            }

            let rules = tier.rules.iter().map(Rule::from).collect();
            tiers.push(Tier::new(tier.name.as_str(), rules));
        }

        Ok(Self { endpoints: cfg.endpoints.clone(), by_addr, tiers })
    }

    pub fn endpoint(&self, ip: &IpAddr) -> Option<&EndpointCfg> {
        self.by_addr.get(ip).map(|i| &self.endpoints[*i])
    }

    pub fn endpoints(&self) -> &[EndpointCfg] {
        &self.endpoints
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Decide the fate of a new connection `flow` seen travelling in
    /// direction `dir`. For translated connections `flow` is the key
    /// after translation.
    pub fn evaluate(
        &self,
        dir: Direction,
        flow: &FlowKey,
        defaults: &DefaultVerdicts,
    ) -> Evaluation {
        let local_ip = match dir {
            Direction::In => flow.dst,
            Direction::Out => flow.src,
        };
        let local = self.endpoint(&local_ip);

        for (t, tier) in self.tiers.iter().enumerate() {
            match tier.evaluate(dir, flow, local) {
                TierResult::Verdict { verdict, rule } => {
                    return Evaluation {
                        verdict,
                        matched: MatchedBy::Rule { tier: t, rule },
                    };
                }
                TierResult::NextTier { .. } | TierResult::NoMatch => continue,
            }
        }

        Evaluation { verdict: defaults.get(dir), matched: MatchedBy::Default }
    }

    /// Names of the tier and rule behind `matched`, for reporting.
    pub fn describe(&self, matched: MatchedBy) -> (Option<String>, Option<String>) {
        match matched {
            MatchedBy::Default => (None, None),
            MatchedBy::Rule { tier, rule } => {
                let Some(t) = self.tiers.get(tier) else {
                    return (None, None);
                };
                let rule_name = t.rules.get(rule).map(|r| match r.name() {
                    Some(name) => name.to_string(),
                    None => format!("#{rule}"),
                });
                (Some(t.name.clone()), rule_name)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use conduit_api::Protocol;
    use conduit_api::RuleCfg;
    use conduit_api::RuleMatchCfg;
    use conduit_api::Selector;
    use conduit_api::TierCfg;

    fn rule(dir: Direction, action: RuleAction, m: RuleMatchCfg) -> RuleCfg {
        RuleCfg { name: None, direction: dir, selector: Selector::All, action, matches: m }
    }

    fn flow(src: &str, dst: &str) -> FlowKey {
        FlowKey::new(Protocol::TCP, src.parse().unwrap(), dst.parse().unwrap())
    }

    #[test]
    fn no_tiers_uses_default() {
        let snap = PolicySnapshot::default();
        let defaults = DefaultVerdicts { ingress: Verdict::Deny, egress: Verdict::Allow };
        let f = flow("10.0.0.1:4000", "10.0.0.2:80");
        assert_eq!(snap.evaluate(Direction::In, &f, &defaults).verdict, Verdict::Deny);
        let ev = snap.evaluate(Direction::Out, &f, &defaults);
        assert_eq!(ev, Evaluation { verdict: Verdict::Allow, matched: MatchedBy::Default });
    }

    #[test]
    fn direction_filters_rules() {
        let cfg = PolicyTableCfg {
            endpoints: vec![],
            tiers: vec![TierCfg {
                name: "t".to_string(),
                rules: vec![rule(Direction::Out, RuleAction::Allow, RuleMatchCfg::default())],
            }],
        };
        let snap = PolicySnapshot::new(&cfg).unwrap();
        let f = flow("10.0.0.1:4000", "10.0.0.2:80");
        let d = DefaultVerdicts::default();
        assert_eq!(snap.evaluate(Direction::In, &f, &d).matched, MatchedBy::Default);
        assert_eq!(
            snap.evaluate(Direction::Out, &f, &d).matched,
            MatchedBy::Rule { tier: 0, rule: 0 }
        );
    }

    #[test]
    fn selector_uses_local_endpoint() {
        let cfg = PolicyTableCfg {
            endpoints: vec![EndpointCfg {
                name: "db-0".to_string(),
                addrs: vec!["10.0.2.7".parse().unwrap()],
                labels: Default::default(),
            }],
            tiers: vec![TierCfg {
                name: "app".to_string(),
                rules: vec![RuleCfg {
                    name: Some("db-in".to_string()),
                    direction: Direction::In,
                    selector: Selector::Name("db-0".to_string()),
                    action: RuleAction::Allow,
                    matches: RuleMatchCfg::default(),
                }],
            }],
        };
        let snap = PolicySnapshot::new(&cfg).unwrap();
        let d = DefaultVerdicts::default();

        let to_db = flow("10.0.0.1:4000", "10.0.2.7:5432");
        let ev = snap.evaluate(Direction::In, &to_db, &d);
        assert_eq!(ev.verdict, Verdict::Allow);
        assert_eq!(
            snap.describe(ev.matched),
            (Some("app".to_string()), Some("db-in".to_string()))
        );

        // On ingress the source is remote; the selector never sees it.
        let from_db = to_db.reversed();
        assert_eq!(snap.evaluate(Direction::In, &from_db, &d).verdict, Verdict::Deny);
    }

    #[test]
    fn duplicate_endpoint_addr() {
        let ep = EndpointCfg {
            name: "a".to_string(),
            addrs: vec!["10.0.0.1".parse().unwrap()],
            labels: Default::default(),
        };
        let cfg = PolicyTableCfg { endpoints: vec![ep.clone(), ep], tiers: vec![] };
        assert!(matches!(
            PolicySnapshot::new(&cfg),
            Err(ConduitError::DuplicateEndpoint(_))
        ));
    }
}
