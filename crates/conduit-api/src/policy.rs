// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The serialized form of the policy table.

use crate::Direction;
use crate::IpAddr;
use crate::IpCidr;
use crate::PortRange;
use crate::Protocol;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Maximum number of tiers in a policy table.
pub const MAX_TIERS: usize = 32;

/// Maximum number of rules in a single tier.
pub const MAX_RULES_PER_TIER: usize = 256;

/// Maximum number of endpoints a policy table may describe.
pub const MAX_ENDPOINTS: usize = 4096;

/// The outcome of policy evaluation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
        };
        write!(f, "{s}")
    }
}

/// What a matching rule does with a flow.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
    /// Stop evaluating the current tier and continue with the next.
    NextTier,
}

impl Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
            Self::NextTier => "NEXT-TIER",
        };
        write!(f, "{s}")
    }
}

/// A workload known to the policy table.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EndpointCfg {
    pub name: String,
    pub addrs: Vec<IpAddr>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Chooses the local endpoints a rule applies to.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Every endpoint, including addresses the table does not know.
    #[default]
    All,
    /// The endpoint with this name.
    Name(String),
    /// Endpoints carrying every one of these labels.
    Labels(BTreeMap<String, String>),
}

impl Selector {
    pub fn matches(&self, ep: Option<&EndpointCfg>) -> bool {
        match (self, ep) {
            (Self::All, _) => true,
            (_, None) => false,
            (Self::Name(name), Some(ep)) => ep.name == *name,
            (Self::Labels(want), Some(ep)) => want
                .iter()
                .all(|(k, v)| ep.labels.get(k).is_some_and(|have| have == v)),
        }
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::All => write!(f, "all()"),
            Self::Name(name) => write!(f, "name == {name}"),
            Self::Labels(labels) => {
                let mut first = true;
                for (k, v) in labels {
                    if !first {
                        write!(f, " && ")?;
                    }
                    write!(f, "{k} == {v}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// Header criteria of a rule. An empty list matches anything; a
/// non-empty list matches if any one element does. All criteria must
/// hold for the rule to match.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RuleMatchCfg {
    pub protocols: Vec<Protocol>,
    pub src_nets: Vec<IpCidr>,
    pub not_src_nets: Vec<IpCidr>,
    pub dst_nets: Vec<IpCidr>,
    pub not_dst_nets: Vec<IpCidr>,
    pub src_ports: Vec<PortRange>,
    pub dst_ports: Vec<PortRange>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RuleCfg {
    #[serde(default)]
    pub name: Option<String>,
    pub direction: Direction,
    #[serde(default)]
    pub selector: Selector,
    pub action: RuleAction,
    #[serde(default, rename = "match")]
    pub matches: RuleMatchCfg,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TierCfg {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleCfg>,
}

/// The complete policy table as delivered by the control plane.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PolicyTableCfg {
    pub endpoints: Vec<EndpointCfg>,
    pub tiers: Vec<TierCfg>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn web() -> EndpointCfg {
        EndpointCfg {
            name: "web-0".to_string(),
            addrs: vec!["10.0.0.5".parse().unwrap()],
            labels: [
                ("app".to_string(), "web".to_string()),
                ("tier".to_string(), "frontend".to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn selector_matching() {
        let ep = web();
        assert!(Selector::All.matches(None));
        assert!(Selector::Name("web-0".to_string()).matches(Some(&ep)));
        assert!(!Selector::Name("db-0".to_string()).matches(Some(&ep)));
        assert!(!Selector::Name("web-0".to_string()).matches(None));

        let sel = Selector::Labels(
            [("app".to_string(), "web".to_string())].into_iter().collect(),
        );
        assert!(sel.matches(Some(&ep)));

        let sel = Selector::Labels(
            [("app".to_string(), "db".to_string())].into_iter().collect(),
        );
        assert!(!sel.matches(Some(&ep)));
    }

    #[test]
    fn policy_table_from_toml() {
        let text = r#"
            [[endpoints]]
            name = "web-0"
            addrs = ["10.0.0.5"]
            labels = { app = "web" }

            [[tiers]]
            name = "security"

            [[tiers.rules]]
            direction = "In"
            action = "deny"
            match = { src_nets = ["192.168.0.0/16"] }

            [[tiers.rules]]
            direction = "In"
            action = "next_tier"

            [[tiers]]
            name = "application"

            [[tiers.rules]]
            name = "web-http"
            direction = "In"
            selector = { labels = { app = "web" } }
            action = "allow"
            match = { protocols = ["TCP"], dst_ports = ["80", "8000-8080"] }
        "#;

        let cfg: PolicyTableCfg = toml::from_str(text).unwrap();
        assert_eq!(cfg.endpoints.len(), 1);
        assert_eq!(cfg.tiers.len(), 2);
        assert_eq!(cfg.tiers[0].rules[1].action, RuleAction::NextTier);
        assert_eq!(cfg.tiers[0].rules[1].selector, Selector::All);

        let rule = &cfg.tiers[1].rules[0];
        assert_eq!(rule.name.as_deref(), Some("web-http"));
        assert_eq!(rule.matches.protocols, vec![Protocol::TCP]);
        assert!(rule.matches.dst_ports[1].contains(8042));
    }
}
