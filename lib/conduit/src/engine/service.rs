// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Validated, lookup-ready forms of the service and redirect tables.

use conduit_api::ConduitError;
use conduit_api::Endpoint;
use conduit_api::FlowKey;
use conduit_api::IpCidr;
use conduit_api::MAX_BACKENDS;
use conduit_api::MAX_REDIRECT_RULES;
use conduit_api::MAX_SERVICES;
use conduit_api::PortRange;
use conduit_api::Protocol;
use conduit_api::RedirectCfg;
use conduit_api::ServiceCfg;
use conduit_api::ServiceTableCfg;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backend {
    pub addr: Endpoint,
    pub weight: u32,
}

#[derive(Clone, Debug)]
pub struct Service {
    pub name: Option<String>,
    pub proto: Protocol,
    pub vip: Endpoint,
    backends: Vec<Backend>,
    total_weight: u64,
}

impl Service {
    fn new(cfg: &ServiceCfg) -> Result<Self, ConduitError> {
        let vip = cfg.vip;

        if !cfg.protocol.has_ports() {
            return Err(ConduitError::UnsupportedServiceProtocol { vip });
        }

        if cfg.backends.len() > MAX_BACKENDS {
            return Err(ConduitError::TooMany {
                what: format!("service {vip} backends"),
                count: cfg.backends.len(),
                max: MAX_BACKENDS,
            });
        }

        let mut backends = Vec::with_capacity(cfg.backends.len());
        for b in &cfg.backends {
            if b.addr.ip.is_ipv6() != vip.ip.is_ipv6() {
                return Err(ConduitError::InvalidEndpoint(format!(
                    "backend {} does not share an address family with {vip}",
                    b.addr
                )));
            }
            backends.push(Backend { addr: b.addr, weight: b.weight });
        }

        let total_weight = backends.iter().map(|b| u64::from(b.weight)).sum();
        if !backends.is_empty() && total_weight == 0 {
            return Err(ConduitError::ZeroWeight { vip });
        }

        Ok(Self {
            name: cfg.name.clone(),
            proto: cfg.protocol,
            vip,
            backends,
            total_weight,
        })
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }
}

/// The service table, keyed on protocol and virtual endpoint.
#[derive(Clone, Debug, Default)]
pub struct ServiceSnapshot {
    services: BTreeMap<(Protocol, Endpoint), Service>,
}

impl ServiceSnapshot {
    pub fn new(cfg: &ServiceTableCfg) -> Result<Self, ConduitError> {
        if cfg.services.len() > MAX_SERVICES {
            return Err(ConduitError::TooMany {
                what: "services".to_string(),
                count: cfg.services.len(),
                max: MAX_SERVICES,
            });
        }

        let mut services = BTreeMap::new();
        for svc_cfg in &cfg.services {
            let svc = Service::new(svc_cfg)?;
            let key = (svc.proto, svc.vip);
            if services.insert(key, svc).is_some() {
                return Err(ConduitError::DuplicateService {
                    proto: key.0,
                    vip: key.1,
                });
            }
        }

        Ok(Self { services })
    }

    pub fn get(&self, proto: Protocol, vip: &Endpoint) -> Option<&Service> {
        self.services.get(&(proto, *vip))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }
}

#[derive(Clone, Debug)]
pub struct RedirectRule {
    pub proto: Protocol,
    pub dst_nets: Vec<IpCidr>,
    pub dst_ports: Vec<PortRange>,
    pub proxy: Endpoint,
}

impl RedirectRule {
    pub fn is_match(&self, flow: &FlowKey) -> bool {
        flow.proto == self.proto
            && (self.dst_nets.is_empty()
                || self.dst_nets.iter().any(|n| n.is_member(flow.dst)))
            && (self.dst_ports.is_empty()
                || self.dst_ports.iter().any(|r| r.contains(flow.dst_port)))
    }
}

/// Egress redirect rules, checked in order.
#[derive(Clone, Debug, Default)]
pub struct RedirectSnapshot {
    rules: Vec<RedirectRule>,
}

impl RedirectSnapshot {
    pub fn new(cfg: &RedirectCfg) -> Result<Self, ConduitError> {
        if cfg.rules.len() > MAX_REDIRECT_RULES {
            return Err(ConduitError::TooMany {
                what: "redirect rules".to_string(),
                count: cfg.rules.len(),
                max: MAX_REDIRECT_RULES,
            });
        }

        let rules = cfg
            .rules
            .iter()
            .map(|r| RedirectRule {
                proto: r.protocol,
                dst_nets: r.dst_nets.clone(),
                dst_ports: r.dst_ports.clone(),
                proxy: r.proxy,
            })
            .collect();

        Ok(Self { rules })
    }

    /// The proxy that egress `flow` should be handed to, if any.
    pub fn lookup(&self, flow: &FlowKey) -> Option<Endpoint> {
        self.rules.iter().find(|r| r.is_match(flow)).map(|r| r.proxy)
    }

    pub fn rules(&self) -> &[RedirectRule] {
        &self.rules
    }
}
