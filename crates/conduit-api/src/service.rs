// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The serialized form of the service and redirect tables.

use crate::Endpoint;
use crate::IpCidr;
use crate::PortRange;
use crate::Protocol;
use serde::Deserialize;
use serde::Serialize;

/// Maximum number of backends behind a single service.
pub const MAX_BACKENDS: usize = 128;

/// Maximum number of services in a service table.
pub const MAX_SERVICES: usize = 16384;

/// Maximum number of redirect rules.
pub const MAX_REDIRECT_RULES: usize = 64;

fn default_weight() -> u32 {
    1
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BackendCfg {
    pub addr: Endpoint,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// A virtual address/port and the real endpoints serving it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceCfg {
    #[serde(default)]
    pub name: Option<String>,
    pub protocol: Protocol,
    pub vip: Endpoint,
    #[serde(default)]
    pub backends: Vec<BackendCfg>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ServiceTableCfg {
    pub services: Vec<ServiceCfg>,
}

/// Send egress traffic matching this rule to a local proxy.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RedirectRuleCfg {
    pub protocol: Protocol,
    #[serde(default)]
    pub dst_nets: Vec<IpCidr>,
    #[serde(default)]
    pub dst_ports: Vec<PortRange>,
    pub proxy: Endpoint,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RedirectCfg {
    pub rules: Vec<RedirectRuleCfg>,
}
