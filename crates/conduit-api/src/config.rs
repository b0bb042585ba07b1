// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Dataplane configuration.
//!
//! Unlike the tables, which the control plane swaps at runtime, these
//! values are fixed when the dataplane is built.

use crate::Direction;
use crate::IpCidr;
use crate::PolicyTableCfg;
use crate::PortRange;
use crate::RedirectCfg;
use crate::ServiceTableCfg;
use crate::Verdict;
use serde::Deserialize;
use serde::Serialize;

pub const DEFAULT_CONN_TABLE_CAPACITY: u32 = 65536;
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 10;

/// Maximum number of prefixes in the fast-path deny list.
pub const MAX_DENY_SOURCES: usize = 1024;

/// Idle timeouts, in seconds, by protocol and connection state.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TtlCfg {
    pub tcp_syn: u64,
    pub tcp_established: u64,
    pub tcp_closing: u64,
    pub udp: u64,
    pub icmp: u64,
    pub other: u64,
}

impl Default for TtlCfg {
    fn default() -> Self {
        Self {
            tcp_syn: 20,
            tcp_established: 3600,
            tcp_closing: 10,
            udp: 60,
            icmp: 5,
            other: 60,
        }
    }
}

/// The verdict applied when no policy rule matches, per direction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct DefaultVerdicts {
    pub ingress: Verdict,
    pub egress: Verdict,
}

impl DefaultVerdicts {
    pub fn get(&self, dir: Direction) -> Verdict {
        match dir {
            Direction::In => self.ingress,
            Direction::Out => self.egress,
        }
    }
}

impl Default for DefaultVerdicts {
    fn default() -> Self {
        Self { ingress: Verdict::Deny, egress: Verdict::Deny }
    }
}

/// What to do with a packet that cannot be parsed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorPolicy {
    #[default]
    Drop,
    PassThrough,
}

/// What to do with a well-formed packet the dataplane does not track,
/// e.g. ARP or IPv6 with extension headers.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedPolicy {
    #[default]
    PassThrough,
    Drop,
}

/// Checks applied before full parsing.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct FastPathCfg {
    /// Sources dropped unconditionally.
    pub deny_sources: Vec<IpCidr>,
    /// Destination ports always accepted on ingress.
    pub failsafe_in: Vec<PortRange>,
    /// Destination ports always accepted on egress.
    pub failsafe_out: Vec<PortRange>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct DataplaneCfg {
    pub conn_table_capacity: u32,
    pub ttl: TtlCfg,
    pub default_verdict: DefaultVerdicts,
    pub on_parse_error: ParseErrorPolicy,
    pub on_unsupported: UnsupportedPolicy,
    pub fast_path: FastPathCfg,
    pub reaper_interval_secs: u64,
}

impl Default for DataplaneCfg {
    fn default() -> Self {
        Self {
            conn_table_capacity: DEFAULT_CONN_TABLE_CAPACITY,
            ttl: TtlCfg::default(),
            default_verdict: DefaultVerdicts::default(),
            on_parse_error: ParseErrorPolicy::default(),
            on_unsupported: UnsupportedPolicy::default(),
            fast_path: FastPathCfg::default(),
            reaper_interval_secs: DEFAULT_REAPER_INTERVAL_SECS,
        }
    }
}

/// The three control-plane tables.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TablesCfg {
    pub policy: PolicyTableCfg,
    pub services: ServiceTableCfg,
    pub redirects: RedirectCfg,
}

/// A complete configuration file: dataplane settings plus the
/// initial tables.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ConduitCfg {
    pub dataplane: DataplaneCfg,
    pub tables: TablesCfg,
}
