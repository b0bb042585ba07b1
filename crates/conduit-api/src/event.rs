// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::Direction;
use crate::Endpoint;
use crate::FlowKey;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// What happened to a packet.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Forward,
    Drop,
    Redirect,
    PassThrough,
}

impl Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Forward => "FORWARD",
            Self::Drop => "DROP",
            Self::Redirect => "REDIRECT",
            Self::PassThrough => "PASS",
        };
        write!(f, "{s}")
    }
}

/// Why it happened.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventReason {
    /// The packet matched an established connection.
    Tracked,
    /// Policy allowed a new connection, which is now tracked.
    NewFlow,
    /// A tracked connection was denied by a newer policy table.
    Revalidated,
    FastPathDeny,
    Failsafe,
    ParseError,
    Unsupported,
    TableFull,
    NoBackend { vip: Endpoint },
    FlowConflict,
    RewriteFailed,
    /// Denied by policy. `tier` and `rule` are absent when the
    /// default verdict applied.
    PolicyDeny {
        tier: Option<String>,
        rule: Option<String>,
    },
}

impl Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tracked => write!(f, "tracked"),
            Self::NewFlow => write!(f, "new flow"),
            Self::Revalidated => write!(f, "revalidated"),
            Self::FastPathDeny => write!(f, "fast-path deny"),
            Self::Failsafe => write!(f, "failsafe"),
            Self::ParseError => write!(f, "parse error"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::TableFull => write!(f, "table full"),
            Self::NoBackend { vip } => write!(f, "no backend for {vip}"),
            Self::FlowConflict => write!(f, "flow conflict"),
            Self::RewriteFailed => write!(f, "rewrite failed"),
            Self::PolicyDeny { tier: None, .. } => write!(f, "default deny"),
            Self::PolicyDeny { tier: Some(tier), rule } => {
                write!(f, "denied by {tier}/{}", rule.as_deref().unwrap_or("-"))
            }
        }
    }
}

/// A record of one dataplane decision.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VerdictEvent {
    /// Milliseconds since the dataplane started.
    pub ts_millis: u64,
    pub dir: Direction,
    /// Absent when the packet never got far enough to produce a key.
    pub flow: Option<FlowKey>,
    pub disposition: Disposition,
    pub reason: EventReason,
}
