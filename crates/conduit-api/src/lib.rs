// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types shared between the conduit engine, its administration tool,
//! and whatever control plane feeds it tables.
//!
//! Everything in here is plain data: addressing, flow keys, the
//! serialized form of the policy/service/redirect tables, dataplane
//! configuration, and the verdict events emitted by the engine.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod ip;
pub mod policy;
pub mod service;

pub use config::*;
pub use error::*;
pub use event::*;
pub use flow::*;
pub use ip::*;
pub use policy::*;
pub use service::*;

/// The overall version of the API. Bump this whenever a type in this
/// crate changes shape, so that a table file written for one version
/// is not silently misread by another.
pub const API_VERSION: u64 = 3;

/// The direction of a packet relative to the workload it belongs to.
///
/// `In` is ingress (traffic arriving at a local endpoint), `Out` is
/// egress (traffic leaving one).
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Direction {
    In = 1,
    Out = 2,
}

impl Direction {
    pub fn cross(self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" | "ingress" => Ok(Direction::In),
            "out" | "egress" => Ok(Direction::Out),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        };

        write!(f, "{dirstr}")
    }
}
