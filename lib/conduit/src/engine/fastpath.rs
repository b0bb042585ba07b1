// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Checks made before a packet is fully parsed.
//!
//! A source on the deny list is dropped outright. A packet to a
//! failsafe port is forwarded without policy or tracking, so that
//! a broken policy table can never cut off management access.

use super::parse::peek;
use conduit_api::ConduitError;
use conduit_api::Direction;
use conduit_api::FastPathCfg;
use conduit_api::IpCidr;
use conduit_api::MAX_DENY_SOURCES;
use conduit_api::PROTO_TCP;
use conduit_api::PROTO_UDP;
use conduit_api::PortRange;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FastPathResult {
    /// Continue with the full pipeline.
    Continue,
    Deny,
    Failsafe,
}

#[derive(Clone, Debug, Default)]
pub struct FastPath {
    deny: Vec<IpCidr>,
    failsafe_in: Vec<PortRange>,
    failsafe_out: Vec<PortRange>,
}

impl FastPath {
    pub fn new(cfg: &FastPathCfg) -> Result<Self, ConduitError> {
        if cfg.deny_sources.len() > MAX_DENY_SOURCES {
            return Err(ConduitError::TooMany {
                what: "deny sources".to_string(),
                count: cfg.deny_sources.len(),
                max: MAX_DENY_SOURCES,
            });
        }

        Ok(Self {
            deny: cfg.deny_sources.clone(),
            failsafe_in: cfg.failsafe_in.clone(),
            failsafe_out: cfg.failsafe_out.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.deny.is_empty()
            && self.failsafe_in.is_empty()
            && self.failsafe_out.is_empty()
    }

    pub fn check(&self, dir: Direction, pkt: &[u8]) -> FastPathResult {
        if self.is_empty() {
            return FastPathResult::Continue;
        }

        let Some(p) = peek(pkt) else {
            return FastPathResult::Continue;
        };

        if self.deny.iter().any(|cidr| cidr.is_member(p.src)) {
            return FastPathResult::Deny;
        }

        let failsafe = match dir {
            Direction::In => &self.failsafe_in,
            Direction::Out => &self.failsafe_out,
        };

        match (p.proto, p.dst_port) {
            (PROTO_TCP | PROTO_UDP, Some(port))
                if failsafe.iter().any(|r| r.contains(port)) =>
            {
                FastPathResult::Failsafe
            }

            _ => FastPathResult::Continue,
        }
    }
}
