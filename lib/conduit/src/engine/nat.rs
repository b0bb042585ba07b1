// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Service NAT.
//!
//! Backend selection is a pure function of the service and the flow
//! key, so the connect-time balancer and the packet path always land
//! on the same backend for the same key. Once a connection exists
//! its translation lives in the connection table and is never
//! recomputed.

use super::service::Backend;
use super::service::Service;
use super::service::ServiceSnapshot;
use conduit_api::Endpoint;
use conduit_api::FlowKey;
use conduit_api::IpAddr;
use core::fmt;
use core::fmt::Display;
use crc32fast::Hasher;
use serde::Deserialize;
use serde::Serialize;

/// A stable 32-bit hash of `key`.
pub fn flow_hash(key: &FlowKey) -> u32 {
    let mut h = Hasher::new();
    h.update(&[u8::from(key.proto)]);
    hash_ip(&mut h, key.src);
    h.update(&key.src_port.to_be_bytes());
    hash_ip(&mut h, key.dst);
    h.update(&key.dst_port.to_be_bytes());
    h.finalize()
}

fn hash_ip(h: &mut Hasher, ip: IpAddr) {
    match ip {
        IpAddr::V4(ip) => h.update(&ip.octets()),
        IpAddr::V6(ip) => h.update(&ip.octets()),
    }
}

/// Pick a backend for `key` in proportion to backend weights.
///
/// Returns `None` when the service has no backend with a non-zero
/// weight.
pub fn select_backend<'a>(svc: &'a Service, key: &FlowKey) -> Option<&'a Backend> {
    let total = svc.total_weight();
    if total == 0 {
        return None;
    }

    let mut point = u64::from(flow_hash(key)) % total;
    for b in svc.backends() {
        let w = u64::from(b.weight);
        if point < w {
            return Some(b);
        }
        point -= w;
    }

    None
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NatField {
    Src,
    Dst,
}

/// The header rewrite applied to every packet matching one half of a
/// translated connection: replace endpoint `from` with `to` in
/// `field`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NatRewrite {
    pub field: NatField,
    pub from: Endpoint,
    pub to: Endpoint,
}

impl NatRewrite {
    /// The key of a packet after this rewrite.
    pub fn apply(&self, key: &FlowKey) -> FlowKey {
        match self.field {
            NatField::Src => key.with_src(self.to),
            NatField::Dst => key.with_dst(self.to),
        }
    }
}

impl Display for NatRewrite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let field = match self.field {
            NatField::Src => "SNAT",
            NatField::Dst => "DNAT",
        };
        write!(f, "{field} {} -> {}", self.from, self.to)
    }
}

/// The translation chosen for a new connection to a service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NatPlan {
    pub vip: Endpoint,
    pub backend: Endpoint,
    /// Applied to packets in the originating direction.
    pub fwd: NatRewrite,
    /// Applied to replies.
    pub rev: NatRewrite,
    /// The originating key after translation.
    pub post_key: FlowKey,
}

impl NatPlan {
    pub fn new(key: &FlowKey, backend: Endpoint) -> Self {
        let vip = key.dst_endpoint();
        let fwd = NatRewrite { field: NatField::Dst, from: vip, to: backend };
        let rev = NatRewrite { field: NatField::Src, from: backend, to: vip };
        Self { vip, backend, fwd, rev, post_key: fwd.apply(key) }
    }

    /// The key replies will carry.
    pub fn reply_key(&self) -> FlowKey {
        self.post_key.reversed()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum NatError {
    #[error("no backend available for {vip}")]
    NoBackendAvailable { vip: Endpoint },
}

/// Decide whether `key` addresses a service and, if so, which
/// backend it is translated to.
pub fn resolve(
    services: &ServiceSnapshot,
    key: &FlowKey,
) -> Result<Option<NatPlan>, NatError> {
    let vip = key.dst_endpoint();
    let Some(svc) = services.get(key.proto, &vip) else {
        return Ok(None);
    };

    match select_backend(svc, key) {
        Some(b) => Ok(Some(NatPlan::new(key, b.addr))),
        None => Err(NatError::NoBackendAvailable { vip }),
    }
}
