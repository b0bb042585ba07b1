// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::Endpoint;
use crate::IpAddr;
use crate::Protocol;

/// Errors raised while validating configuration or building tables.
///
/// Packet-level failures never surface as a `ConduitError`; they are
/// turned into a drop or pass-through verdict inside the engine.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConduitError {
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid port range: {0}")]
    InvalidPortRange(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("{proto} service {vip} is defined more than once")]
    DuplicateService { proto: Protocol, vip: Endpoint },

    #[error("service {vip}: only TCP and UDP services are supported")]
    UnsupportedServiceProtocol { vip: Endpoint },

    #[error("service {vip}: every backend has weight zero")]
    ZeroWeight { vip: Endpoint },

    #[error("endpoint address {0} is claimed by more than one endpoint")]
    DuplicateEndpoint(IpAddr),

    #[error("{what}: {count} exceeds maximum of {max}")]
    TooMany { what: String, count: usize, max: usize },

    #[error("conn table capacity must be non-zero")]
    ZeroCapacity,

    #[error("bad state: {0}")]
    BadState(String),
}
