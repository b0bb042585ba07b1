// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Connect-time load balancing.
//!
//! When a local process connects to a service address the backend is
//! chosen before the first packet exists, using the same selection as
//! the packet path, and the connection is installed in the table with
//! its translation already filled in. The packet path then finds the
//! entry and only rewrites.
//!
//! Policy is not consulted here. The installed pair carries no cached
//! verdict, so the first packet evaluates policy as usual and removes
//! the pair if it is denied. Redirects are resolved as for an egress
//! packet.

use super::conn_table::ConnInit;
use super::conn_table::ConnPair;
use super::conn_table::ConnTable;
use super::conn_table::InsertError;
use super::conn_table::Inserted;
use super::conn_table::PolicyInput;
use super::nat;
use super::nat::NatError;
use super::snapshot::Tables;
use super::stat::ConnectStats;
use super::stat::incr;
use super::tcp_state::ConnState;
use crate::ddi::time::Moment;
use crate::provider::LogLevel;
use crate::provider::Providers;
use conduit_api::Direction;
use conduit_api::Endpoint;
use conduit_api::FlowKey;
use conduit_api::Protocol;
use conduit_api::TtlCfg;
use std::sync::Arc;

/// A local process wants to connect from `src` to `dst`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectRequest {
    pub proto: Protocol,
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl ConnectRequest {
    pub fn key(&self) -> FlowKey {
        FlowKey::new(self.proto, self.src, self.dst)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectOutcome {
    /// `dst` is not a service; the connection proceeds untouched.
    NotService,
    /// The connection to the service will be carried by `backend`.
    Translated { backend: Endpoint },
}

/// The connection attempt must fail before any packet is sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConnectError {
    #[error("no backend available for {vip}")]
    NoBackendAvailable { vip: Endpoint },

    #[error("connection table full")]
    TableFull,

    #[error("reply key {key} belongs to another connection")]
    Conflict { key: FlowKey },
}

pub struct ConnectTimeLb {
    tables: Arc<Tables>,
    ct: Arc<ConnTable>,
    ttl: TtlCfg,
    providers: Arc<Providers>,
    stats: ConnectStats,
}

impl ConnectTimeLb {
    pub fn new(
        tables: Arc<Tables>,
        ct: Arc<ConnTable>,
        ttl: TtlCfg,
        providers: Arc<Providers>,
    ) -> Self {
        Self { tables, ct, ttl, providers, stats: ConnectStats::default() }
    }

    pub fn stats(&self) -> &ConnectStats {
        &self.stats
    }

    pub fn connect(
        &self,
        req: ConnectRequest,
    ) -> Result<ConnectOutcome, ConnectError> {
        self.connect_at(req, Moment::now())
    }

    pub fn connect_at(
        &self,
        req: ConnectRequest,
        now: Moment,
    ) -> Result<ConnectOutcome, ConnectError> {
        let key = req.key();
        let snap = self.tables.load();

        let plan = match nat::resolve(&snap.services, &key) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                incr!(self.stats.not_service);
                return Ok(ConnectOutcome::NotService);
            }
            Err(NatError::NoBackendAvailable { vip }) => {
                incr!(self.stats.no_backend);
                self.providers.log.log(
                    LogLevel::Warn,
                    &format!("connect {key}: no backend for service {vip}"),
                );
                return Err(ConnectError::NoBackendAvailable { vip });
            }
        };

        // A connection is installed with the state its first packet
        // would give it; for TCP that packet is a SYN.
        let state = match req.proto {
            Protocol::TCP => ConnState::SynSent,
            _ => ConnState::Datagram,
        };
        let init = ConnInit {
            policy: PolicyInput { dir: Direction::Out, flow: plan.post_key },
            redirect: snap.redirects.lookup(&plan.post_key),
            state,
            ttl: state.ttl(req.proto, &self.ttl),
            allowed_gen: None,
            now,
        };

        match self.ct.insert_pair(ConnPair::new(key, Some(&plan), init)) {
            Ok(Inserted::New(_)) => {
                incr!(self.stats.resolved);
                Ok(ConnectOutcome::Translated { backend: plan.backend })
            }

            // Already installed, by an earlier call or by a packet.
            // Report the translation in place rather than the one just
            // computed.
            Ok(Inserted::Existing(entry)) => {
                incr!(self.stats.reused);
                let backend = match entry.nat() {
                    Some(rw) => rw.to,
                    None => plan.backend,
                };
                Ok(ConnectOutcome::Translated { backend })
            }

            Err(InsertError::TableFull(_)) => {
                incr!(self.stats.table_full);
                Err(ConnectError::TableFull)
            }

            Err(InsertError::Conflict { key }) => {
                incr!(self.stats.conflict);
                Err(ConnectError::Conflict { key })
            }
        }
    }
}
