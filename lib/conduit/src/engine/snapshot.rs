// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Control-plane table snapshots.
//!
//! The policy, service, and redirect tables are published together
//! as one immutable [`Snapshot`]. Readers load the current snapshot
//! once per packet and use it for the whole decision, so a decision
//! never mixes two versions of a table. Writers build a replacement
//! and swap it in atomically; a reader holding the old snapshot keeps
//! it alive until it is done.
//!
//! Every swap bumps the snapshot generation. Connections cache the
//! generation their policy verdict was computed under, which is how
//! the dispatcher knows to re-check them after a policy change.

use super::policy::PolicySnapshot;
use super::service::RedirectSnapshot;
use super::service::ServiceSnapshot;
use arc_swap::ArcSwap;
use arc_swap::Guard;
use conduit_api::ConduitError;
use conduit_api::TablesCfg;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub generation: u64,
    pub policy: Arc<PolicySnapshot>,
    pub services: Arc<ServiceSnapshot>,
    pub redirects: Arc<RedirectSnapshot>,
}

impl Snapshot {
    /// Validate and build all three tables from `cfg`.
    pub fn from_cfg(cfg: &TablesCfg) -> Result<Self, ConduitError> {
        Ok(Self {
            generation: 0,
            policy: Arc::new(PolicySnapshot::new(&cfg.policy)?),
            services: Arc::new(ServiceSnapshot::new(&cfg.services)?),
            redirects: Arc::new(RedirectSnapshot::new(&cfg.redirects)?),
        })
    }
}

pub struct Tables {
    current: ArcSwap<Snapshot>,
}

impl Tables {
    pub fn new(initial: Snapshot) -> Self {
        Self { current: ArcSwap::from_pointee(initial) }
    }

    pub fn from_cfg(cfg: &TablesCfg) -> Result<Self, ConduitError> {
        Snapshot::from_cfg(cfg).map(Self::new)
    }

    /// The current snapshot. Cheap enough to call per packet.
    pub fn load(&self) -> Guard<Arc<Snapshot>> {
        self.current.load()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    fn update<F>(&self, f: F) -> u64
    where
        F: Fn(&Snapshot) -> Snapshot,
    {
        let prev = self.current.rcu(|cur| {
            let mut next = f(cur);
            next.generation = cur.generation + 1;
            next
        });
        prev.generation + 1
    }

    /// Publish a new policy table, returning the new generation.
    pub fn swap_policy(&self, policy: PolicySnapshot) -> u64 {
        let policy = Arc::new(policy);
        self.update(|cur| Snapshot { policy: policy.clone(), ..cur.clone() })
    }

    pub fn swap_services(&self, services: ServiceSnapshot) -> u64 {
        let services = Arc::new(services);
        self.update(|cur| Snapshot { services: services.clone(), ..cur.clone() })
    }

    pub fn swap_redirects(&self, redirects: RedirectSnapshot) -> u64 {
        let redirects = Arc::new(redirects);
        self.update(|cur| Snapshot { redirects: redirects.clone(), ..cur.clone() })
    }

    /// Replace all three tables at once.
    pub fn swap_all(&self, cfg: &TablesCfg) -> Result<u64, ConduitError> {
        let snap = Snapshot::from_cfg(cfg)?;
        Ok(self.update(|_| snap.clone()))
    }
}
