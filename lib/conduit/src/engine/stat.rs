// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Dataplane counters.
//!
//! Counters are relaxed atomics bumped on the packet path. A
//! snapshot is a plain copy, suitable for printing or serializing,
//! and is not guaranteed to be consistent across counters.

use conduit_api::Direction;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use serde::Deserialize;
use serde::Serialize;

macro_rules! counters {
    (
        $(#[$meta:meta])*
        $stats:ident => $snap:ident { $($field:ident),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $stats {
            $(pub $field: AtomicU64,)*
        }

        #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
        pub struct $snap {
            $(pub $field: u64,)*
        }

        impl $stats {
            pub fn snapshot(&self) -> $snap {
                $snap {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    /// Per-direction packet outcomes.
    DirStats => DirStatsSnap {
        forward,
        drop,
        redirect,
        pass_through,
    }
}

counters! {
    /// Counters kept by the dispatcher.
    PipelineStats => PipelineStatsSnap {
        ct_hit,
        ct_miss,
        ct_new,
        ct_race_lost,
        nat_translated,
        policy_allow,
        policy_deny,
        policy_default,
        revalidated,
        revalidate_deny,
        fast_path_deny,
        failsafe,
        parse_error,
        unsupported,
        table_full,
        no_backend,
        flow_conflict,
        rewrite_error,
    }
}

counters! {
    /// Counters kept by the connect-time balancer.
    ConnectStats => ConnectStatsSnap {
        resolved,
        not_service,
        reused,
        no_backend,
        table_full,
        conflict,
    }
}

counters! {
    /// Counters kept by the reaper.
    ReaperStats => ReaperStatsSnap {
        passes,
        scanned,
        evicted,
    }
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    pub ingress: DirStats,
    pub egress: DirStats,
    pub pipeline: PipelineStats,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DispatchStatsSnap {
    pub ingress: DirStatsSnap,
    pub egress: DirStatsSnap,
    pub pipeline: PipelineStatsSnap,
}

impl DispatchStats {
    pub fn dir(&self, dir: Direction) -> &DirStats {
        match dir {
            Direction::In => &self.ingress,
            Direction::Out => &self.egress,
        }
    }

    pub fn snapshot(&self) -> DispatchStatsSnap {
        DispatchStatsSnap {
            ingress: self.ingress.snapshot(),
            egress: self.egress.snapshot(),
            pipeline: self.pipeline.snapshot(),
        }
    }
}

/// Bump a counter by one.
macro_rules! incr {
    ($counter:expr) => {
        $counter.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
    };
}

pub(crate) use incr;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snapshot_copies() {
        let s = DispatchStats::default();
        incr!(s.dir(Direction::In).forward);
        incr!(s.dir(Direction::In).forward);
        incr!(s.pipeline.ct_new);
        let snap = s.snapshot();
        assert_eq!(snap.ingress.forward, 2);
        assert_eq!(snap.egress.forward, 0);
        assert_eq!(snap.pipeline.ct_new, 1);
    }
}
