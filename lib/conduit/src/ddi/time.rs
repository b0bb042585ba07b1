// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Moments in time.

use core::fmt;
use core::ops::Add;
use core::time::Duration;
use std::sync::OnceLock;
use std::time::Instant;

pub const MILLIS: u64 = 1_000;
pub const NANOS: u64 = 1_000_000_000;
pub const NANOS_TO_MILLIS: u64 = NANOS / MILLIS;

static BASE: OnceLock<Instant> = OnceLock::new();

/// A monotonic point in time, with millisecond resolution.
///
/// A `Moment` is a count of milliseconds since a process-wide base,
/// which lets it be stored in an `AtomicU64` and compared without a
/// lock. Tests construct moments directly with [`Moment::from_raw_millis`]
/// to drive expiry deterministically.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    millis: u64,
}

impl Moment {
    pub fn now() -> Self {
        let base = BASE.get_or_init(Instant::now);
        let elapsed = base.elapsed();
        let millis = elapsed.as_secs() * MILLIS
            + u64::from(elapsed.subsec_nanos()) / NANOS_TO_MILLIS;
        Self { millis }
    }

    pub const fn from_raw_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub const fn raw_millis(&self) -> u64 {
        self.millis
    }

    /// Milliseconds elapsed from `earlier` until `self`, or zero if
    /// `earlier` is in the future.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        self.millis.saturating_sub(earlier.millis)
    }
}

impl Add<Duration> for Moment {
    type Output = Moment;

    fn add(self, rhs: Duration) -> Moment {
        let ms = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Moment { millis: self.millis.saturating_add(ms) }
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}", self.millis / MILLIS, self.millis % MILLIS)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deltas_saturate() {
        let a = Moment::from_raw_millis(1_500);
        let b = a + Duration::from_secs(2);
        assert_eq!(b.raw_millis(), 3_500);
        assert_eq!(b.delta_as_millis(a), 2_000);
        assert_eq!(a.delta_as_millis(b), 0);
        assert_eq!(b.to_string(), "3.500");
    }

    #[test]
    fn now_is_monotonic() {
        let a = Moment::now();
        let b = Moment::now();
        assert!(b >= a);
    }
}
