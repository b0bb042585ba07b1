// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Conduit: the packet-processing core of a container network
//! dataplane.
//!
//! Each packet handed to a [`engine::dispatch::Dispatcher`] runs
//! through a short, fixed pipeline: fast-path checks, header parsing,
//! connection tracking, service NAT, tiered policy, and finally an
//! in-place header rewrite. Connections admitted by policy are cached
//! in a shared [`engine::conn_table::ConnTable`] so that later packets
//! skip policy and backend selection entirely. Control-plane tables
//! are published as immutable snapshots and swapped atomically.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate self as conduit;

pub mod ddi;
pub mod engine;
pub mod print;
pub mod provider;

pub use conduit_api as api;

/// Return value with `bit` set.
pub const fn bit_on(bit: u8) -> u8 {
    0x1 << bit
}
