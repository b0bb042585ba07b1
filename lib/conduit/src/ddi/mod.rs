// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Thin wrappers over the host's locking and clock primitives.
//!
//! The engine never reaches for `std::sync` or `std::time` directly;
//! it goes through these types so the attach layer can swap in its
//! own primitives without touching engine code.

pub mod sync;
pub mod time;
