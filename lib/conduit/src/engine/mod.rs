// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The dataplane engine.

pub mod checksum;
pub mod conn_table;
pub mod dispatch;
pub mod ether;
pub mod event;
pub mod fastpath;
pub mod icmp;
pub mod ip4;
pub mod ip6;
pub mod nat;
pub mod parse;
pub mod policy;
pub mod predicate;
pub mod reaper;
pub mod rewrite;
pub mod rule;
pub mod service;
pub mod snapshot;
pub mod sock_lb;
pub mod stat;
pub mod tcp;
pub mod tcp_state;
pub mod udp;

pub use dispatch::Dispatcher;
pub use dispatch::DropReason;
pub use dispatch::ProcessResult;
