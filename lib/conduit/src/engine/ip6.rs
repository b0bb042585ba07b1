// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! IPv6 headers.

use core::net::Ipv6Addr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV6_VERSION: u8 = 6;
pub const DEF_HOP_LIMIT: u8 = 64;

pub const IPV6_SRC_OFFSET: usize = 8;
pub const IPV6_DST_OFFSET: usize = 24;

/// Next-header values we recognize as extension headers. Packets
/// carrying any of these are not tracked.
pub const IPV6_EXT_HEADERS: [u8; 6] = [
    0,  // Hop-by-Hop
    43, // Routing
    44, // Fragment
    50, // ESP
    51, // AH
    60, // Destination Options
];

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv6HdrRaw {
    pub vsn_class_flow: [u8; 4],
    pub payload_len: [u8; 2],
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl Ipv6HdrRaw {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn version(&self) -> u8 {
        self.vsn_class_flow[0] >> 4
    }

    pub fn payload_len(&self) -> usize {
        usize::from(u16::from_be_bytes(self.payload_len))
    }

    pub fn src(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.src)
    }

    pub fn dst(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.dst)
    }

    pub fn new(src: Ipv6Addr, dst: Ipv6Addr, next_hdr: u8, payload_len: usize) -> Self {
        Self {
            vsn_class_flow: [IPV6_VERSION << 4, 0, 0, 0],
            payload_len: (payload_len as u16).to_be_bytes(),
            next_hdr,
            hop_limit: DEF_HOP_LIMIT,
            src: src.octets(),
            dst: dst.octets(),
        }
    }
}
