// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! ICMP and ICMPv6 echo messages.
//!
//! Both versions share the same first eight bytes: type, code,
//! checksum, identifier, and sequence number.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct IcmpEchoRaw {
    pub msg_type: u8,
    pub code: u8,
    pub csum: [u8; 2],
    pub ident: [u8; 2],
    pub seq: [u8; 2],
}

impl IcmpEchoRaw {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn ident(&self) -> u16 {
        u16::from_be_bytes(self.ident)
    }

    /// Is this an echo request or reply, for either ICMP version?
    pub fn is_echo(&self, v6: bool) -> bool {
        if v6 {
            matches!(self.msg_type, ICMPV6_ECHO_REQUEST | ICMPV6_ECHO_REPLY)
        } else {
            matches!(self.msg_type, ICMP_ECHO_REQUEST | ICMP_ECHO_REPLY)
        }
    }
}
