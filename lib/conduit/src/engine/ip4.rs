// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! IPv4 headers.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use core::net::Ipv4Addr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_VERSION: u8 = 4;
pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_HDR_VER_SHIFT: u8 = 4;
pub const IPV4_FRAG_OFFSET_MASK: u16 = 0x1FFF;
pub const IPV4_FLAG_MF: u16 = 0x2000;
pub const IPV4_FLAG_DF: u16 = 0x4000;
pub const DEF_TTL: u8 = 64;

/// Offset of the address pair within the header.
pub const IPV4_SRC_OFFSET: usize = 12;
pub const IPV4_DST_OFFSET: usize = 16;

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4HdrRaw {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn version(&self) -> u8 {
        self.ver_hdr_len >> IPV4_HDR_VER_SHIFT
    }

    /// Header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & IPV4_HDR_LEN_MASK) * 4
    }

    pub fn total_len(&self) -> usize {
        usize::from(u16::from_be_bytes(self.total_len))
    }

    pub fn frag_offset(&self) -> u16 {
        u16::from_be_bytes(self.frag_and_flags) & IPV4_FRAG_OFFSET_MASK
    }

    pub fn more_frags(&self) -> bool {
        u16::from_be_bytes(self.frag_and_flags) & IPV4_FLAG_MF != 0
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src)
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst)
    }

    /// A minimal 20-byte header with a correct checksum.
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, payload_len: usize) -> Self {
        let total_len = (Self::SIZE + payload_len) as u16;
        let mut hdr = Self {
            ver_hdr_len: (IPV4_VERSION << IPV4_HDR_VER_SHIFT) | 5,
            dscp_ecn: 0,
            total_len: total_len.to_be_bytes(),
            ident: [0; 2],
            frag_and_flags: IPV4_FLAG_DF.to_be_bytes(),
            ttl: DEF_TTL,
            proto,
            csum: [0; 2],
            src: src.octets(),
            dst: dst.octets(),
        };
        hdr.csum = HeaderChecksum::from(Checksum::compute(hdr.as_bytes())).bytes();
        hdr
    }
}
