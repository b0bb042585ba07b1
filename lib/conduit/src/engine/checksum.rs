// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Internet checksum (RFC 1071) and its incremental update (RFC 1624).
//!
//! All arithmetic here is done on big-endian 16-bit words, exactly as
//! they appear on the wire. A [`Checksum`] is the running one's
//! complement sum; a [`HeaderChecksum`] is the complemented value that
//! is actually stored in a header.

use core::net::IpAddr;

/// A checksum value as stored in a header: the one's complement of
/// the one's complement sum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the two checksum bytes found in a header.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_be_bytes() }
    }
}

/// A running one's complement sum.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u64,
}

impl Checksum {
    pub fn new() -> Self {
        Self { inner: 0 }
    }

    /// Start a new sum over `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut csum = Self::new();
        csum.add_bytes(bytes);
        csum
    }

    /// Add `bytes`, treated as a sequence of big-endian words. A
    /// trailing odd byte is padded with zero.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut words = bytes.chunks_exact(2);
        for w in &mut words {
            self.inner += u64::from(u16::from_be_bytes([w[0], w[1]]));
        }

        if let [last] = words.remainder() {
            self.inner += u64::from(u16::from_be_bytes([*last, 0]));
        }
    }

    /// Remove `bytes` from the sum by adding their complement.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        let mut words = bytes.chunks_exact(2);
        for w in &mut words {
            self.inner += u64::from(!u16::from_be_bytes([w[0], w[1]]));
        }

        if let [last] = words.remainder() {
            self.inner += u64::from(!u16::from_be_bytes([*last, 0]));
        }
    }

    pub fn add_u16(&mut self, val: u16) {
        self.inner += u64::from(val);
    }

    /// Fold the carries back in and return the 16-bit sum.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        self.inner as u16
    }
}

impl From<HeaderChecksum> for Checksum {
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: u64::from(!u16::from_be_bytes(hc.bytes())) }
    }
}

impl core::ops::Add for Checksum {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self { inner: self.inner + other.inner }
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, other: Self) {
        self.inner += other.inner
    }
}

/// Adjust a stored header checksum after the covered bytes `old`
/// were replaced by `new` (RFC 1624, eqn. 3).
pub fn update(hc: [u8; 2], old: &[u8], new: &[u8]) -> [u8; 2] {
    let mut csum = Checksum::from(HeaderChecksum::wrap(hc));
    csum.sub_bytes(old);
    csum.add_bytes(new);
    HeaderChecksum::from(csum).bytes()
}

/// The TCP/UDP pseudo-header sum for the given addressing.
pub fn pseudo_header(src: IpAddr, dst: IpAddr, proto: u8, l4_len: u32) -> Checksum {
    let mut csum = Checksum::new();
    match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            csum.add_bytes(&s.octets());
            csum.add_bytes(&d.octets());
        }
        (s, d) => {
            csum.add_bytes(&ip_octets(s));
            csum.add_bytes(&ip_octets(d));
        }
    }
    csum.add_u16(u16::from(proto));
    csum.add_u16((l4_len >> 16) as u16);
    csum.add_u16(l4_len as u16);
    csum
}

fn ip_octets(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(ip) => ip.to_ipv6_mapped().octets(),
        IpAddr::V6(ip) => ip.octets(),
    }
}
