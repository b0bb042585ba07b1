// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Routines for building and reading packet capture files.

use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::io::Write;

fn get_header(offset: &[u8]) -> (&[u8], PcapHeader) {
    match pcap::parse_pcap_header(offset) {
        Ok((new_offset, header)) => (new_offset, header),
        Err(e) => panic!("failed to get header: {e:?}"),
    }
}

fn next_block(offset: &[u8]) -> (&[u8], LegacyPcapBlock<'_>) {
    match pcap::parse_pcap_frame(offset) {
        Ok((new_offset, block)) => {
            // We always want access to the entire packet.
            assert_eq!(block.origlen, block.caplen);
            (new_offset, block)
        }

        Err(e) => panic!("failed to get next block: {e:?}"),
    }
}

/// Read every frame out of a legacy pcap capture.
pub fn frames(capture: &[u8]) -> Vec<Vec<u8>> {
    let (mut rest, hdr) = get_header(capture);
    assert_eq!(hdr.network, Linktype::ETHERNET);

    let mut out = vec![];
    while !rest.is_empty() {
        let (next, block) = next_block(rest);
        out.push(block.data.to_vec());
        rest = next;
    }
    out
}

/// Build a packet capture from a series of packets.
pub struct PcapBuilder<W: Write> {
    out: W,
    ts_usec: u32,
}

impl PcapBuilder<Vec<u8>> {
    /// A builder capturing into memory.
    pub fn in_memory() -> Self {
        Self::new(vec![])
    }
}

impl<W: Write> PcapBuilder<W> {
    /// Create a new pcap builder, writing the capture to `out`.
    pub fn new(mut out: W) -> Self {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 1500,
            network: Linktype::ETHERNET,
        };

        out.write_all(&hdr.to_vec().unwrap()).unwrap();

        Self { out, ts_usec: 0 }
    }

    /// Add a packet to the capture. Each packet is stamped one
    /// microsecond after the previous.
    pub fn add_pkt(&mut self, pkt: &[u8]) {
        let mut block = LegacyPcapBlock {
            ts_sec: 7777,
            ts_usec: self.ts_usec,
            caplen: pkt.len() as u32,
            origlen: pkt.len() as u32,
            data: pkt,
        };
        self.ts_usec += 1;

        self.out.write_all(&block.to_vec().unwrap()).unwrap();
    }

    pub fn finish(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::TcpFlags;
    use crate::tcp4;

    #[test]
    fn capture_reads_back() {
        let syn = tcp4("10.2.2.2:5000", "10.0.0.1:80", TcpFlags::SYN);
        let ack = tcp4("10.2.2.2:5000", "10.0.0.1:80", TcpFlags::ACK);

        let mut pcap = PcapBuilder::in_memory();
        pcap.add_pkt(&syn);
        pcap.add_pkt(&ack);
        let capture = pcap.finish();

        assert_eq!(frames(&capture), vec![syn, ack]);
    }
}
