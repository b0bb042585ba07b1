// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use conduit_test_utils::*;

/// A family of related packet-path testcases to benchmark.
pub trait BenchPacket {
    /// Label the output packet type in a human-friendly manner.
    fn packet_label(&self) -> String;

    /// Return a list of discrete scenarios
    fn test_cases(&self) -> Vec<Box<dyn BenchPacketInstance>>;
}

/// An individual packet to time the processing of.
pub trait BenchPacketInstance {
    /// Label for the experiment instance via BencherId.
    fn instance_name(&self) -> String;

    /// Generate a single test packet.
    fn generate(&self) -> (Vec<u8>, Direction);
}

/// Packets of a connection already in the table.
pub struct Established {}

impl BenchPacket for Established {
    fn packet_label(&self) -> String {
        "Established".into()
    }

    fn test_cases(&self) -> Vec<Box<dyn BenchPacketInstance>> {
        [
            EstablishedInstance::Tcp4Service,
            EstablishedInstance::Tcp4ServiceReply,
            EstablishedInstance::Udp4,
            EstablishedInstance::Icmp4,
        ]
        .into_iter()
        .map(|v| Box::new(v) as Box<dyn BenchPacketInstance>)
        .collect()
    }
}

#[derive(Copy, Clone, Debug)]
pub enum EstablishedInstance {
    /// Client to service VIP; rewritten to a backend.
    Tcp4Service,
    /// Backend to client. Rewritten back to the VIP when CLIENT was
    /// balanced to the first backend, tracked untranslated otherwise.
    Tcp4ServiceReply,
    Udp4,
    Icmp4,
}

impl BenchPacketInstance for EstablishedInstance {
    fn instance_name(&self) -> String {
        format!("{self:?}")
    }

    fn generate(&self) -> (Vec<u8>, Direction) {
        match self {
            Self::Tcp4Service => {
                (tcp4(CLIENT, SVC_VIP, TcpFlags::ACK), Direction::Out)
            }
            Self::Tcp4ServiceReply => {
                (tcp4(SVC_BACKENDS[0], CLIENT, TcpFlags::ACK), Direction::In)
            }
            Self::Udp4 => {
                (udp4(CLIENT, "10.9.9.9:53", b"payload"), Direction::Out)
            }
            Self::Icmp4 => {
                (icmp4_echo("10.2.2.2", "10.9.9.9", 7, 777), Direction::Out)
            }
        }
    }
}

/// Build a dataplane for [`Established`] cases, with the connection
/// of each case already tracked.
pub fn established_dataplane() -> TestDataplane {
    let g = TestDataplane::with_tables(&nat_scenario());

    // A connection to each backend, so the reply case hits whichever
    // backend CLIENT was balanced to.
    let mut syn = tcp4(CLIENT, SVC_VIP, TcpFlags::SYN);
    g.process(Direction::Out, &mut syn, 0);
    let backend = flow_of(&syn).dst_endpoint();
    for b in SVC_BACKENDS {
        if ep(b) != backend {
            let mut other = tcp4(CLIENT, b, TcpFlags::SYN);
            g.process(Direction::Out, &mut other, 0);
        }
    }

    let mut udp = udp4(CLIENT, "10.9.9.9:53", b"payload");
    g.process(Direction::Out, &mut udp, 0);
    let mut icmp = icmp4_echo("10.2.2.2", "10.9.9.9", 7, 777);
    g.process(Direction::Out, &mut icmp, 0);
    g
}
