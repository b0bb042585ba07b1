// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A coarse connection state machine.
//!
//! The dataplane does not validate sequence numbers; it tracks just
//! enough of the TCP handshake and teardown to pick an idle timeout.
//! Non-TCP flows sit in [`ConnState::Datagram`] for their whole life.

use super::conn_table::Ttl;
use super::tcp::TcpFlags;
use conduit_api::Protocol;
use conduit_api::TtlCfg;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u8)]
pub enum ConnState {
    /// The originator has sent a SYN; nothing seen from the peer yet.
    SynSent = 1,
    Established = 2,
    /// A FIN or RST has been seen in either direction.
    Closing = 3,
    Datagram = 4,
}

impl ConnState {
    /// The state of a flow whose first observed packet carries
    /// `flags` (or none, for non-TCP).
    pub fn initial(flags: Option<TcpFlags>) -> Self {
        match flags {
            None => Self::Datagram,
            Some(f) if f.intersects(TcpFlags::FIN | TcpFlags::RST) => {
                Self::Closing
            }
            Some(f) if f.contains(TcpFlags::SYN) && !f.contains(TcpFlags::ACK) => {
                Self::SynSent
            }
            // Picked up mid-stream.
            Some(_) => Self::Established,
        }
    }

    /// The next state after a packet with `flags`, where `reply` says
    /// whether it travelled against the originating direction.
    /// Returns `None` when the state does not change.
    pub fn next(self, flags: Option<TcpFlags>, reply: bool) -> Option<Self> {
        let flags = flags?;

        let next = match self {
            Self::Datagram => return None,
            // A new connection reusing the tuple of one being torn down.
            Self::Closing if !reply && is_bare_syn(flags) => Self::SynSent,
            Self::Closing => return None,
            _ if flags.intersects(TcpFlags::FIN | TcpFlags::RST) => Self::Closing,
            Self::SynSent if reply => Self::Established,
            _ => return None,
        };

        Some(next)
    }

    pub fn ttl(self, proto: Protocol, cfg: &TtlCfg) -> Ttl {
        let secs = match (self, proto) {
            (Self::SynSent, _) => cfg.tcp_syn,
            (Self::Established, _) => cfg.tcp_established,
            (Self::Closing, _) => cfg.tcp_closing,
            (Self::Datagram, Protocol::UDP) => cfg.udp,
            (Self::Datagram, Protocol::ICMP | Protocol::ICMPv6) => cfg.icmp,
            (Self::Datagram, _) => cfg.other,
        };
        Ttl::new_seconds(secs)
    }

    pub(crate) fn from_repr(v: u8) -> Self {
        match v {
            1 => Self::SynSent,
            2 => Self::Established,
            3 => Self::Closing,
            _ => Self::Datagram,
        }
    }
}

fn is_bare_syn(flags: TcpFlags) -> bool {
    flags.contains(TcpFlags::SYN)
        && !flags.intersects(TcpFlags::ACK | TcpFlags::FIN | TcpFlags::RST)
}

impl Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::SynSent => "SYN_SENT",
            Self::Established => "ESTABLISHED",
            Self::Closing => "CLOSING",
            Self::Datagram => "DATAGRAM",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn handshake() {
        let st = ConnState::initial(Some(TcpFlags::SYN));
        assert_eq!(st, ConnState::SynSent);

        // Retransmitted SYN from the originator changes nothing.
        assert_eq!(st.next(Some(TcpFlags::SYN), false), None);

        let st = st.next(Some(TcpFlags::SYN | TcpFlags::ACK), true).unwrap();
        assert_eq!(st, ConnState::Established);
        assert_eq!(st.next(Some(TcpFlags::ACK), false), None);

        let st = st.next(Some(TcpFlags::FIN | TcpFlags::ACK), true).unwrap();
        assert_eq!(st, ConnState::Closing);
        assert_eq!(st.next(Some(TcpFlags::ACK), false), None);
    }

    #[test]
    fn reset_during_handshake() {
        let st = ConnState::initial(Some(TcpFlags::SYN));
        assert_eq!(st.next(Some(TcpFlags::RST), true), Some(ConnState::Closing));
    }

    #[test]
    fn tuple_reused_after_reset() {
        let st = ConnState::initial(Some(TcpFlags::SYN));
        let st = st.next(Some(TcpFlags::RST), true).unwrap();
        assert_eq!(st, ConnState::Closing);

        // Neither a SYN from the peer nor a SYN/ACK reopens it.
        assert_eq!(st.next(Some(TcpFlags::SYN), true), None);
        assert_eq!(st.next(Some(TcpFlags::SYN | TcpFlags::ACK), true), None);

        let st = st.next(Some(TcpFlags::SYN), false).unwrap();
        assert_eq!(st, ConnState::SynSent);
        let st = st.next(Some(TcpFlags::SYN | TcpFlags::ACK), true).unwrap();
        assert_eq!(st, ConnState::Established);
        assert_eq!(
            st.ttl(Protocol::TCP, &TtlCfg::default()).as_seconds(),
            3600
        );
    }

    #[test]
    fn ttl_by_state() {
        let cfg = TtlCfg::default();
        assert_eq!(ConnState::SynSent.ttl(Protocol::TCP, &cfg).as_seconds(), 20);
        assert_eq!(
            ConnState::Established.ttl(Protocol::TCP, &cfg).as_seconds(),
            3600
        );
        assert_eq!(ConnState::Datagram.ttl(Protocol::UDP, &cfg).as_seconds(), 60);
        assert_eq!(ConnState::Datagram.ttl(Protocol::ICMP, &cfg).as_seconds(), 5);
        assert_eq!(ConnState::initial(None), ConnState::Datagram);
        assert_eq!(
            ConnState::initial(Some(TcpFlags::ACK)),
            ConnState::Established
        );
    }
}
