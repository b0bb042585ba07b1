// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Conduit administration library.
//!
//! A [`Host`] assembles a complete dataplane in userland from a
//! configuration file: the tables, the connection table, the packet
//! path, the connect-time balancer, and the reaper. `conduitadm`
//! uses it to validate configurations and to replay packet captures
//! through the engine.

use conduit::ddi::sync::KMutex;
use conduit::ddi::time::Moment;
use conduit::engine::Dispatcher;
use conduit::engine::ProcessResult;
use conduit::engine::conn_table::ConnTable;
use conduit::engine::event::EventSink;
use conduit::engine::parse::peek;
use conduit::engine::reaper::Reaper;
use conduit::engine::snapshot::Tables;
use conduit::engine::sock_lb::ConnectTimeLb;
use conduit::provider::Providers;
use conduit::provider::SlogLog;
use conduit_api::ConduitCfg;
use conduit_api::ConduitError;
use conduit_api::Direction;
use conduit_api::IpCidr;
use conduit_api::VerdictEvent;
use pcap_parser::Linktype;
use pcap_parser::pcap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8: {source}")]
    Utf8 {
        path: String,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Engine(#[from] ConduitError),

    #[error("bad packet capture: {0}")]
    Pcap(String),
}

fn read(path: &Path) -> Result<Vec<u8>, Error> {
    fs::read(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Load a TOML configuration file.
pub fn load_config(path: &Path) -> Result<ConduitCfg, Error> {
    let bytes = read(path)?;
    let text = std::str::from_utf8(&bytes).map_err(|source| Error::Utf8 {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(text)
}

pub fn parse_config(text: &str) -> Result<ConduitCfg, Error> {
    Ok(toml::from_str(text)?)
}

/// Records every verdict event it is handed.
pub struct CollectSink {
    events: KMutex<Vec<VerdictEvent>>,
}

impl Default for CollectSink {
    fn default() -> Self {
        Self { events: KMutex::new(vec![]) }
    }
}

impl CollectSink {
    pub fn take(&self) -> Vec<VerdictEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for CollectSink {
    fn emit(&self, ev: VerdictEvent) {
        self.events.lock().push(ev);
    }
}

/// A dataplane assembled from one configuration.
pub struct Host {
    pub dp: Dispatcher,
    pub lb: ConnectTimeLb,
    pub reaper: Arc<Reaper>,
    pub tables: Arc<Tables>,
    pub ct: Arc<ConnTable>,
    reaper_interval_ms: u64,
}

impl Host {
    pub fn new(
        cfg: &ConduitCfg,
        log: slog::Logger,
        events: Box<dyn EventSink>,
    ) -> Result<Self, ConduitError> {
        let dcfg = &cfg.dataplane;
        let providers =
            Arc::new(Providers::new(Box::new(SlogLog::new(log)), events));
        let tables = Arc::new(Tables::from_cfg(&cfg.tables)?);
        let ct = Arc::new(ConnTable::new(dcfg.conn_table_capacity)?);

        let dp = Dispatcher::new(
            "conduitadm",
            dcfg,
            tables.clone(),
            ct.clone(),
            providers.clone(),
        )?;
        let lb = ConnectTimeLb::new(
            tables.clone(),
            ct.clone(),
            dcfg.ttl,
            providers.clone(),
        );
        let reaper = Arc::new(Reaper::new(ct.clone(), providers));

        Ok(Self {
            dp,
            lb,
            reaper,
            tables,
            ct,
            reaper_interval_ms: dcfg.reaper_interval_secs.saturating_mul(1000),
        })
    }
}

/// One frame of a packet capture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// Capture timestamp in milliseconds.
    pub ts_millis: u64,
    pub data: Vec<u8>,
}

/// Read the frames of a legacy pcap file.
pub fn read_pcap(path: &Path) -> Result<Vec<Frame>, Error> {
    parse_pcap(&read(path)?)
}

pub fn parse_pcap(capture: &[u8]) -> Result<Vec<Frame>, Error> {
    let (mut rest, hdr) = pcap::parse_pcap_header(capture)
        .map_err(|e| Error::Pcap(format!("header: {e:?}")))?;

    if hdr.network != Linktype::ETHERNET {
        return Err(Error::Pcap(format!(
            "unsupported link type {:?}",
            hdr.network
        )));
    }

    let mut frames = vec![];
    while !rest.is_empty() {
        let (next, block) = pcap::parse_pcap_frame(rest).map_err(|e| {
            Error::Pcap(format!("frame {}: {e:?}", frames.len()))
        })?;

        if block.caplen != block.origlen {
            return Err(Error::Pcap(format!(
                "frame {} truncated to {} of {} bytes",
                frames.len(),
                block.caplen,
                block.origlen
            )));
        }

        frames.push(Frame {
            ts_millis: u64::from(block.ts_sec) * 1000
                + u64::from(block.ts_usec) / 1000,
            data: block.data.to_vec(),
        });
        rest = next;
    }

    Ok(frames)
}

/// How replayed frames are assigned a direction.
#[derive(Clone, Debug)]
pub enum DirSource {
    /// Every frame travels the same way.
    Fixed(Direction),
    /// Frames sourced from these networks are egress, the rest
    /// ingress.
    Local(Vec<IpCidr>),
}

impl DirSource {
    pub fn dir_of(&self, pkt: &[u8]) -> Direction {
        match self {
            Self::Fixed(dir) => *dir,
            Self::Local(nets) => match peek(pkt) {
                Some(p) if nets.iter().any(|n| n.is_member(p.src)) => {
                    Direction::Out
                }
                _ => Direction::In,
            },
        }
    }
}

/// The outcome of one replayed frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Replayed {
    pub index: usize,
    pub dir: Direction,
    pub res: ProcessResult,
}

/// Run `frames` through `host` in order. Time is taken from the
/// capture, relative to the first frame, and the reaper runs whenever
/// its interval has passed in capture time.
pub fn replay(
    host: &Host,
    frames: &[Frame],
    dirs: &DirSource,
) -> Vec<Replayed> {
    let start = frames.first().map_or(0, |f| f.ts_millis);
    let mut last_reap = 0;
    let mut out = Vec::with_capacity(frames.len());

    for (index, frame) in frames.iter().enumerate() {
        let now = frame.ts_millis.saturating_sub(start);
        if host.reaper_interval_ms > 0
            && now.saturating_sub(last_reap) >= host.reaper_interval_ms
        {
            host.reaper.reap_at(Moment::from_raw_millis(now));
            last_reap = now;
        }

        let mut pkt = frame.data.clone();
        let dir = dirs.dir_of(&pkt);
        let res = host.dp.process_at(dir, &mut pkt, Moment::from_raw_millis(now));
        out.push(Replayed { index, dir, res });
    }

    out
}
