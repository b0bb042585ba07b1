// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Periodic expiry of idle connections.
//!
//! A pass collects expired keys shard by shard under read locks, then
//! evicts each pair individually. Each eviction re-checks expiry under
//! the shard write lock, so a connection refreshed between the scan
//! and the eviction survives. The reaper never holds more than one
//! shard lock at a time.

use super::conn_table::ConnTable;
use super::stat::ReaperStats;
use crate::ddi::time::Moment;
use crate::provider::LogLevel;
use crate::provider::Providers;
use core::sync::atomic::Ordering;
use core::time::Duration;
use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

pub struct Reaper {
    ct: Arc<ConnTable>,
    providers: Arc<Providers>,
    stats: ReaperStats,
}

impl Reaper {
    pub fn new(ct: Arc<ConnTable>, providers: Arc<Providers>) -> Self {
        Self { ct, providers, stats: ReaperStats::default() }
    }

    pub fn stats(&self) -> &ReaperStats {
        &self.stats
    }

    /// Run one pass. Returns the number of entries evicted.
    pub fn reap(&self) -> usize {
        self.reap_at(Moment::now())
    }

    pub fn reap_at(&self, now: Moment) -> usize {
        let expired = self.ct.expired(now);
        let evicted: usize =
            expired.iter().map(|key| self.ct.expire_pair(key, now)).sum();

        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        self.stats.scanned.fetch_add(expired.len() as u64, Ordering::Relaxed);
        self.stats.evicted.fetch_add(evicted as u64, Ordering::Relaxed);

        if evicted > 0 {
            self.providers.log.log(
                LogLevel::Debug,
                &format!(
                    "reaper: evicted {evicted} entries, {} remain",
                    self.ct.num_entries()
                ),
            );
        }

        evicted
    }

    /// Run a pass every `interval` on a background thread until the
    /// returned handle is stopped or dropped.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> io::Result<ReaperHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("conduit-reaper".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            self.reap();
                        }
                        // Stop requested, or the handle is gone.
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            break;
                        }
                    }
                }
            })?;

        Ok(ReaperHandle { stop: Some(stop_tx), thread: Some(thread) })
    }
}

pub struct ReaperHandle {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the reaper thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
