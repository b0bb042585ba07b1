// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Verdict event sinks.
//!
//! Emitting an event must never stall the packet path. [`RingSink`]
//! keeps the most recent events in a fixed-size ring and, if another
//! thread holds the ring at the moment of emission, counts the event
//! as lost instead of waiting.

use crate::ddi::sync::KMutex;
use conduit_api::VerdictEvent;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use heapless::HistoryBuffer;

pub trait EventSink: Send + Sync {
    fn emit(&self, ev: VerdictEvent);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _ev: VerdictEvent) {}
}

/// Holds the last `N` events.
pub struct RingSink<const N: usize> {
    ring: KMutex<HistoryBuffer<VerdictEvent, N>>,
    lost: AtomicU64,
}

impl<const N: usize> RingSink<N> {
    pub fn new() -> Self {
        Self { ring: KMutex::new(HistoryBuffer::new()), lost: AtomicU64::new(0) }
    }

    /// Remove and return all buffered events, oldest first.
    pub fn drain(&self) -> Vec<VerdictEvent> {
        let mut ring = self.ring.lock();
        let events = ring.oldest_ordered().cloned().collect();
        *ring = HistoryBuffer::new();
        events
    }

    /// Events dropped because the ring was busy.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for RingSink<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventSink for RingSink<N> {
    fn emit(&self, ev: VerdictEvent) {
        match self.ring.try_lock() {
            Ok(mut ring) => ring.write(ev),
            Err(_) => {
                self.lost.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn emit(&self, ev: VerdictEvent) {
        (**self).emit(ev)
    }
}
