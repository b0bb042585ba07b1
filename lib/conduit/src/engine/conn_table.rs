// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The connection table.
//!
//! Every tracked connection occupies exactly two entries: one keyed
//! on the originating direction and one keyed on the reply direction
//! (after translation, for NAT'd connections). Each entry names its
//! partner by key rather than by pointer, so either half can be
//! found, touched, and removed on its own.
//!
//! The table is split into shards, each behind its own reader/writer
//! lock, so that lookups on the hot path only contend with writers
//! touching the same shard. The capacity limit is enforced globally
//! by reserving slots with a compare-and-swap before any shard is
//! locked, which means a full table never blocks and never exceeds
//! its limit, even momentarily.

use super::nat::NatPlan;
use super::nat::NatRewrite;
use super::nat::flow_hash;
use super::tcp_state::ConnState;
use crate::ddi::sync::KRwLock;
use crate::ddi::time::MILLIS;
use crate::ddi::time::Moment;
use conduit_api::ConduitError;
use conduit_api::Direction;
use conduit_api::Endpoint;
use conduit_api::FlowKey;
use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::AtomicU8;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CONN_TABLE_SHARDS: usize = 64;

/// The Time To Live in milliseconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ttl(u64);

impl Ttl {
    pub fn as_seconds(&self) -> u64 {
        self.0 / MILLIS
    }

    pub fn as_milliseconds(&self) -> u64 {
        self.0
    }

    /// Has more than the TTL elapsed since `last_seen`?
    pub fn is_expired(&self, last_seen: Moment, now: Moment) -> bool {
        now.delta_as_millis(last_seen) > self.0
    }

    pub const fn new_seconds(seconds: u64) -> Self {
        Ttl(seconds.saturating_mul(MILLIS))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Ttl(millis)
    }
}

/// Which half of a connection an entry describes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ConnDir {
    Original,
    Reply,
}

impl fmt::Display for ConnDir {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Original => write!(f, "ORIG"),
            Self::Reply => write!(f, "REPLY"),
        }
    }
}

/// The input policy was (or will be) evaluated against: the
/// originating key after translation, in the direction it was first
/// seen.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PolicyInput {
    pub dir: Direction,
    pub flow: FlowKey,
}

/// The cached policy verdict of an entry.
///
/// Only `Allow` is ever cached. An entry with no cached verdict was
/// installed ahead of its first packet and must be evaluated before
/// that packet is forwarded.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CachedVerdict {
    Unverified,
    Allowed { generation: u64 },
}

const VERDICT_UNVERIFIED: u64 = 0;

fn encode_verdict(generation: u64) -> u64 {
    (generation << 1) | 1
}

fn decode_verdict(raw: u64) -> CachedVerdict {
    match raw {
        VERDICT_UNVERIFIED => CachedVerdict::Unverified,
        raw => CachedVerdict::Allowed { generation: raw >> 1 },
    }
}

/// One half of a tracked connection.
///
/// The immutable parts are fixed at creation. The mutable parts are
/// atomics so that the hot path can update them under a shard read
/// lock.
#[derive(Debug)]
pub struct ConnEntry {
    dir: ConnDir,
    pair: FlowKey,
    nat: Option<NatRewrite>,
    redirect: Option<Endpoint>,
    policy: PolicyInput,
    created: Moment,
    last_seen: AtomicU64,
    ttl: AtomicU64,
    hits: AtomicU64,
    state: AtomicU8,
    verdict: AtomicU64,
}

impl ConnEntry {
    pub fn dir(&self) -> ConnDir {
        self.dir
    }

    /// The key of the other half of this connection.
    pub fn pair(&self) -> FlowKey {
        self.pair
    }

    pub fn nat(&self) -> Option<&NatRewrite> {
        self.nat.as_ref()
    }

    pub fn redirect(&self) -> Option<Endpoint> {
        self.redirect
    }

    pub fn policy(&self) -> &PolicyInput {
        &self.policy
    }

    pub fn created(&self) -> Moment {
        self.created
    }

    pub fn last_seen(&self) -> Moment {
        Moment::from_raw_millis(self.last_seen.load(Ordering::Relaxed))
    }

    pub fn ttl(&self) -> Ttl {
        Ttl::from_millis(self.ttl.load(Ordering::Relaxed))
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_repr(self.state.load(Ordering::Relaxed))
    }

    pub fn verdict(&self) -> CachedVerdict {
        decode_verdict(self.verdict.load(Ordering::Acquire))
    }

    /// Was this entry allowed by policy generation `generation`?
    pub fn allowed_at(&self, generation: u64) -> bool {
        self.verdict.load(Ordering::Acquire) == encode_verdict(generation)
    }

    pub fn mark_allowed(&self, generation: u64) {
        self.verdict.store(encode_verdict(generation), Ordering::Release);
    }

    /// Record a packet seen at `now`. The last-seen time never moves
    /// backwards, however packets from different CPUs interleave.
    pub fn touch(&self, now: Moment) {
        self.last_seen.fetch_max(now.raw_millis(), Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Move last-seen forward to `now` without counting a hit.
    pub fn keep_alive(&self, now: Moment) {
        self.last_seen.fetch_max(now.raw_millis(), Ordering::Relaxed);
    }

    pub fn set_state(&self, state: ConnState, ttl: Ttl) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.ttl.store(ttl.as_milliseconds(), Ordering::Relaxed);
    }

    pub fn is_expired(&self, now: Moment) -> bool {
        self.ttl().is_expired(self.last_seen(), now)
    }

    pub fn dump(&self, key: &FlowKey) -> ConnEntryDump {
        ConnEntryDump {
            key: *key,
            dir: self.dir,
            pair: self.pair,
            nat: self.nat,
            redirect: self.redirect,
            state: self.state(),
            verdict: self.verdict(),
            hits: self.hits(),
            last_seen_ms: self.last_seen().raw_millis(),
            ttl_ms: self.ttl().as_milliseconds(),
        }
    }
}

/// Everything needed to create both halves of a connection.
#[derive(Clone, Copy, Debug)]
pub struct ConnInit {
    pub policy: PolicyInput,
    pub redirect: Option<Endpoint>,
    pub state: ConnState,
    pub ttl: Ttl,
    /// The policy generation that allowed this connection, or `None`
    /// if policy has not been consulted yet.
    pub allowed_gen: Option<u64>,
    pub now: Moment,
}

/// The two entries of a new connection, ready for insertion.
#[derive(Debug)]
pub struct ConnPair {
    fwd_key: FlowKey,
    fwd: ConnEntry,
    rev_key: FlowKey,
    rev: ConnEntry,
}

impl ConnPair {
    /// Build the entries for a connection originating as `key`,
    /// translated by `plan` if it addresses a service.
    pub fn new(key: FlowKey, plan: Option<&NatPlan>, init: ConnInit) -> Self {
        let rev_key = match plan {
            Some(plan) => plan.reply_key(),
            None => key.reversed(),
        };

        let entry = |dir, pair, nat, redirect| ConnEntry {
            dir,
            pair,
            nat,
            redirect,
            policy: init.policy,
            created: init.now,
            last_seen: AtomicU64::new(init.now.raw_millis()),
            ttl: AtomicU64::new(init.ttl.as_milliseconds()),
            hits: AtomicU64::new(0),
            state: AtomicU8::new(init.state as u8),
            verdict: AtomicU64::new(
                init.allowed_gen.map_or(VERDICT_UNVERIFIED, encode_verdict),
            ),
        };

        Self {
            fwd_key: key,
            fwd: entry(ConnDir::Original, rev_key, plan.map(|p| p.fwd), init.redirect),
            rev_key,
            rev: entry(ConnDir::Reply, key, plan.map(|p| p.rev), None),
        }
    }

    pub fn fwd_key(&self) -> &FlowKey {
        &self.fwd_key
    }

    pub fn rev_key(&self) -> &FlowKey {
        &self.rev_key
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("connection table full ({limit} entries)")]
pub struct TableFull {
    pub limit: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InsertError {
    #[error(transparent)]
    TableFull(#[from] TableFull),

    /// The reply key is already owned by an unrelated connection.
    #[error("reply key {key} belongs to another connection")]
    Conflict { key: FlowKey },
}

/// The result of a create-if-absent insertion.
#[derive(Clone, Debug)]
pub enum Inserted {
    /// Our entry was installed.
    New(Arc<ConnEntry>),
    /// Another entry already held the key; it is returned instead and
    /// ours was discarded.
    Existing(Arc<ConnEntry>),
}

impl Inserted {
    pub fn entry(&self) -> &Arc<ConnEntry> {
        match self {
            Self::New(e) | Self::Existing(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

type Shard = KRwLock<BTreeMap<FlowKey, Arc<ConnEntry>>>;

pub struct ConnTable {
    shards: Box<[Shard]>,
    limit: NonZeroU32,
    used: AtomicU32,
}

impl ConnTable {
    pub fn new(limit: u32) -> Result<Self, ConduitError> {
        let limit = NonZeroU32::new(limit).ok_or(ConduitError::ZeroCapacity)?;
        let shards = (0..CONN_TABLE_SHARDS)
            .map(|_| KRwLock::new(BTreeMap::new()))
            .collect();
        Ok(Self { shards, limit, used: AtomicU32::new(0) })
    }

    fn shard(&self, key: &FlowKey) -> &Shard {
        &self.shards[flow_hash(key) as usize % CONN_TABLE_SHARDS]
    }

    fn reserve(&self, n: u32) -> Result<(), TableFull> {
        let limit = self.limit.get();
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(n).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|_| TableFull { limit })
    }

    fn release(&self, n: u32) {
        self.used.fetch_sub(n, Ordering::AcqRel);
    }

    pub fn lookup(&self, key: &FlowKey) -> Option<Arc<ConnEntry>> {
        self.shard(key).read().get(key).cloned()
    }

    /// Insert `entry` under `key` unless the key is already present.
    ///
    /// # Errors
    ///
    /// If the table is at capacity, an error is returned and no
    /// modification is made to the table.
    pub fn insert(
        &self,
        key: FlowKey,
        entry: ConnEntry,
    ) -> Result<Inserted, TableFull> {
        self.reserve(1)?;
        let res = self.insert_reserved(key, Arc::new(entry));
        if !res.is_new() {
            self.release(1);
        }
        Ok(res)
    }

    fn insert_reserved(&self, key: FlowKey, entry: Arc<ConnEntry>) -> Inserted {
        let mut shard = self.shard(&key).write();
        if let Some(existing) = shard.get(&key) {
            return Inserted::Existing(existing.clone());
        }
        shard.insert(key, entry.clone());
        Inserted::New(entry)
    }

    /// Insert both halves of a connection, or neither.
    ///
    /// If another thread already created the connection, its
    /// originating entry is returned as [`Inserted::Existing`].
    pub fn insert_pair(&self, pair: ConnPair) -> Result<Inserted, InsertError> {
        self.reserve(2)?;

        let fwd = Arc::new(pair.fwd);
        let fwd = match self.insert_reserved(pair.fwd_key, fwd) {
            Inserted::New(fwd) => fwd,
            existing => {
                self.release(2);
                return Ok(existing);
            }
        };

        match self.insert_reserved(pair.rev_key, Arc::new(pair.rev)) {
            Inserted::New(_) => Ok(Inserted::New(fwd)),
            Inserted::Existing(_) => {
                // Undo the first half; the reply key belongs to
                // someone else.
                let mut shard = self.shard(&pair.fwd_key).write();
                if shard.get(&pair.fwd_key).is_some_and(|e| Arc::ptr_eq(e, &fwd))
                {
                    shard.remove(&pair.fwd_key);
                    drop(shard);
                    self.release(2);
                } else {
                    // Already removed by someone else, who released
                    // its slot.
                    drop(shard);
                    self.release(1);
                }
                Err(InsertError::Conflict { key: pair.rev_key })
            }
        }
    }

    /// Mark `key` as seen at `now`. Returns false if there is no such
    /// entry.
    pub fn touch(&self, key: &FlowKey, now: Moment) -> bool {
        match self.shard(key).read().get(key) {
            Some(entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &FlowKey) -> Option<Arc<ConnEntry>> {
        let removed = self.shard(key).write().remove(key);
        if removed.is_some() {
            self.release(1);
        }
        removed
    }

    /// Remove `key` only if it is the partner of `owner`.
    fn remove_partner(&self, key: &FlowKey, owner: &FlowKey) -> usize {
        let mut shard = self.shard(key).write();
        if shard.get(key).is_some_and(|e| e.pair == *owner) {
            shard.remove(key);
            drop(shard);
            self.release(1);
            1
        } else {
            0
        }
    }

    /// Remove `key` and its partner. Returns the number of entries
    /// removed.
    pub fn remove_pair(&self, key: &FlowKey) -> usize {
        match self.remove(key) {
            Some(entry) => 1 + self.remove_partner(&entry.pair, key),
            None => 0,
        }
    }

    /// Remove `key` and its partner if `key` is still expired at
    /// `now`. An entry refreshed since it was found expired is left
    /// alone.
    pub fn expire_pair(&self, key: &FlowKey, now: Moment) -> usize {
        let removed = {
            let mut shard = self.shard(key).write();
            match shard.get(key) {
                Some(e) if e.is_expired(now) => shard.remove(key),
                _ => None,
            }
        };

        match removed {
            Some(entry) => {
                self.release(1);
                1 + self.remove_partner(&entry.pair, key)
            }
            None => 0,
        }
    }

    /// Keys of every entry expired at `now`.
    pub fn expired(&self, now: Moment) -> Vec<FlowKey> {
        let mut keys = vec![];
        for shard in self.shards.iter() {
            let shard = shard.read();
            keys.extend(
                shard
                    .iter()
                    .filter(|(_, entry)| entry.is_expired(now))
                    .map(|(key, _)| *key),
            );
        }
        keys
    }

    pub fn num_entries(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u32 {
        self.limit.get()
    }

    pub fn dump(&self) -> ConnTableDump {
        let mut entries = vec![];
        for shard in self.shards.iter() {
            let shard = shard.read();
            entries.extend(shard.iter().map(|(key, entry)| entry.dump(key)));
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        ConnTableDump { capacity: self.capacity(), entries }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnEntryDump {
    pub key: FlowKey,
    pub dir: ConnDir,
    pub pair: FlowKey,
    pub nat: Option<NatRewrite>,
    pub redirect: Option<Endpoint>,
    pub state: ConnState,
    pub verdict: CachedVerdict,
    pub hits: u64,
    pub last_seen_ms: u64,
    pub ttl_ms: u64,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnTableDump {
    pub capacity: u32,
    pub entries: Vec<ConnEntryDump>,
}

#[cfg(test)]
mod test {
    use super::*;
    use conduit_api::Protocol;

    fn key(sport: u16) -> FlowKey {
        FlowKey::new(
            Protocol::UDP,
            Endpoint::new("10.0.0.1".parse().unwrap(), sport),
            "10.0.0.2:53".parse().unwrap(),
        )
    }

    fn init(now: Moment) -> ConnInit {
        ConnInit {
            policy: PolicyInput { dir: Direction::Out, flow: key(1) },
            redirect: None,
            state: ConnState::Datagram,
            ttl: Ttl::new_seconds(60),
            allowed_gen: Some(1),
            now,
        }
    }

    fn pair(sport: u16, now: Moment) -> ConnPair {
        ConnPair::new(key(sport), None, init(now))
    }

    #[test]
    fn pair_lifecycle() {
        let ct = ConnTable::new(8).unwrap();
        let now = Moment::from_raw_millis(1_000);
        let res = ct.insert_pair(pair(5000, now)).unwrap();
        assert!(res.is_new());
        assert_eq!(ct.num_entries(), 2);

        let fwd = ct.lookup(&key(5000)).unwrap();
        assert_eq!(fwd.dir(), ConnDir::Original);
        assert_eq!(fwd.pair(), key(5000).reversed());

        let rev = ct.lookup(&key(5000).reversed()).unwrap();
        assert_eq!(rev.dir(), ConnDir::Reply);
        assert_eq!(rev.pair(), key(5000));

        assert_eq!(ct.remove_pair(&key(5000).reversed()), 2);
        assert_eq!(ct.num_entries(), 0);
        assert!(ct.lookup(&key(5000)).is_none());
        assert_eq!(ct.remove_pair(&key(5000)), 0);
    }

    #[test]
    fn insert_is_create_if_absent() {
        let ct = ConnTable::new(8).unwrap();
        let now = Moment::from_raw_millis(0);
        let first = ct.insert_pair(pair(5000, now)).unwrap();
        let second = ct.insert_pair(pair(5000, now)).unwrap();
        assert!(!second.is_new());
        assert!(Arc::ptr_eq(first.entry(), second.entry()));
        assert_eq!(ct.num_entries(), 2);
    }

    #[test]
    fn capacity_enforced() {
        let ct = ConnTable::new(5).unwrap();
        let now = Moment::from_raw_millis(0);
        ct.insert_pair(pair(1, now)).unwrap();
        ct.insert_pair(pair(2, now)).unwrap();

        // One slot left, but a pair needs two.
        assert_eq!(
            ct.insert_pair(pair(3, now)).unwrap_err(),
            InsertError::TableFull(TableFull { limit: 5 })
        );
        assert_eq!(ct.num_entries(), 4);
        assert!(ct.lookup(&key(3)).is_none());
    }

    #[test]
    fn reply_key_conflict_rolls_back() {
        let ct = ConnTable::new(8).unwrap();
        let now = Moment::from_raw_millis(0);

        // Occupy the reply key of the flow we are about to insert.
        let squatter = pair(7, now);
        let reply_key = key(5000).reversed();
        ct.insert(reply_key, squatter.fwd).unwrap();

        let err = ct.insert_pair(pair(5000, now)).unwrap_err();
        assert_eq!(err, InsertError::Conflict { key: reply_key });
        assert!(ct.lookup(&key(5000)).is_none());
        assert_eq!(ct.num_entries(), 1);
    }

    #[test]
    fn huge_ttl_saturates() {
        let ttl = Ttl::new_seconds(u64::MAX);
        assert_eq!(ttl.as_milliseconds(), u64::MAX);
        assert!(!ttl.is_expired(
            Moment::from_raw_millis(0),
            Moment::from_raw_millis(u64::MAX)
        ));
        assert_eq!(Ttl::new_seconds(10).as_milliseconds(), 10_000);
    }

    #[test]
    fn touch_is_monotonic() {
        let ct = ConnTable::new(8).unwrap();
        ct.insert_pair(pair(1, Moment::from_raw_millis(100))).unwrap();
        assert!(ct.touch(&key(1), Moment::from_raw_millis(500)));
        assert!(ct.touch(&key(1), Moment::from_raw_millis(300)));
        let e = ct.lookup(&key(1)).unwrap();
        assert_eq!(e.last_seen().raw_millis(), 500);
        assert_eq!(e.hits(), 2);
        assert!(!ct.touch(&key(2), Moment::from_raw_millis(500)));
    }

    #[test]
    fn expiry_removes_both_halves() {
        let ct = ConnTable::new(8).unwrap();
        let start = Moment::from_raw_millis(0);
        ct.insert_pair(pair(1, start)).unwrap();

        // Keep the originating half alive; the reply half goes idle.
        let later = Moment::from_raw_millis(60_001);
        ct.touch(&key(1), later);
        let expired = ct.expired(later);
        assert_eq!(expired, vec![key(1).reversed()]);

        assert_eq!(ct.expire_pair(&expired[0], later), 2);
        assert_eq!(ct.num_entries(), 0);
    }

    #[test]
    fn expire_skips_refreshed_entry() {
        let ct = ConnTable::new(8).unwrap();
        ct.insert_pair(pair(1, Moment::from_raw_millis(0))).unwrap();
        let later = Moment::from_raw_millis(60_001);
        ct.touch(&key(1), later);
        assert_eq!(ct.expire_pair(&key(1), later), 0);
        assert_eq!(ct.num_entries(), 2);
    }

    #[test]
    fn verdict_cache() {
        let ct = ConnTable::new(8).unwrap();
        let mut i = init(Moment::from_raw_millis(0));
        i.allowed_gen = None;
        ct.insert_pair(ConnPair::new(key(9), None, i)).unwrap();

        let e = ct.lookup(&key(9)).unwrap();
        assert_eq!(e.verdict(), CachedVerdict::Unverified);
        assert!(!e.allowed_at(0));

        e.mark_allowed(4);
        assert!(e.allowed_at(4));
        assert!(!e.allowed_at(5));
        assert_eq!(e.verdict(), CachedVerdict::Allowed { generation: 4 });
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(ConnTable::new(0), Err(ConduitError::ZeroCapacity)));
    }
}
