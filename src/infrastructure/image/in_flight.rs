//! Registry of network fetches currently in flight, keyed by cache key.
//!
//! Concurrent requests for the same key share one fetch. Display slots and
//! awaiting futures subscribe to the entry and are handed out together when
//! the fetch finishes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::entities::{CacheKey, SlotId};
use crate::domain::ports::CacheResult;

/// Outcome delivered to futures awaiting a fetch.
pub type FetchOutcome = CacheResult<Arc<image::DynamicImage>>;

/// How a slot subscription was settled.
#[derive(Debug)]
pub enum Subscription {
    /// No fetch was in flight; the caller must start one.
    Started,
    /// Joined a fetch that is already running.
    Joined,
    /// The fetch finished before the slot subscribed; nothing was recorded.
    Cached(Arc<image::DynamicImage>),
}

/// Subscribers of a fetch that has just finished.
#[derive(Debug, Default)]
pub struct Completed {
    /// URL the fetch was started for.
    pub url: String,
    /// Slots still interested in the result.
    pub slots: Vec<SlotId>,
    /// Futures awaiting the result.
    pub waiters: Vec<oneshot::Sender<FetchOutcome>>,
}

#[derive(Debug)]
struct InFlight {
    url: String,
    slots: Vec<SlotId>,
    waiters: Vec<oneshot::Sender<FetchOutcome>>,
}

impl InFlight {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            slots: Vec::new(),
            waiters: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    by_key: HashMap<CacheKey, InFlight>,
    slot_keys: HashMap<SlotId, CacheKey>,
}

impl RegistryState {
    /// Creates the entry if needed. Returns true if the caller must start
    /// the fetch.
    fn entry(&mut self, key: &CacheKey, url: &str) -> (&mut InFlight, bool) {
        let started = !self.by_key.contains_key(key);
        let entry = self
            .by_key
            .entry(key.clone())
            .or_insert_with(|| InFlight::new(url));
        (entry, started)
    }

    fn detach_slot(&mut self, slot: SlotId) -> Option<CacheKey> {
        let key = self.slot_keys.remove(&slot)?;
        if let Some(entry) = self.by_key.get_mut(&key) {
            entry.slots.retain(|s| *s != slot);
        }
        Some(key)
    }
}

/// Per-key in-flight request registry.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    state: Mutex<RegistryState>,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `slot` to the fetch for `key`.
    ///
    /// A slot follows only its latest request: if it was waiting on another
    /// key it is detached from it first. When no fetch for `key` is in
    /// flight, `cached` is consulted under the registry lock. A fetch stores
    /// its image before it calls [`Self::complete`], so a hit there means
    /// the image landed after the caller's own cache miss.
    pub fn subscribe_slot(
        &self,
        key: &CacheKey,
        url: &str,
        slot: SlotId,
        cached: impl FnOnce() -> Option<Arc<image::DynamicImage>>,
    ) -> Subscription {
        let mut state = self.state.lock();
        if state.slot_keys.get(&slot) != Some(key) {
            state.detach_slot(slot);
        }
        if !state.by_key.contains_key(key) {
            if let Some(image) = cached() {
                return Subscription::Cached(image);
            }
        }
        state.slot_keys.insert(slot, key.clone());

        let (entry, started) = state.entry(key, url);
        if !entry.slots.contains(&slot) {
            entry.slots.push(slot);
        }
        if started {
            Subscription::Started
        } else {
            Subscription::Joined
        }
    }

    /// Subscribes a future to the fetch for `key`.
    ///
    /// Returns the receiving end and whether the caller must start the fetch.
    pub fn subscribe_waiter(
        &self,
        key: &CacheKey,
        url: &str,
    ) -> (oneshot::Receiver<FetchOutcome>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        let (entry, started) = state.entry(key, url);
        entry.waiters.push(tx);
        (rx, started)
    }

    /// Registers a fetch with no subscriber. Returns true if the caller must
    /// start it.
    pub fn register(&self, key: &CacheKey, url: &str) -> bool {
        self.state.lock().entry(key, url).1
    }

    /// Drops the slot's interest in whatever it was waiting for.
    ///
    /// The fetch itself keeps running. Returns the key it was waiting on.
    pub fn detach_slot(&self, slot: SlotId) -> Option<CacheKey> {
        self.state.lock().detach_slot(slot)
    }

    /// Removes the entry for `key` and returns its subscribers.
    pub fn complete(&self, key: &CacheKey) -> Option<Completed> {
        let mut state = self.state.lock();
        let entry = state.by_key.remove(key)?;
        for slot in &entry.slots {
            if state.slot_keys.get(slot) == Some(key) {
                state.slot_keys.remove(slot);
            }
        }
        Some(Completed {
            url: entry.url,
            slots: entry.slots,
            waiters: entry.waiters,
        })
    }

    /// Returns true if a fetch for `key` is in flight.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().by_key.contains_key(key)
    }

    /// Returns the number of fetches in flight.
    pub fn len(&self) -> usize {
        self.state.lock().by_key.len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
