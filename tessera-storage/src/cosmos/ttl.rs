//! Local read-through cache with write generations.
//!
//! Every write to a key bumps that key's generation when it starts and again
//! when it finishes. A read that misses takes a [`ReadTicket`] before going
//! to the database and may only fill the cache if no write touched the key
//! in the meantime. A write fills the
//! cache only when no other write to the same key overlapped it, so the
//! cached value is always the one the database ended up with.
//!
//! Entries expire after a fixed TTL, or never for a session memo.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tessera_core::{StorageError, TesseraResult};
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct KeyState {
    generation: u64,
    writers: usize,
}

#[derive(Debug)]
struct State<V> {
    entries: HashMap<String, (V, Option<Instant>)>,
    keys: HashMap<String, KeyState>,
    epoch: u64,
    cleared_at: u64,
}

impl<V> State<V> {
    fn generation(&self, key: &str) -> u64 {
        self.keys
            .get(key)
            .map_or(0, |k| k.generation)
            .max(self.cleared_at)
    }

    fn writers(&self, key: &str) -> usize {
        self.keys.get(key).map_or(0, |k| k.writers)
    }
}

/// Generation of a key observed before a database read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadTicket(u64);

#[derive(Debug)]
pub(crate) struct TtlCache<V> {
    ttl: Option<Duration>,
    state: Mutex<State<V>>,
}

impl<V> TtlCache<V> {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self::build(Some(ttl))
    }

    /// A cache whose entries never expire.
    pub(crate) fn session() -> Self {
        Self::build(None)
    }

    fn build(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            state: Mutex::new(State {
                entries: HashMap::new(),
                keys: HashMap::new(),
                epoch: 0,
                cleared_at: 0,
            }),
        }
    }

    pub(crate) fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn lock(&self) -> TesseraResult<MutexGuard<'_, State<V>>> {
        self.state
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn expiry(&self) -> Option<Instant> {
        self.ttl.map(|ttl| Instant::now() + ttl)
    }

    /// Observe `key` before reading it from the database.
    pub(crate) fn read_ticket(&self, key: &str) -> TesseraResult<ReadTicket> {
        Ok(ReadTicket(self.lock()?.generation(key)))
    }

    /// Cache a value read from the database, unless a write to `key`
    /// started after `ticket` was taken or is still running.
    pub(crate) fn fill(&self, key: &str, value: V, ticket: ReadTicket) -> TesseraResult<bool> {
        let expires_at = self.expiry();
        let mut state = self.lock()?;
        if state.generation(key) != ticket.0 || state.writers(key) > 0 {
            debug!(key = %key, "Skipping local cache fill after concurrent write");
            return Ok(false);
        }
        state.entries.insert(key.to_string(), (value, expires_at));
        Ok(true)
    }

    /// Start a write to `key`: drop the cached value and bump the key's
    /// generation. Finish it with [`PendingWrite::commit`]; dropping the
    /// handle abandons the write and leaves the key uncached.
    pub(crate) fn begin_write(self: &Arc<Self>, key: &str) -> TesseraResult<PendingWrite<V>> {
        let mut state = self.lock()?;
        state.epoch += 1;
        let generation = state.epoch;
        state.entries.remove(key);
        let key_state = state.keys.entry(key.to_string()).or_default();
        key_state.generation = generation;
        key_state.writers += 1;
        let contended = key_state.writers > 1;
        Ok(PendingWrite {
            cache: Arc::clone(self),
            key: key.to_string(),
            generation,
            contended,
            finished: false,
        })
    }

    fn finish_write(&self, write: &PendingWrite<V>, value: Option<V>) -> TesseraResult<()> {
        let expires_at = self.expiry();
        let mut state = self.lock()?;
        let current = state.generation(&write.key);
        let remaining = match state.keys.get_mut(&write.key) {
            Some(key_state) => {
                key_state.writers = key_state.writers.saturating_sub(1);
                key_state.writers
            }
            None => 0,
        };
        let exclusive = !write.contended && remaining == 0 && current == write.generation;
        state.epoch += 1;
        let finished_at = state.epoch;
        if let Some(key_state) = state.keys.get_mut(&write.key) {
            key_state.generation = finished_at;
        }
        match value {
            Some(value) if exclusive => {
                state.entries.insert(write.key.clone(), (value, expires_at));
            }
            _ => {
                state.entries.remove(&write.key);
            }
        }
        Ok(())
    }

    pub(crate) fn clear(&self) -> TesseraResult<()> {
        let mut state = self.lock()?;
        state.epoch += 1;
        state.cleared_at = state.epoch;
        state.entries.clear();
        state.keys.retain(|_, k| k.writers > 0);
        Ok(())
    }
}

impl<V: Clone> TtlCache<V> {
    /// The cached value, if present and not yet expired. Expired entries are
    /// dropped on access.
    pub(crate) fn get(&self, key: &str) -> TesseraResult<Option<V>> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let (hit, expired) = match state.entries.get(key) {
            Some((value, expires_at)) if expires_at.map_or(true, |at| now < at) => {
                (Some(value.clone()), false)
            }
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            debug!(key = %key, "Local cache entry expired");
            state.entries.remove(key);
        } else if hit.is_some() {
            debug!(key = %key, "Local cache hit");
        }
        Ok(hit)
    }
}

/// An in-flight write to one key of a [`TtlCache`].
#[derive(Debug)]
pub(crate) struct PendingWrite<V> {
    cache: Arc<TtlCache<V>>,
    key: String,
    generation: u64,
    contended: bool,
    finished: bool,
}

impl<V> PendingWrite<V> {
    /// The write reached the database. `value` is what it now holds, or
    /// `None` for a delete.
    pub(crate) fn commit(mut self, value: Option<V>) -> TesseraResult<()> {
        self.finished = true;
        self.cache.finish_write(&self, value)
    }
}

impl<V> Drop for PendingWrite<V> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.cache.finish_write(self, None);
        }
    }
}
