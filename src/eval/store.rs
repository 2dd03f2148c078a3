//! Bounded LRU store keyed by source text.
//!
//! Entries live in an index-addressed arena threaded by a doubly-linked recency
//! list. The head is the most recently used entry and the tail is the next
//! eviction candidate. Every live entry appears once in `index` and once in the
//! list, and the counters always equal what the arena holds.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use thiserror::Error;
use tracing::debug;

use super::artifact::ProgramArtifact;
use super::config::CacheConfig;

type Slot = usize;

/// Raised by [`LruStore::evict_one`] on an empty store. The put path only
/// evicts while entries remain, so this never reaches callers of the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot evict from an empty store")]
pub struct EmptyStore;

/// Accounted footprint of one entry: bookkeeping, key bytes and artifact.
pub fn entry_cost<A: ProgramArtifact>(key: &str, artifact: &A) -> usize {
    std::mem::size_of::<Node<A>>() + key.len() + artifact.byte_size()
}

struct Node<A> {
    key: Arc<str>,
    artifact: Arc<A>,
    memory_size: usize,
    prev: Option<Slot>,
    next: Option<Slot>,
}

/// An entry that has left the store.
#[derive(Debug)]
pub struct Evicted<A> {
    pub key: Arc<str>,
    pub artifact: Arc<A>,
    pub memory_size: usize,
}

#[derive(Debug)]
pub enum PutOutcome<A> {
    /// New key; lists whatever was evicted to make room, oldest first.
    Inserted { evicted: Vec<Evicted<A>> },
    /// Existing key; `previous` is the artifact that was swapped out.
    Replaced {
        previous: Arc<A>,
        evicted: Vec<Evicted<A>>,
    },
}

impl<A> PutOutcome<A> {
    pub fn evicted(&self) -> &[Evicted<A>] {
        match self {
            Self::Inserted { evicted } | Self::Replaced { evicted, .. } => evicted,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    pub hits: u64,
    pub insertions: u64,
    pub replacements: u64,
    pub evictions: u64,
}

pub struct LruStore<A> {
    slots: Vec<Option<Node<A>>>,
    free: Vec<Slot>,
    index: HashMap<Arc<str>, Slot, RandomState>,
    head: Option<Slot>,
    tail: Option<Slot>,
    config: CacheConfig,
    entry_count: usize,
    memory_bytes: usize,
    counters: StoreCounters,
}

impl<A: ProgramArtifact> LruStore<A> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::with_hasher(RandomState::new()),
            head: None,
            tail: None,
            config,
            entry_count: 0,
            memory_bytes: 0,
            counters: StoreCounters::default(),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }

    pub fn counters(&self) -> StoreCounters {
        self.counters
    }

    /// Non-promoting membership probe
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Fetch without promoting or counting a hit.
    pub fn peek(&self, key: &str) -> Option<Arc<A>> {
        let slot = *self.index.get(key)?;
        self.node(slot).map(|node| Arc::clone(&node.artifact))
    }

    /// Look up `key` and promote it to most recently used.
    pub fn get(&mut self, key: &str) -> Option<Arc<A>> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        self.counters.hits += 1;
        self.node(slot).map(|node| Arc::clone(&node.artifact))
    }

    /// Insert or replace `key`. The entry ends up most recently used.
    ///
    /// An artifact larger than the whole memory budget is still admitted; it
    /// evicts everything else and leaves a single over-budget entry.
    pub fn put(&mut self, key: &str, artifact: Arc<A>) -> PutOutcome<A> {
        if let Some(&slot) = self.index.get(key) {
            return self.replace(slot, artifact);
        }

        let memory_size = entry_cost(key, artifact.as_ref());
        let mut evicted = Vec::new();
        while !self.is_empty()
            && (self.entry_count >= self.config.max_entries()
                || self.memory_bytes + memory_size > self.config.max_memory_bytes())
        {
            match self.evict_one() {
                Ok(entry) => evicted.push(entry),
                Err(EmptyStore) => break,
            }
        }

        let key: Arc<str> = Arc::from(key);
        let node = Node {
            key: Arc::clone(&key),
            artifact,
            memory_size,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
        self.entry_count += 1;
        self.memory_bytes += memory_size;
        self.counters.insertions += 1;

        PutOutcome::Inserted { evicted }
    }

    fn replace(&mut self, slot: Slot, artifact: Arc<A>) -> PutOutcome<A> {
        let Some(node) = self.slots[slot].as_mut() else {
            return PutOutcome::Inserted {
                evicted: Vec::new(),
            };
        };
        let memory_size = entry_cost(&node.key, artifact.as_ref());
        let old_size = std::mem::replace(&mut node.memory_size, memory_size);
        let previous = std::mem::replace(&mut node.artifact, artifact);
        self.memory_bytes = self.memory_bytes - old_size + memory_size;
        self.promote(slot);
        self.counters.replacements += 1;

        // A grown artifact may push the store over budget; shed older entries
        // but never the one just replaced.
        let mut evicted = Vec::new();
        while self.entry_count > 1 && self.memory_bytes > self.config.max_memory_bytes() {
            match self.evict_one() {
                Ok(entry) => evicted.push(entry),
                Err(EmptyStore) => break,
            }
        }

        PutOutcome::Replaced { previous, evicted }
    }

    /// Remove the least recently used entry.
    pub fn evict_one(&mut self) -> Result<Evicted<A>, EmptyStore> {
        let slot = self.tail.ok_or(EmptyStore)?;
        let entry = self.take(slot).ok_or(EmptyStore)?;
        self.counters.evictions += 1;
        debug!(
            key = %entry.key,
            bytes = entry.memory_size,
            "evicted cached program"
        );
        Ok(entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<Evicted<A>> {
        let slot = *self.index.get(key)?;
        self.take(slot)
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
        self.entry_count = 0;
        self.memory_bytes = 0;
        self.counters = StoreCounters::default();
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<Arc<str>> {
        let mut keys = Vec::with_capacity(self.entry_count);
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let Some(node) = self.node(slot) else { break };
            keys.push(Arc::clone(&node.key));
            cursor = node.next;
        }
        keys
    }

    fn node(&self, slot: Slot) -> Option<&Node<A>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn take(&mut self, slot: Slot) -> Option<Evicted<A>> {
        self.unlink(slot);
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        self.index.remove(&node.key);
        self.entry_count -= 1;
        self.memory_bytes -= node.memory_size;
        Some(Evicted {
            key: node.key,
            artifact: node.artifact,
            memory_size: node.memory_size,
        })
    }

    fn promote(&mut self, slot: Slot) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn unlink(&mut self, slot: Slot) {
        let Some(node) = self.slots.get_mut(slot).and_then(Option::as_mut) else {
            return;
        };
        let (prev, next) = (node.prev.take(), node.next.take());

        match prev {
            Some(prev) => {
                if let Some(prev_node) = self.slots[prev].as_mut() {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next) => {
                if let Some(next_node) = self.slots[next].as_mut() {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, slot: Slot) {
        let old_head = self.head;
        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(head) = old_head {
            if let Some(head_node) = self.slots[head].as_mut() {
                head_node.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let mut seen = std::collections::HashSet::new();
        let mut memory = 0;
        let mut cursor = self.head;
        let mut last = None;
        while let Some(slot) = cursor {
            assert!(seen.insert(slot), "cycle in recency list");
            let node = self.node(slot).expect("linked slot is live");
            assert_eq!(node.prev, last, "broken back link");
            assert_eq!(self.index.get(&node.key), Some(&slot));
            memory += node.memory_size;
            last = Some(slot);
            cursor = node.next;
        }
        assert_eq!(self.tail, last);
        assert_eq!(seen.len(), self.entry_count);
        assert_eq!(self.index.len(), self.entry_count);
        assert_eq!(memory, self.memory_bytes);
        assert!(self.entry_count <= self.config.max_entries());
    }
}

impl<A> std::fmt::Debug for LruStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruStore")
            .field("entries", &self.entry_count)
            .field("memory_bytes", &self.memory_bytes)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
