use std::collections::{HashSet, VecDeque};

use super::CacheKey;

/// Outcome of admitting a key into the FIFO index.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Admission {
    /// The key was already present; its position is unchanged.
    Present,
    /// The key was appended, after evicting the oldest entry if the index was
    /// full.
    Inserted { evicted: Option<CacheKey> },
}

/// Insertion-ordered queue plus presence set. Both always hold the same keys.
#[derive(Debug)]
pub(super) struct FifoIndex {
    queue: VecDeque<CacheKey>,
    present: HashSet<CacheKey>,
    capacity: usize,
}

impl FifoIndex {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            present: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub(super) fn contains(&self, key: &CacheKey) -> bool {
        self.present.contains(key)
    }

    pub(super) fn admit(&mut self, key: &CacheKey) -> Admission {
        if self.present.contains(key) {
            return Admission::Present;
        }
        let evicted = if self.queue.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };
        self.queue.push_back(key.clone());
        self.present.insert(key.clone());
        Admission::Inserted { evicted }
    }

    pub(super) fn remove(&mut self, key: &CacheKey) -> bool {
        if !self.present.remove(key) {
            return false;
        }
        self.queue.retain(|queued| queued != key);
        true
    }

    fn pop_oldest(&mut self) -> Option<CacheKey> {
        let oldest = self.queue.pop_front()?;
        self.present.remove(&oldest);
        Some(oldest)
    }

    pub(super) fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.queue.iter()
    }

    pub(super) fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(super) fn is_consistent(&self) -> bool {
        let queued: HashSet<&CacheKey> = self.queue.iter().collect();
        queued.len() == self.queue.len()
            && queued.len() == self.present.len()
            && self.present.iter().all(|key| queued.contains(key))
            && self.queue.len() <= self.capacity
    }
}
