//! Statement cache.
use lru::LruCache;
use std::num::NonZeroUsize;

use crate::{
    common::verbose,
    query::{QueryArena, QueryKey, QueryRecord, Slot},
    statement::StatementName,
};

/// Least recently used map from [`QueryKey`] to query records.
///
/// The cache only holds arena addresses. A record leaves the arena once it is neither cached
/// nor borrowed; its server side statements are then returned to the caller for closing.
#[derive(Debug)]
pub(crate) struct StatementCache {
    lru: LruCache<QueryKey, Slot>,
}

impl StatementCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { lru: LruCache::new(capacity) }
    }

    /// Borrow the record for `key`, creating it if absent.
    pub(crate) fn borrow(
        &mut self,
        key: QueryKey,
        arena: &mut QueryArena,
        closes: &mut Vec<StatementName>,
    ) -> Slot {
        if let Some(&slot) = self.lru.get(&key) {
            if let Some(record) = arena.get_mut(slot) {
                record.borrows += 1;
                return slot;
            }
        }

        verbose!(sql = %key.sql, "statement cache miss");

        let mut record = QueryRecord::new(&key);
        record.key = Some(key.clone());
        record.borrows = 1;
        let slot = arena.insert(record);

        if let Some((_, evicted)) = self.lru.push(key, slot) {
            Self::detach(evicted, arena, closes);
        }

        slot
    }

    /// Release one borrow, returns `false` if the record had none.
    pub(crate) fn release(
        &mut self,
        slot: Slot,
        arena: &mut QueryArena,
        closes: &mut Vec<StatementName>,
    ) -> bool {
        let Some(record) = arena.get_mut(slot) else {
            return false;
        };
        if record.borrows == 0 {
            return false;
        }
        record.borrows -= 1;
        if record.borrows == 0 && record.key.is_none() {
            if let Some(mut record) = arena.remove(slot) {
                closes.extend(record.unprepare());
            }
        }
        true
    }

    /// Remove the record from the cache, it is freed once no longer borrowed.
    fn detach(slot: Slot, arena: &mut QueryArena, closes: &mut Vec<StatementName>) {
        let Some(record) = arena.get_mut(slot) else {
            return;
        };
        record.key = None;
        if record.borrows == 0 {
            if let Some(mut record) = arena.remove(slot) {
                closes.extend(record.unprepare());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &QueryKey) -> bool {
        self.lru.contains(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.lru.len()
    }
}
