//! Backlog of records waiting for a write acknowledgement.

use std::collections::BTreeMap;

use crate::record::{DeliveryTag, LogRecord};

/// Pending records keyed by delivery tag.
///
/// A tag stays present from enqueue until its write is acknowledged, so a
/// record survives any number of failed connection attempts. Only the
/// dispatch worker owns a queue; it is not synchronised.
#[derive(Debug, Default)]
pub struct ShippingQueue {
    entries: BTreeMap<DeliveryTag, LogRecord>,
}

impl ShippingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` under `tag`. Returns the record it replaced, if any.
    pub fn enqueue(&mut self, tag: DeliveryTag, record: LogRecord) -> Option<LogRecord> {
        self.entries.insert(tag, record)
    }

    /// Every pending entry in ascending tag order. Entries are not removed.
    pub fn drain_ordered(&self) -> Vec<(DeliveryTag, LogRecord)> {
        self.entries
            .iter()
            .map(|(tag, record)| (*tag, record.clone()))
            .collect()
    }

    /// Remove `tag`. Returns whether it was present.
    pub fn acknowledge(&mut self, tag: DeliveryTag) -> bool {
        self.entries.remove(&tag).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, tag: DeliveryTag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Pending tags in ascending order.
    pub fn tags(&self) -> Vec<DeliveryTag> {
        self.entries.keys().copied().collect()
    }

    /// Largest tag currently held.
    pub fn last_tag(&self) -> Option<DeliveryTag> {
        self.entries.keys().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn record(message: &str) -> LogRecord {
        LogRecord::new().with("message", message)
    }

    #[rstest]
    fn drain_is_sorted_and_non_destructive() {
        let mut queue = ShippingQueue::new();
        queue.enqueue(DeliveryTag(200), record("b"));
        queue.enqueue(DeliveryTag(100), record("a"));

        let drained = queue.drain_ordered();
        let tags: Vec<_> = drained.iter().map(|(tag, _)| *tag).collect();
        assert_eq!(tags, vec![DeliveryTag(100), DeliveryTag(200)]);
        assert_eq!(drained[0].1, record("a"));
        assert_eq!(queue.len(), 2);
    }

    #[rstest]
    fn acknowledge_is_idempotent() {
        let mut queue = ShippingQueue::new();
        queue.enqueue(DeliveryTag(1), record("a"));
        assert!(queue.acknowledge(DeliveryTag(1)));
        assert!(!queue.acknowledge(DeliveryTag(1)));
        assert!(!queue.acknowledge(DeliveryTag(42)));
        assert!(queue.is_empty());
    }

    #[rstest]
    fn duplicate_tag_overwrites() {
        let mut queue = ShippingQueue::new();
        queue.enqueue(DeliveryTag(5), record("old"));
        queue.enqueue(DeliveryTag(5), record("new"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_ordered()[0].1, record("new"));
        assert_eq!(queue.last_tag(), Some(DeliveryTag(5)));
    }

    proptest! {
        #[test]
        fn drain_order_matches_sorted_insertions(
            tags in proptest::collection::btree_set(0u64..10_000, 0..64)
        ) {
            let mut shuffled: Vec<u64> = tags.iter().copied().collect();
            shuffled.reverse();
            let mut queue = ShippingQueue::new();
            for tag in &shuffled {
                queue.enqueue(DeliveryTag(*tag), record("m"));
            }
            let drained: Vec<u64> = queue.drain_ordered().into_iter().map(|(t, _)| t.0).collect();
            let expected: Vec<u64> = tags.into_iter().collect();
            prop_assert_eq!(drained, expected);
        }
    }
}
