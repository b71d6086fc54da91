use std::cmp::Ordering;
use std::collections::HashSet;

use parlor_types::models::Message;

/// Rendered height of a message sequence, in whatever unit the view uses.
pub trait ContentMeasure: Send {
    fn extent(&self, messages: &[Message]) -> u64;
}

/// Byte-count stand-in for rendered height: body and sender bytes plus a
/// fixed overhead per row.
#[derive(Debug, Clone, Copy)]
pub struct ByteExtent {
    pub row_overhead: u64,
}

impl Default for ByteExtent {
    fn default() -> Self {
        Self { row_overhead: 32 }
    }
}

impl ContentMeasure for ByteExtent {
    fn extent(&self, messages: &[Message]) -> u64 {
        messages
            .iter()
            .map(|m| {
                let name = m.sender_name.as_deref().unwrap_or(&m.sender_id);
                (m.body.len() + name.len()) as u64 + self.row_overhead
            })
            .sum()
    }
}

/// Result of merging one inbound batch.
#[derive(Debug)]
pub struct Merge<'a> {
    pub messages: &'a [Message],
    /// Messages that were not already present.
    pub inserted: usize,
    /// New extent minus old extent; a bottom-anchored viewport adds this to
    /// its scroll offset to stay put.
    pub scroll_adjustment: i64,
}

/// Ordered, deduplicated messages of the active room.
///
/// Always sorted ascending by `(created_at, id)` with unique ids, whatever
/// order batches arrive in and however often a message is re-delivered.
pub struct MessageTimeline<M = ByteExtent> {
    messages: Vec<Message>,
    ids: HashSet<String>,
    measure: M,
    extent: u64,
}

impl MessageTimeline<ByteExtent> {
    pub fn new() -> Self {
        Self::with_measure(ByteExtent::default())
    }
}

impl Default for MessageTimeline<ByteExtent> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ContentMeasure> MessageTimeline<M> {
    pub fn with_measure(measure: M) -> Self {
        let extent = measure.extent(&[]);
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            measure,
            extent,
        }
    }

    pub fn merge(&mut self, mut batch: Vec<Message>) -> Merge<'_> {
        batch.sort_by(Message::cmp_order);
        // Drops re-deliveries and duplicates within the batch alike.
        batch.retain(|m| self.ids.insert(m.id.clone()));

        let inserted = batch.len();
        if inserted > 0 {
            let appends = match (self.messages.last(), batch.first()) {
                (Some(last), Some(first)) => last.cmp_order(first) != Ordering::Greater,
                _ => true,
            };

            if appends {
                self.messages.extend(batch);
            } else {
                self.messages = merge_sorted(std::mem::take(&mut self.messages), batch);
            }
        }

        let old_extent = self.extent;
        self.extent = self.measure.extent(&self.messages);

        Merge {
            messages: &self.messages,
            inserted,
            scroll_adjustment: self.extent as i64 - old_extent as i64,
        }
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.extent = self.measure.extent(&[]);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

fn merge_sorted(existing: Vec<Message>, incoming: Vec<Message>) -> Vec<Message> {
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    let mut a = existing.into_iter().peekable();
    let mut b = incoming.into_iter().peekable();

    while let (Some(x), Some(y)) = (a.peek(), b.peek()) {
        let next = if x.cmp_order(y) == Ordering::Greater {
            b.next()
        } else {
            a.next()
        };
        merged.extend(next);
    }
    merged.extend(a);
    merged.extend(b);
    merged
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, t: i64) -> Message {
        Message {
            id: id.into(),
            room_id: "r1".into(),
            sender_id: "u1".into(),
            sender_name: None,
            body: format!("body of {id}"),
            created_at: at(t),
        }
    }

    fn ids<M: ContentMeasure>(timeline: &MessageTimeline<M>) -> Vec<&str> {
        timeline.messages().iter().map(|m| m.id.as_str()).collect()
    }

    fn assert_ordered_and_unique<M: ContentMeasure>(timeline: &MessageTimeline<M>) {
        let messages = timeline.messages();
        for pair in messages.windows(2) {
            assert_eq!(pair[0].cmp_order(&pair[1]), Ordering::Less);
        }
        let unique: HashSet<_> = messages.iter().map(|m| &m.id).collect();
        assert_eq!(unique.len(), messages.len());
    }

    #[test]
    fn batch_is_sorted_dedup_is_idempotent_and_ties_break_by_id() {
        let mut timeline = MessageTimeline::new();

        let merge = timeline.merge(vec![msg("x", 10), msg("y", 5)]);
        assert_eq!(merge.inserted, 2);
        assert_eq!(ids(&timeline), ["y", "x"]);

        let merge = timeline.merge(vec![msg("x", 10)]);
        assert_eq!(merge.inserted, 0);
        assert_eq!(merge.scroll_adjustment, 0);
        assert_eq!(ids(&timeline), ["y", "x"]);

        timeline.merge(vec![msg("z", 5)]);
        assert_eq!(ids(&timeline), ["y", "z", "x"]);
    }

    #[test]
    fn tie_break_is_by_id_not_arrival() {
        let mut timeline = MessageTimeline::new();
        timeline.merge(vec![msg("b", 5)]);
        timeline.merge(vec![msg("a", 5)]);
        assert_eq!(ids(&timeline), ["a", "b"]);
    }

    #[test]
    fn duplicates_within_one_batch_collapse() {
        let mut timeline = MessageTimeline::new();
        let merge = timeline.merge(vec![msg("a", 1), msg("a", 1), msg("b", 2)]);
        assert_eq!(merge.inserted, 2);
        assert_eq!(ids(&timeline), ["a", "b"]);
    }

    #[test]
    fn older_messages_are_merged_into_place() {
        let mut timeline = MessageTimeline::new();
        timeline.merge(vec![msg("c", 30), msg("e", 50)]);
        timeline.merge(vec![msg("a", 10), msg("d", 40), msg("f", 60)]);
        timeline.merge(vec![msg("b", 20)]);

        assert_eq!(ids(&timeline), ["a", "b", "c", "d", "e", "f"]);
        assert_ordered_and_unique(&timeline);
    }

    #[test]
    fn order_holds_for_any_delivery_order() {
        let all: Vec<Message> = (0..12)
            .map(|i| msg(&format!("m{i:02}"), (i * 7) % 5))
            .collect();

        for rotation in 0..all.len() {
            for chunk in 1..=4 {
                let mut delivery = all.clone();
                delivery.rotate_left(rotation);
                if rotation % 2 == 1 {
                    delivery.reverse();
                }

                let mut timeline = MessageTimeline::new();
                for batch in delivery.chunks(chunk) {
                    timeline.merge(batch.to_vec());
                    // Re-delivery of the same batch changes nothing.
                    assert_eq!(timeline.merge(batch.to_vec()).inserted, 0);
                    assert_ordered_and_unique(&timeline);
                }
                assert_eq!(timeline.len(), all.len());
            }
        }
    }

    #[test]
    fn scroll_adjustment_tracks_extent_growth() {
        let mut timeline = MessageTimeline::with_measure(ByteExtent { row_overhead: 10 });

        // "body of a" (9) + "u1" (2) + 10
        let merge = timeline.merge(vec![msg("a", 1)]);
        assert_eq!(merge.scroll_adjustment, 21);

        let merge = timeline.merge(vec![msg("b", 2), msg("c", 3)]);
        assert_eq!(merge.scroll_adjustment, 42);
    }

    struct FixedRows;

    impl ContentMeasure for FixedRows {
        fn extent(&self, messages: &[Message]) -> u64 {
            messages.len() as u64 * 20
        }
    }

    #[test]
    fn custom_measure_and_reset() {
        let mut timeline = MessageTimeline::with_measure(FixedRows);
        assert_eq!(timeline.merge(vec![msg("a", 1), msg("b", 2)]).scroll_adjustment, 40);

        timeline.reset();
        assert!(timeline.is_empty());
        assert!(!timeline.contains("a"));

        // After a reset the same ids are new again.
        let merge = timeline.merge(vec![msg("a", 1)]);
        assert_eq!(merge.inserted, 1);
        assert_eq!(merge.scroll_adjustment, 20);
    }
}
