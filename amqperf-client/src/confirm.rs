//! Publisher confirm bookkeeping of one channel.

use std::collections::VecDeque;
use std::time::Instant;

/// A publish which waits for the broker's ack or nack.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingPublish {
    pub seq: u64,
    pub enqueued_at: Instant,
}

/// The broker confirmed a tag which isn't pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnexpectedAck(pub u64);

/// Pending publishes in ascending sequence order.
///
/// Sequence numbers start at 1 and are never reused during the lifetime of the tracker. A
/// resolved entry is removed, so resolving the same tag twice is an error.
#[derive(Debug)]
pub struct ConfirmTracker {
    pending: VecDeque<PendingPublish>,
    next_seq: u64,
}

impl Default for ConfirmTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmTracker {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            next_seq: 1,
        }
    }

    /// Assign the next sequence number to a publish.
    pub fn record(&mut self, now: Instant) -> u64 {
        let seq = self.next_seq;

        self.next_seq += 1;
        self.pending.push_back(PendingPublish { seq, enqueued_at: now });

        seq
    }

    /// Remove the entries an ack or nack refers to, in ascending order.
    ///
    /// With `multiple` every pending entry up to and including `tag` is resolved, tag 0 with
    /// `multiple` means all of them. A multiple ack with a tag which is already resolved but
    /// has pending predecessors resolves those predecessors. A single ack may resolve any
    /// pending entry, brokers confirm publishes to different queues out of order.
    pub fn resolve(&mut self, tag: u64, multiple: bool) -> Result<Vec<PendingPublish>, UnexpectedAck> {
        if multiple && tag == 0 {
            return Ok(self.drain());
        }

        if tag == 0 || tag >= self.next_seq {
            return Err(UnexpectedAck(tag));
        }

        match self.pending.front() {
            None => return Err(UnexpectedAck(tag)),
            Some(first) if tag < first.seq => return Err(UnexpectedAck(tag)),
            _ => {}
        }

        if multiple {
            let mut resolved = vec![];

            while let Some(first) = self.pending.front() {
                if first.seq > tag {
                    break;
                }

                if let Some(p) = self.pending.pop_front() {
                    resolved.push(p);
                }
            }

            Ok(resolved)
        } else {
            match self.pending.binary_search_by_key(&tag, |p| p.seq) {
                Ok(pos) => Ok(self.pending.remove(pos).into_iter().collect()),
                Err(_) => Err(UnexpectedAck(tag)),
            }
        }
    }

    /// Take every pending entry, when the channel or the connection goes away.
    pub fn drain(&mut self) -> Vec<PendingPublish> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The sequence the next publish gets.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(n: usize) -> ConfirmTracker {
        let mut tracker = ConfirmTracker::new();
        let now = Instant::now();

        for _ in 0..n {
            tracker.record(now);
        }

        tracker
    }

    fn seqs(resolved: Vec<PendingPublish>) -> Vec<u64> {
        resolved.into_iter().map(|p| p.seq).collect()
    }

    #[test]
    fn sequences_start_at_one() {
        let mut tracker = ConfirmTracker::new();

        assert_eq!(tracker.record(Instant::now()), 1);
        assert_eq!(tracker.record(Instant::now()), 2);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn multiple_ack_resolves_prefix_in_order() {
        let mut tracker = tracker_with(5);

        assert_eq!(seqs(tracker.resolve(3, true).unwrap()), vec![1, 2, 3]);
        assert_eq!(tracker.len(), 2);
        assert_eq!(seqs(tracker.resolve(5, true).unwrap()), vec![4, 5]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn single_ack_out_of_order() {
        let mut tracker = tracker_with(3);

        assert_eq!(seqs(tracker.resolve(2, false).unwrap()), vec![2]);
        assert_eq!(seqs(tracker.resolve(3, true).unwrap()), vec![1, 3]);
    }

    #[test]
    fn multiple_ack_with_resolved_tag_takes_predecessors() {
        let mut tracker = tracker_with(3);

        tracker.resolve(2, false).unwrap();

        assert_eq!(seqs(tracker.resolve(2, true).unwrap()), vec![1]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn tag_zero_multiple_resolves_everything() {
        let mut tracker = tracker_with(4);

        assert_eq!(seqs(tracker.resolve(0, true).unwrap()), vec![1, 2, 3, 4]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let mut tracker = tracker_with(3);

        assert_eq!(tracker.resolve(4, false), Err(UnexpectedAck(4)));
        assert_eq!(tracker.resolve(7, true), Err(UnexpectedAck(7)));
        assert_eq!(tracker.resolve(0, false), Err(UnexpectedAck(0)));

        tracker.resolve(1, false).unwrap();

        assert_eq!(tracker.resolve(1, false), Err(UnexpectedAck(1)));
        assert_eq!(tracker.resolve(1, true), Err(UnexpectedAck(1)));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn double_single_ack_is_rejected() {
        let mut tracker = tracker_with(3);

        tracker.resolve(2, false).unwrap();

        assert_eq!(tracker.resolve(2, false), Err(UnexpectedAck(2)));
    }

    #[test]
    fn drain_keeps_sequence_going() {
        let mut tracker = tracker_with(2);

        assert_eq!(seqs(tracker.drain()), vec![1, 2]);
        assert_eq!(tracker.record(Instant::now()), 3);
    }
}
