//! Single-producer/single-consumer ring of pending acknowledgements.
//!
//! A link pushes one entry per segment (or bundle, for TCPCLv3's per-bundle
//! acks) as it is written to the wire, and pops from the head as the peer's
//! acks arrive. The ring only ever consumes from the head: an ack that
//! doesn't match the head entry is a protocol error, never a search.

use std::collections::VecDeque;

/// One outstanding ack expectation: a segment/bundle descriptor used to
/// validate the peer's ack against, plus an opaque user-data payload handed
/// back to the caller once it is acked or failed.
pub struct PendingAck<D, U> {
    pub descriptor: D,
    pub user_data: U,
}

/// A bounded FIFO of [`PendingAck`] entries.
///
/// Capacity models the `max_unacked + K` sizing spec'd per TCPCL version;
/// once full, [`AckRing::push`] returns `false` and the caller must treat
/// that as back-pressure rather than retrying internally.
pub struct AckRing<D, U> {
    entries: VecDeque<PendingAck<D, U>>,
    capacity: usize,
}

impl<D, U> AckRing<D, U> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Enqueues a new ack expectation. Returns `false` without mutating the
    /// ring if it is already at capacity.
    pub fn push(&mut self, descriptor: D, user_data: U) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push_back(PendingAck {
            descriptor,
            user_data,
        });
        true
    }

    pub fn peek_head(&self) -> Option<&D> {
        self.entries.front().map(|e| &e.descriptor)
    }

    /// Pops the head entry unconditionally, for send-error draining where
    /// every outstanding entry fails regardless of descriptor match.
    pub fn pop_head(&mut self) -> Option<PendingAck<D, U>> {
        self.entries.pop_front()
    }

    /// Pops and returns the head entry iff `observed` matches its
    /// descriptor. Returns `Err(())` (without popping) on a mismatch, which
    /// callers must treat as an unrecoverable protocol error per the
    /// ack-ordering guarantee.
    pub fn pop_matching(&mut self, observed: &D) -> Result<Option<PendingAck<D, U>>, ()>
    where
        D: PartialEq,
    {
        match self.entries.front() {
            None => Ok(None),
            Some(head) if &head.descriptor == observed => Ok(self.entries.pop_front()),
            Some(_) => Err(()),
        }
    }

    /// Drains every outstanding entry in FIFO order, for send-error-sticky
    /// shutdown: each one must be failed via the caller's failed-bundle
    /// callback.
    pub fn drain_all(&mut self) -> impl Iterator<Item = PendingAck<D, U>> + '_ {
        self.entries.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_respects_capacity() {
        let mut ring: AckRing<u64, &str> = AckRing::new(2);
        assert!(ring.push(1, "a"));
        assert!(ring.push(2, "b"));
        assert!(!ring.push(3, "c"));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn pop_matching_enforces_head_order() {
        let mut ring: AckRing<u64, &str> = AckRing::new(4);
        ring.push(1, "a");
        ring.push(2, "b");

        assert!(ring.pop_matching(&2).is_err());
        assert_eq!(ring.len(), 2);

        let popped = ring.pop_matching(&1).unwrap().unwrap();
        assert_eq!(popped.descriptor, 1);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn drain_all_yields_every_entry_in_order() {
        let mut ring: AckRing<u64, &str> = AckRing::new(4);
        ring.push(1, "a");
        ring.push(2, "b");
        let drained: Vec<_> = ring.drain_all().map(|p| p.descriptor).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(ring.is_empty());
    }
}
