/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Inbound gap tracking and retransmit accounting.
//!
//! At most one retransmit request is in flight per session. Gaps wider than
//! the batch limit are split into contiguous chunks issued strictly one
//! after another; gaps detected while a request is outstanding are queued
//! and serviced after the current request fills or is rejected.

use fixgate_core::NOT_AWAITING_RETRANSMIT;
use std::collections::VecDeque;

/// One contiguous range to request: `[from_seq_no, from_seq_no + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRange {
    /// First missed sequence number.
    pub from_seq_no: u64,
    /// Number of messages missed.
    pub count: u64,
}

#[derive(Debug, Clone, Copy)]
struct Inflight {
    from_seq_no: u64,
    count: u64,
    /// Next retransmitted sequence number expected.
    fill_seq: u64,
}

/// Retransmit state of one session.
#[derive(Debug)]
pub struct RetransmitTracker {
    batch_max: u64,
    inflight: Option<Inflight>,
    deferred: VecDeque<RetransmitRange>,
}

impl RetransmitTracker {
    /// Creates a tracker splitting requests into chunks of at most
    /// `batch_max` messages.
    #[must_use]
    pub fn new(batch_max: u64) -> Self {
        Self {
            batch_max: batch_max.max(1),
            inflight: None,
            deferred: VecDeque::new(),
        }
    }

    /// Returns true while a request is outstanding.
    #[must_use]
    pub const fn is_awaiting(&self) -> bool {
        self.inflight.is_some()
    }

    /// Returns the fill counter, or [`NOT_AWAITING_RETRANSMIT`] when no
    /// request is outstanding.
    #[must_use]
    pub fn fill_seq(&self) -> u64 {
        self.inflight
            .map_or(NOT_AWAITING_RETRANSMIT, |i| i.fill_seq)
    }

    /// Records a detected gap of `count` messages starting at `from_seq_no`.
    ///
    /// # Returns
    /// The first chunk to request now, or `None` when a request is already
    /// outstanding and the gap was queued.
    pub fn on_gap(&mut self, from_seq_no: u64, count: u64) -> Option<RetransmitRange> {
        if count == 0 {
            return None;
        }
        self.deferred.push_back(RetransmitRange { from_seq_no, count });
        if self.inflight.is_some() {
            return None;
        }
        self.issue_next()
    }

    /// Records receipt of one retransmitted message.
    ///
    /// # Returns
    /// The next chunk to request when this fill completed the outstanding
    /// request and more gaps are queued.
    pub fn on_fill(&mut self) -> Option<RetransmitRange> {
        let inflight = self.inflight.as_mut()?;
        inflight.fill_seq += 1;
        self.complete_if_filled()
    }

    /// Records a reject of the outstanding request. The chunk is treated as
    /// empty and the engine moves on to the next one.
    ///
    /// # Returns
    /// The next chunk to request, if any gaps remain queued.
    pub fn on_reject(&mut self) -> Option<RetransmitRange> {
        let inflight = self.inflight.as_mut()?;
        inflight.fill_seq = inflight.from_seq_no + inflight.count;
        self.complete_if_filled()
    }

    fn complete_if_filled(&mut self) -> Option<RetransmitRange> {
        let inflight = self.inflight.as_ref()?;
        if inflight.fill_seq < inflight.from_seq_no + inflight.count {
            return None;
        }
        self.inflight = None;
        self.issue_next()
    }

    fn issue_next(&mut self) -> Option<RetransmitRange> {
        let gap = self.deferred.pop_front()?;
        let chunk = RetransmitRange {
            from_seq_no: gap.from_seq_no,
            count: gap.count.min(self.batch_max),
        };
        if gap.count > self.batch_max {
            // remainder stays at the head so chunks go out in order
            self.deferred.push_front(RetransmitRange {
                from_seq_no: gap.from_seq_no + self.batch_max,
                count: gap.count - self.batch_max,
            });
        }
        self.inflight = Some(Inflight {
            from_seq_no: chunk.from_seq_no,
            count: chunk.count,
            fill_seq: chunk.from_seq_no,
        });
        Some(chunk)
    }

    /// Drops all retransmit state, for disconnect.
    pub fn clear(&mut self) {
        self.inflight = None;
        self.deferred.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_gap_and_fill() {
        let mut tracker = RetransmitTracker::new(2500);

        let req = tracker.on_gap(1, 2).unwrap();
        assert_eq!(req, RetransmitRange { from_seq_no: 1, count: 2 });
        assert_eq!(tracker.fill_seq(), 1);

        assert_eq!(tracker.on_fill(), None);
        assert_eq!(tracker.fill_seq(), 2);

        assert_eq!(tracker.on_fill(), None);
        assert!(!tracker.is_awaiting());
        assert_eq!(tracker.fill_seq(), NOT_AWAITING_RETRANSMIT);
    }

    #[test]
    fn test_single_request_in_flight() {
        let mut tracker = RetransmitTracker::new(2500);

        assert!(tracker.on_gap(1, 1).is_some());
        // a second gap queues rather than issuing in parallel
        assert_eq!(tracker.on_gap(3, 1), None);
        assert_eq!(tracker.fill_seq(), 1);

        let next = tracker.on_fill().unwrap();
        assert_eq!(next, RetransmitRange { from_seq_no: 3, count: 1 });
        assert_eq!(tracker.fill_seq(), 3);

        assert_eq!(tracker.on_fill(), None);
        assert_eq!(tracker.fill_seq(), NOT_AWAITING_RETRANSMIT);
    }

    #[test]
    fn test_large_gap_batches_sequentially() {
        let mut tracker = RetransmitTracker::new(2500);

        let first = tracker.on_gap(1, 4999).unwrap();
        assert_eq!(first, RetransmitRange { from_seq_no: 1, count: 2500 });

        for _ in 0..2499 {
            assert_eq!(tracker.on_fill(), None);
        }
        let second = tracker.on_fill().unwrap();
        assert_eq!(second, RetransmitRange { from_seq_no: 2501, count: 2499 });

        for _ in 0..2498 {
            assert_eq!(tracker.on_fill(), None);
        }
        assert_eq!(tracker.on_fill(), None);
        assert_eq!(tracker.fill_seq(), NOT_AWAITING_RETRANSMIT);
    }

    #[test]
    fn test_reject_advances_past_chunk() {
        let mut tracker = RetransmitTracker::new(2500);

        tracker.on_gap(1, 4999).unwrap();
        let second = tracker.on_reject().unwrap();
        assert_eq!(second, RetransmitRange { from_seq_no: 2501, count: 2499 });

        assert_eq!(tracker.on_reject(), None);
        assert_eq!(tracker.fill_seq(), NOT_AWAITING_RETRANSMIT);
    }

    #[test]
    fn test_fill_without_request_is_ignored() {
        let mut tracker = RetransmitTracker::new(2500);
        assert_eq!(tracker.on_fill(), None);
        assert_eq!(tracker.on_reject(), None);
    }

    #[test]
    fn test_clear() {
        let mut tracker = RetransmitTracker::new(2500);
        tracker.on_gap(1, 10_000).unwrap();
        tracker.clear();
        assert!(!tracker.is_awaiting());
        assert_eq!(tracker.on_fill(), None);
    }
}
