/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Bounded outbound-replay ring.
//!
//! Keeps the most recently sent business frames so a NotApplied can be
//! answered with a retransmit without consulting the external archive.
//! Evicts oldest-first; a request reaching past the retained window simply
//! yields the frames still available.

use bytes::Bytes;
use std::collections::VecDeque;

/// Ring of recently sent `(seq_num, frame)` pairs.
#[derive(Debug)]
pub struct ReplayBuffer {
    capacity: usize,
    frames: VecDeque<(u64, Bytes)>,
}

impl ReplayBuffer {
    /// Creates a buffer retaining up to `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: VecDeque::new(),
        }
    }

    /// Records a sent frame.
    pub fn push(&mut self, seq_num: u64, frame: Bytes) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back((seq_num, frame));
    }

    /// Returns retained frames with `seq_num` in `[from, from + count)`,
    /// in sequence order.
    #[must_use]
    pub fn range(&self, from: u64, count: u64) -> Vec<(u64, Bytes)> {
        let end = from.saturating_add(count);
        self.frames
            .iter()
            .filter(|(seq, _)| *seq >= from && *seq < end)
            .map(|(seq, frame)| (*seq, frame.clone()))
            .collect()
    }

    /// Drops every retained frame.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Returns the number of retained frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
