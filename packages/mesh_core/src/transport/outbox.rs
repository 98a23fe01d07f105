//! Bounded outbox for frames held back while the relay socket is congested.

use std::collections::VecDeque;

use super::Frame;

pub const DEFAULT_CAPACITY: usize = 256;

/// FIFO of pending frames. Beyond capacity the oldest frame is dropped.
pub struct Outbox {
    frames: VecDeque<Frame>,
    capacity: usize,
    dropped: u64,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Returns the frame evicted to make room, if any.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.dropped += 1;
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total frames evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn queued_bytes(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
