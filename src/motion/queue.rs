// src/motion/queue.rs - FIFO of pending move requests

use std::collections::VecDeque;

use super::direction::Direction;
use stagetrack_shared::Position;

/// A move waiting for the animator to go idle. Relative and direction
/// requests are resolved against the position at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveRequest {
    Absolute(Position),
    Relative { dx: f64, dy: f64, dz: f64 },
    Direction { direction: Direction, distance: Option<f64> },
}

#[derive(Debug, Default)]
pub struct MoveQueue {
    pending: VecDeque<MoveRequest>,
}

impl MoveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: MoveRequest) {
        self.pending.push_back(request);
    }

    /// Puts a request back at the head, e.g. when dispatch lost a race.
    pub fn push_front(&mut self, request: MoveRequest) {
        self.pending.push_front(request);
    }

    pub fn pop(&mut self) -> Option<MoveRequest> {
        self.pending.pop_front()
    }

    /// Discards all pending requests, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
