// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Packet identifier allocation.
//!
//! Two interchangeable strategies, selected by
//! [`PacketIdStrategy`](crate::mqtt_session::PacketIdStrategy):
//! a monotonic wraparound counter, and an interval free-list with real
//! reuse prevention.

use crate::mqtt_session::options::PacketIdStrategy;
use crate::mqtt_session::packet::PacketId;

/// Issues and recycles 16-bit packet identifiers for QoS > 0 operations.
pub trait PacketIdAllocator: Send {
    /// Acquire a fresh identifier, or `None` when the space is exhausted.
    fn allocate(&mut self) -> Option<PacketId>;

    /// Mark an explicit identifier as in use, e.g. when replaying persisted
    /// packets that already carry one. Returns false if it was already taken.
    fn register(&mut self, id: PacketId) -> bool;

    /// Return an identifier to the pool.
    fn deallocate(&mut self, id: PacketId);

    /// The identifier most recently handed out by [`allocate`](Self::allocate).
    fn last_allocated(&self) -> Option<PacketId>;

    /// Forget all live identifiers.
    fn reset(&mut self);
}

pub fn allocator_for(strategy: PacketIdStrategy) -> Box<dyn PacketIdAllocator> {
    match strategy {
        PacketIdStrategy::Default => Box::new(DefaultPacketIdAllocator::new()),
        PacketIdStrategy::Unique => Box::new(UniquePacketIdAllocator::new()),
    }
}

/// Monotonic wraparound allocator: counts 1..=65535 and wraps back to 1,
/// never issuing 0.
///
/// `register` and `deallocate` are deliberate no-ops that always report
/// success: the strategy trusts that allocation never laps 65535 outstanding
/// identifiers before the matching acks land. Under sustained high-throughput
/// QoS > 0 traffic that assumption can break and an identifier may be reused
/// while still inflight; use [`UniquePacketIdAllocator`] when that matters.
#[derive(Debug)]
pub struct DefaultPacketIdAllocator {
    next: PacketId,
    last: Option<PacketId>,
}

impl DefaultPacketIdAllocator {
    pub fn new() -> Self {
        Self {
            next: 1,
            last: None,
        }
    }
}

impl Default for DefaultPacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdAllocator for DefaultPacketIdAllocator {
    fn allocate(&mut self) -> Option<PacketId> {
        let id = self.next;
        self.next = if self.next == u16::MAX { 1 } else { self.next + 1 };
        self.last = Some(id);
        Some(id)
    }

    fn register(&mut self, _id: PacketId) -> bool {
        true
    }

    fn deallocate(&mut self, _id: PacketId) {}

    fn last_allocated(&self) -> Option<PacketId> {
        self.last
    }

    fn reset(&mut self) {
        self.next = 1;
        self.last = None;
    }
}

/// Interval free-list allocator over 1..=65535.
///
/// Free identifiers are kept as sorted disjoint inclusive ranges, so a fully
/// free pool is a single `(1, 65535)` entry. `allocate` always returns the
/// smallest free identifier.
#[derive(Debug)]
pub struct UniquePacketIdAllocator {
    /// Sorted, disjoint, non-adjacent inclusive ranges of free identifiers.
    free: Vec<(PacketId, PacketId)>,
    last: Option<PacketId>,
}

impl UniquePacketIdAllocator {
    pub fn new() -> Self {
        Self {
            free: vec![(1, u16::MAX)],
            last: None,
        }
    }

    fn take_from_range(&mut self, index: usize, id: PacketId) {
        let (lo, hi) = self.free[index];
        match (id == lo, id == hi) {
            (true, true) => {
                self.free.remove(index);
            }
            (true, false) => self.free[index] = (lo + 1, hi),
            (false, true) => self.free[index] = (lo, hi - 1),
            (false, false) => {
                self.free[index] = (lo, id - 1);
                self.free.insert(index + 1, (id + 1, hi));
            }
        }
    }
}

impl Default for UniquePacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdAllocator for UniquePacketIdAllocator {
    fn allocate(&mut self) -> Option<PacketId> {
        let (lo, _) = *self.free.first()?;
        self.take_from_range(0, lo);
        self.last = Some(lo);
        Some(lo)
    }

    fn register(&mut self, id: PacketId) -> bool {
        if id == 0 {
            return false;
        }
        match self.free.iter().position(|&(lo, hi)| lo <= id && id <= hi) {
            Some(index) => {
                self.take_from_range(index, id);
                true
            }
            None => false,
        }
    }

    fn deallocate(&mut self, id: PacketId) {
        if id == 0 {
            return;
        }
        // Insertion point: first range starting above id.
        let index = self.free.partition_point(|&(lo, _)| lo <= id);
        if index > 0 {
            let (lo, hi) = self.free[index - 1];
            if lo <= id && id <= hi {
                // Already free; deallocate is idempotent.
                return;
            }
        }

        let merges_prev = index > 0 && self.free[index - 1].1 + 1 == id;
        let merges_next =
            index < self.free.len() && id + 1 == self.free[index].0;

        match (merges_prev, merges_next) {
            (true, true) => {
                self.free[index - 1].1 = self.free[index].1;
                self.free.remove(index);
            }
            (true, false) => self.free[index - 1].1 = id,
            (false, true) => self.free[index].0 = id,
            (false, false) => self.free.insert(index, (id, id)),
        }
    }

    fn last_allocated(&self) -> Option<PacketId> {
        self.last
    }

    fn reset(&mut self) {
        self.free = vec![(1, u16::MAX)];
        self.last = None;
    }
}
