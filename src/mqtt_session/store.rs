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

//! Inflight packet store.
//!
//! The session keeps two instances: the outgoing store holds unacknowledged
//! QoS > 0 publishes and pending PUBREL obligations, the incoming store holds
//! QoS 2 publishes awaiting PUBREL. Entries persist across reconnects until
//! the matching acknowledgment is observed, and the outgoing store's
//! insertion-ordered snapshot feeds the replay pass after each reconnect.
//!
//! The trait is pluggable; the default [`MemoryStore`] offers no durability
//! beyond the process.

use std::collections::HashMap;

use crate::mqtt_session::packet::{PacketId, StoredPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// `get` or `del` referenced a packet identifier with no entry.
    MissingPacket(PacketId),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::MissingPacket(id) => write!(f, "No stored packet for id {id}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable mapping from packet identifier to the packet needed to resend or
/// reprocess it. `put` returns only once the entry is durable for the
/// backing medium.
pub trait PacketStore: Send {
    fn put(&mut self, packet_id: PacketId, packet: StoredPacket) -> Result<(), StoreError>;

    fn get(&self, packet_id: PacketId) -> Result<&StoredPacket, StoreError>;

    fn del(&mut self, packet_id: PacketId) -> Result<StoredPacket, StoreError>;

    fn contains(&self, packet_id: PacketId) -> bool;

    /// All entries in insertion order. Replacing an entry under the same
    /// identifier keeps its original position.
    fn snapshot(&self) -> Vec<StoredPacket>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// In-memory store. Insertion order is tracked with a monotonic sequence so
/// the replay snapshot preserves original submission order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<PacketId, (u64, StoredPacket)>,
    next_seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketStore for MemoryStore {
    fn put(&mut self, packet_id: PacketId, packet: StoredPacket) -> Result<(), StoreError> {
        let seq = match self.entries.get(&packet_id) {
            Some((seq, _)) => *seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };
        self.entries.insert(packet_id, (seq, packet));
        Ok(())
    }

    fn get(&self, packet_id: PacketId) -> Result<&StoredPacket, StoreError> {
        self.entries
            .get(&packet_id)
            .map(|(_, packet)| packet)
            .ok_or(StoreError::MissingPacket(packet_id))
    }

    fn del(&mut self, packet_id: PacketId) -> Result<StoredPacket, StoreError> {
        self.entries
            .remove(&packet_id)
            .map(|(_, packet)| packet)
            .ok_or(StoreError::MissingPacket(packet_id))
    }

    fn contains(&self, packet_id: PacketId) -> bool {
        self.entries.contains_key(&packet_id)
    }

    fn snapshot(&self) -> Vec<StoredPacket> {
        let mut ordered: Vec<&(u64, StoredPacket)> = self.entries.values().collect();
        ordered.sort_by_key(|(seq, _)| *seq);
        ordered.into_iter().map(|(_, packet)| packet.clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}
