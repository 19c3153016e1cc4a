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

//! Typed session event bus.
//!
//! Every observable session occurrence is an enumerated [`SessionEvent`]
//! broadcast to however many subscribers hold a receiver. Subscribers that
//! fall behind the channel capacity observe a lag error and continue from
//! the oldest retained event.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::mqtt_session::error::SessionError;
use crate::mqtt_session::packet::{Packet, Publish};

/// Events emitted over the session's lifetime.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// CONNACK with a success code was received; the session is live.
    Connect { session_present: bool },
    /// A reconnect attempt is starting.
    Reconnect,
    /// The transport closed, expectedly or not.
    Close,
    /// The session entered an offline period. Emitted once per period.
    Offline,
    /// A connection-level failure. Operation-level failures are reported
    /// through the operation's own result instead.
    Error(Arc<SessionError>),
    /// An application message arrived. Emitted at most once per QoS 2
    /// packet identifier.
    Message(Publish),
    /// A packet was handed to the transport.
    PacketSend(Packet),
    /// A packet was received from the transport.
    PacketReceive(Packet),
    /// The outgoing store drained to empty.
    OutgoingEmpty,
    /// The session ended and will not reconnect.
    End,
}

/// Broadcast wrapper shared by the session handle and its actor.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit to all current subscribers. A session with no listeners is fine;
    /// the send error for that case is discarded.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn error(&self, error: SessionError) {
        self.emit(SessionEvent::Error(Arc::new(error)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(SessionEvent::Offline);
    }

    #[tokio::test]
    async fn subscribers_observe_events_in_order() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(SessionEvent::Offline);
        bus.emit(SessionEvent::Close);
        assert!(matches!(rx.recv().await, Ok(SessionEvent::Offline)));
        assert!(matches!(rx.recv().await, Ok(SessionEvent::Close)));
    }
}
