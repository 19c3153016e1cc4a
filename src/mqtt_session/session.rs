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

//! Session controller: the connection-lifecycle state machine and the QoS
//! delivery engine.
//!
//! All mutable session state lives in [`SessionCore`], a sans-I/O state
//! machine mutated by exactly one actor task. Core methods never perform I/O;
//! they complete operation responders, emit events, and return [`Effect`]s
//! (writes, timer arms, dials, transport closes) that the event loop executes
//! in order. The public [`Session`] handle talks to the actor over an
//! unbounded request channel with oneshot responses.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future;
use std::io::IoSlice;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::mqtt_session::codec::{DecodeOutcome, PacketCodec};
use crate::mqtt_session::error::{SessionError, TimeoutKind};
use crate::mqtt_session::event::{EventBus, SessionEvent};
use crate::mqtt_session::keep_alive::{KeepAliveAction, KeepAliveState};
use crate::mqtt_session::options::{ConnectOptions, PublishOptions, SubscriptionGrant};
use crate::mqtt_session::packet::{
    connect_return_code_name, reason_code_is_success, reason_code_name, Connack, Connect,
    Disconnect, Packet, PacketId, Properties, Puback, Publish, Pubcomp, Pubrec, Pubrel, Qos,
    StoredPacket, Suback, Subscribe, SubscribeEntry, SubscribeOpts, Unsuback, Unsubscribe,
};
use crate::mqtt_session::packet_id::{allocator_for, PacketIdAllocator};
use crate::mqtt_session::request_response::Request;
use crate::mqtt_session::store::{MemoryStore, PacketStore};
use crate::mqtt_session::topic_alias::{TopicAliasError, TopicAliasRecv, TopicAliasSend};
use crate::mqtt_session::transport::{Connector, TransportError, TransportOps};

const EVENT_CHANNEL_CAPACITY: usize = 128;
const READ_CHUNK_SIZE: usize = 4096;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Offline sub-state: an unexpected stream failure occurred and retries
    /// are scheduled.
    Reconnecting,
}

/// Timers owned by the session. Each is cancelled on every state transition
/// that invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    ConnackTimeout,
    KeepAliveTick,
    ReconnectDelay,
    EndGrace,
}

const ALL_TIMERS: [TimerKind; 4] = [
    TimerKind::ConnackTimeout,
    TimerKind::KeepAliveTick,
    TimerKind::ReconnectDelay,
    TimerKind::EndGrace,
];

/// I/O and scheduling work requested by [`SessionCore`], executed by the
/// event loop in order.
enum Effect {
    Write {
        bytes: Vec<u8>,
        done: Option<oneshot::Sender<Result<(), SessionError>>>,
    },
    StartTimer {
        kind: TimerKind,
        delay: Duration,
    },
    CancelTimer(TimerKind),
    Dial,
    CloseTransport,
    Stop,
}

enum AckResponder {
    Publish(oneshot::Sender<Result<(), SessionError>>),
    Subscribe(oneshot::Sender<Result<Vec<SubscriptionGrant>, SessionError>>),
    Unsubscribe(oneshot::Sender<Result<(), SessionError>>),
}

impl AckResponder {
    fn fail_closed(self) {
        match self {
            AckResponder::Publish(tx) => {
                let _ = tx.send(Err(SessionError::ConnectionClosed));
            }
            AckResponder::Subscribe(tx) => {
                let _ = tx.send(Err(SessionError::ConnectionClosed));
            }
            AckResponder::Unsubscribe(tx) => {
                let _ = tx.send(Err(SessionError::ConnectionClosed));
            }
        }
    }
}

enum InflightKind {
    PublishQos1,
    PublishQos2 { pubrel_sent: bool },
    Subscribe { entries: Vec<SubscribeEntry> },
    Unsubscribe { topics: Vec<String> },
}

/// One unacknowledged operation. Volatile entries (subscribe/unsubscribe)
/// are dropped with a connection-closed failure on disconnect instead of
/// persisting; publish entries survive via the outgoing store.
struct InflightEntry {
    kind: InflightKind,
    volatile: bool,
    responder: Option<AckResponder>,
}

impl InflightEntry {
    fn is_publish(&self) -> bool {
        matches!(
            self.kind,
            InflightKind::PublishQos1 | InflightKind::PublishQos2 { .. }
        )
    }
}

/// Operations buffered while offline, drained in FIFO order on reconnect.
enum QueuedOp {
    Publish {
        publish: Publish,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    Subscribe {
        entries: Vec<SubscribeEntry>,
        response_tx: oneshot::Sender<Result<Vec<SubscriptionGrant>, SessionError>>,
    },
    Unsubscribe {
        topics: Vec<String>,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
}

impl QueuedOp {
    fn fail_closed(self) {
        match self {
            QueuedOp::Publish { response_tx, .. } => {
                let _ = response_tx.send(Err(SessionError::ConnectionClosed));
            }
            QueuedOp::Subscribe { response_tx, .. } => {
                let _ = response_tx.send(Err(SessionError::ConnectionClosed));
            }
            QueuedOp::Unsubscribe { response_tx, .. } => {
                let _ = response_tx.send(Err(SessionError::ConnectionClosed));
            }
        }
    }
}

/// Reject a publish topic that is empty (without an alias) or carries
/// wildcard characters.
fn validate_publish_topic(topic: &str, has_alias: bool) -> Result<(), SessionError> {
    if topic.is_empty() && !has_alias {
        return Err(SessionError::InvalidTopic(topic.to_owned()));
    }
    if topic.contains(['+', '#']) {
        return Err(SessionError::InvalidTopic(topic.to_owned()));
    }
    Ok(())
}

/// Reject an empty or malformed subscription filter: `#` only as the final
/// whole level, `+` only as a whole level.
fn validate_filter(filter: &str) -> Result<(), SessionError> {
    if filter.is_empty() {
        return Err(SessionError::InvalidFilter(filter.to_owned()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err(SessionError::InvalidFilter(filter.to_owned()));
        }
        if level.contains('+') && *level != "+" {
            return Err(SessionError::InvalidFilter(filter.to_owned()));
        }
    }
    Ok(())
}

fn validate_options(options: &ConnectOptions) -> Result<(), SessionError> {
    if !*options.clean() && options.client_id().as_deref().map_or(true, str::is_empty) {
        return Err(SessionError::InvalidOptions(
            "client_id is required when clean is false",
        ));
    }
    Ok(())
}

/// Handle to a running MQTT session.
///
/// Created by [`Session::connect`], which spawns the actor task and starts
/// the first connection attempt immediately. Connection progress is observed
/// through [`Session::events`]; operations resolve according to their QoS
/// contract (a QoS 2 publish, for instance, resolves on PUBCOMP).
pub struct Session {
    tx_send: mpsc::UnboundedSender<Request>,
    bus: EventBus,
    #[allow(dead_code)] // May be used for cleanup in a future Drop implementation
    event_loop_handle: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Start a session with in-memory inflight stores.
    ///
    /// Validation failures (`InvalidOptions`) are the only synchronous
    /// errors; everything else surfaces through events or operation results.
    pub fn connect<C, D>(
        connector: C,
        codec: D,
        options: ConnectOptions,
    ) -> Result<Self, SessionError>
    where
        C: Connector + 'static,
        D: PacketCodec + 'static,
    {
        Self::connect_with_stores(
            connector,
            codec,
            options,
            Box::new(MemoryStore::new()),
            Box::new(MemoryStore::new()),
        )
    }

    /// Start a session with caller-supplied stores, e.g. for durability
    /// beyond the process.
    pub fn connect_with_stores<C, D>(
        connector: C,
        codec: D,
        options: ConnectOptions,
        outgoing: Box<dyn PacketStore>,
        incoming: Box<dyn PacketStore>,
    ) -> Result<Self, SessionError>
    where
        C: Connector + 'static,
        D: PacketCodec + 'static,
    {
        validate_options(&options)?;
        let bus = EventBus::new(EVENT_CHANNEL_CAPACITY);
        let (tx_send, rx_send) = mpsc::unbounded_channel();
        let core = SessionCore::new(options, Box::new(codec), outgoing, incoming, bus.clone());
        let event_loop_handle = tokio::spawn(run_session(core, Box::new(connector), rx_send));
        Ok(Self {
            tx_send,
            bus,
            event_loop_handle,
        })
    }

    /// Publish a message. Resolves immediately for QoS 0, on PUBACK for
    /// QoS 1, and on PUBCOMP for QoS 2; failures surface only through this
    /// result, never through the event bus.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), SessionError> {
        let topic = topic.into();
        validate_publish_topic(&topic, options.properties.topic_alias.is_some())?;
        let publish = Publish {
            topic,
            payload,
            qos: options.qos,
            retain: options.retain,
            dup: options.dup,
            packet_id: None,
            properties: options.properties,
        };
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::Publish {
                publish,
                response_tx,
            })
            .map_err(|_| SessionError::ChannelClosed)?;
        response_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Subscribe to one or more filters in a single SUBSCRIBE packet.
    ///
    /// The grants are positional: one entry per requested filter, carrying
    /// the granted QoS or a failure code >= 0x80. Failed filters are
    /// excluded from the resubscribe map.
    pub async fn subscribe(
        &self,
        entries: Vec<SubscribeEntry>,
    ) -> Result<Vec<SubscriptionGrant>, SessionError> {
        if entries.is_empty() {
            return Err(SessionError::InvalidFilter(String::new()));
        }
        for entry in &entries {
            validate_filter(&entry.topic_filter)?;
        }
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::Subscribe {
                entries,
                response_tx,
            })
            .map_err(|_| SessionError::ChannelClosed)?;
        response_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Subscribe to a single filter.
    pub async fn subscribe_topic(
        &self,
        filter: impl Into<String>,
        opts: SubscribeOpts,
    ) -> Result<Vec<SubscriptionGrant>, SessionError> {
        self.subscribe(vec![SubscribeEntry::new(filter, opts)]).await
    }

    pub async fn unsubscribe(&self, topics: Vec<String>) -> Result<(), SessionError> {
        for topic in &topics {
            validate_filter(topic)?;
        }
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::Unsubscribe {
                topics,
                response_tx,
            })
            .map_err(|_| SessionError::ChannelClosed)?;
        response_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// End the session.
    ///
    /// `force` destroys the transport immediately and rejects every pending
    /// operation with a connection-closed failure. A graceful end defers the
    /// DISCONNECT packet until the outgoing inflight window drains or the
    /// configured grace period elapses.
    pub async fn end(&self, force: bool) -> Result<(), SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::End { force, response_tx })
            .map_err(|_| SessionError::ChannelClosed)?;
        response_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Subscribe to the session event stream.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub async fn state(&self) -> Result<SessionState, SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::GetState { response_tx })
            .map_err(|_| SessionError::ChannelClosed)?;
        response_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Snapshot of the outgoing store in insertion order, e.g. for external
    /// session persistence.
    pub async fn stored_packets(&self) -> Result<Vec<StoredPacket>, SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::GetStoredPackets { response_tx })
            .map_err(|_| SessionError::ChannelClosed)?;
        response_rx.await.map_err(|_| SessionError::ChannelClosed)
    }
}

/// Sans-I/O session state machine. Mutated only by the actor task.
struct SessionCore {
    options: ConnectOptions,
    codec: Box<dyn PacketCodec>,
    bus: EventBus,
    state: SessionState,
    allocator: Box<dyn PacketIdAllocator>,
    outgoing: Box<dyn PacketStore>,
    incoming: Box<dyn PacketStore>,
    inflight: HashMap<PacketId, InflightEntry>,
    /// Known subscriptions in first-subscribe order, for resubscribe.
    resubscriptions: Vec<(String, SubscribeOpts)>,
    offline_queue: VecDeque<QueuedOp>,
    /// Stored publishes waiting for receive-maximum vacancies.
    quota_queue: VecDeque<PacketId>,
    /// Remaining receive-maximum window, `None` when unlimited.
    send_quota: Option<u16>,
    alias_send: Option<TopicAliasSend>,
    alias_recv: Option<TopicAliasRecv>,
    keep_alive: KeepAliveState,
    maximum_packet_size: Option<u32>,
    rx_buf: Vec<u8>,
    session_present: bool,
    first_connection: bool,
    offline_emitted: bool,
    ending: bool,
    pending_end_graceful: bool,
    end_responders: Vec<oneshot::Sender<Result<(), SessionError>>>,
}

impl SessionCore {
    fn new(
        options: ConnectOptions,
        codec: Box<dyn PacketCodec>,
        outgoing: Box<dyn PacketStore>,
        incoming: Box<dyn PacketStore>,
        bus: EventBus,
    ) -> Self {
        let allocator = allocator_for(*options.packet_id_strategy());
        let keep_alive = KeepAliveState::new(*options.keep_alive_secs());
        let alias_recv = (options.protocol_version().is_v5()
            && *options.topic_alias_maximum() > 0)
            .then(|| TopicAliasRecv::new(*options.topic_alias_maximum()));
        Self {
            options,
            codec,
            bus,
            state: SessionState::Disconnected,
            allocator,
            outgoing,
            incoming,
            inflight: HashMap::new(),
            resubscriptions: Vec::new(),
            offline_queue: VecDeque::new(),
            quota_queue: VecDeque::new(),
            send_quota: None,
            alias_send: None,
            alias_recv,
            keep_alive,
            maximum_packet_size: None,
            rx_buf: Vec::new(),
            session_present: false,
            first_connection: true,
            offline_emitted: false,
            ending: false,
            pending_end_graceful: false,
            end_responders: Vec::new(),
        }
    }

    // ---- lifecycle -------------------------------------------------------

    fn start(&mut self, effects: &mut VecDeque<Effect>) {
        self.state = SessionState::Connecting;
        effects.push_back(Effect::Dial);
    }

    fn on_transport_opened(&mut self, effects: &mut VecDeque<Effect>) {
        self.rx_buf.clear();
        self.state = SessionState::Connecting;
        let connect = self.build_connect();
        if let Err(e) = self.send_packet(Packet::Connect(connect), None, effects) {
            // A CONNECT that cannot be encoded will never succeed; do not
            // retry.
            error!(error = %e, "failed to encode CONNECT");
            self.bus.error(e);
            effects.push_back(Effect::CloseTransport);
            self.state = SessionState::Disconnected;
            return;
        }
        let timeout_ms = *self.options.connect_timeout_ms();
        if timeout_ms > 0 {
            effects.push_back(Effect::StartTimer {
                kind: TimerKind::ConnackTimeout,
                delay: Duration::from_millis(timeout_ms),
            });
        }
    }

    fn on_dial_error(&mut self, error: TransportError, effects: &mut VecDeque<Effect>) {
        if self.ending {
            self.finalize_end(effects);
            return;
        }
        if error.is_fatal() {
            self.bus.error(SessionError::Transport(error));
        } else {
            debug!(error = %error, "connect attempt failed");
        }
        let period = *self.options.reconnect_period_ms();
        if period > 0 {
            self.state = SessionState::Reconnecting;
            if !self.offline_emitted {
                self.bus.emit(SessionEvent::Offline);
                self.offline_emitted = true;
            }
            effects.push_back(Effect::StartTimer {
                kind: TimerKind::ReconnectDelay,
                delay: Duration::from_millis(period),
            });
        } else {
            self.state = SessionState::Disconnected;
            self.bus.emit(SessionEvent::Close);
        }
    }

    fn on_transport_closed(
        &mut self,
        error: Option<TransportError>,
        effects: &mut VecDeque<Effect>,
    ) {
        if self.state == SessionState::Disconnected && !self.ending {
            return;
        }
        let surfaced = match error {
            Some(e) if e.is_fatal() => Some(SessionError::Transport(e)),
            Some(e) => {
                debug!(error = %e, "non-fatal transport error treated as stream close");
                None
            }
            None => None,
        };
        self.handle_stream_failure(surfaced, effects);
    }

    fn on_write_error(&mut self, error: TransportError, effects: &mut VecDeque<Effect>) {
        warn!(error = %error, "transport write failed");
        let surfaced = error
            .is_fatal()
            .then(|| SessionError::Transport(error));
        self.handle_stream_failure(surfaced, effects);
    }

    /// Unified teardown for every path that loses the stream without an
    /// explicit `end()`: recv close/error, write error, keepalive timeout,
    /// connack timeout, CONNACK refusal, server-initiated DISCONNECT.
    fn handle_stream_failure(
        &mut self,
        error: Option<SessionError>,
        effects: &mut VecDeque<Effect>,
    ) {
        effects.push_back(Effect::CancelTimer(TimerKind::ConnackTimeout));
        effects.push_back(Effect::CancelTimer(TimerKind::KeepAliveTick));
        effects.push_back(Effect::CloseTransport);
        self.rx_buf.clear();
        // Broker-side alias state dies with the connection.
        self.alias_send = None;
        self.send_quota = None;
        self.quota_queue.clear();
        self.fail_volatile_inflight();

        if self.ending || self.state == SessionState::Disconnecting {
            self.finalize_end(effects);
            return;
        }

        if let Some(e) = error {
            self.bus.error(e);
        }
        self.bus.emit(SessionEvent::Close);
        if !self.offline_emitted {
            self.bus.emit(SessionEvent::Offline);
            self.offline_emitted = true;
        }
        let period = *self.options.reconnect_period_ms();
        if period > 0 {
            self.state = SessionState::Reconnecting;
            effects.push_back(Effect::StartTimer {
                kind: TimerKind::ReconnectDelay,
                delay: Duration::from_millis(period),
            });
        } else {
            self.state = SessionState::Disconnected;
        }
    }

    fn build_connect(&self) -> Connect {
        let v5 = self.options.protocol_version().is_v5();
        let mut properties = if v5 {
            self.options.connect_properties().clone()
        } else {
            Properties::default()
        };
        if v5 && *self.options.topic_alias_maximum() > 0 {
            properties.topic_alias_maximum = Some(*self.options.topic_alias_maximum());
        }
        Connect {
            client_id: self.options.client_id().clone().unwrap_or_default(),
            clean: *self.options.clean(),
            keep_alive: *self.options.keep_alive_secs(),
            username: self.options.username().clone(),
            password: self.options.password().clone(),
            will: self.options.will().clone(),
            properties,
        }
    }

    fn handle_connack(&mut self, connack: Connack, effects: &mut VecDeque<Effect>) {
        if self.state != SessionState::Connecting {
            debug!(state = ?self.state, "ignoring CONNACK outside of Connecting");
            return;
        }
        effects.push_back(Effect::CancelTimer(TimerKind::ConnackTimeout));

        let v5 = self.options.protocol_version().is_v5();
        if !reason_code_is_success(connack.reason_code) {
            let reason = if v5 {
                reason_code_name(connack.reason_code)
            } else {
                connect_return_code_name(connack.reason_code)
            };
            self.bus.error(SessionError::ConnectionRefused {
                code: connack.reason_code,
                reason,
            });
            self.handle_stream_failure(None, effects);
            return;
        }

        self.state = SessionState::Connected;
        self.offline_emitted = false;
        self.session_present = connack.session_present;
        self.maximum_packet_size = connack.properties.maximum_packet_size;
        self.send_quota = if v5 {
            connack.properties.receive_maximum
        } else {
            None
        };
        let broker_alias_max = connack.properties.topic_alias_maximum.unwrap_or(0);
        self.alias_send = (v5 && broker_alias_max > 0).then(|| TopicAliasSend::new(broker_alias_max));
        if let Some(server_keep_alive) = connack.properties.server_keep_alive {
            self.keep_alive = KeepAliveState::new(server_keep_alive);
        }
        if let Some(interval) = self.keep_alive.interval() {
            self.keep_alive.on_activity();
            effects.push_back(Effect::StartTimer {
                kind: TimerKind::KeepAliveTick,
                delay: interval,
            });
        }

        self.run_store_replay(effects);
        self.resubscribe(effects);
        self.drain_offline_queue(effects);
        self.bus.emit(SessionEvent::Connect {
            session_present: connack.session_present,
        });
        self.first_connection = false;
    }

    /// Replay the outgoing store after a successful reconnect, in insertion
    /// order, at most once per entry per pass. The entries are already
    /// durable, so nothing is re-stored. A mid-scan disconnect abandons the
    /// remaining effects and the next reconnect starts a fresh pass.
    fn run_store_replay(&mut self, effects: &mut VecDeque<Effect>) {
        let snapshot = self.outgoing.snapshot();
        let mut processed: HashSet<PacketId> = HashSet::new();
        for stored in snapshot {
            let Some(id) = stored.packet_id() else { continue };
            if !processed.insert(id) {
                continue;
            }
            match stored {
                StoredPacket::Publish(mut publish) => {
                    if publish.qos != Qos::AtMostOnce {
                        publish.dup = true;
                    }
                    self.dispatch_outgoing_publish(id, publish, effects);
                }
                StoredPacket::Pubrel(pubrel) => {
                    if let Err(e) = self.send_packet(Packet::Pubrel(pubrel), None, effects) {
                        warn!(packet_id = id, error = %e, "failed to replay PUBREL");
                    }
                }
            }
        }
    }

    /// Re-issue SUBSCRIBE for known subscriptions when the broker did not
    /// resume the session. v5.0 sends one SUBSCRIBE per topic; v3.1/v3.1.1
    /// send a single batched SUBSCRIBE. The divergence is deliberate and the
    /// two paths are kept separate.
    fn resubscribe(&mut self, effects: &mut VecDeque<Effect>) {
        if !*self.options.resubscribe() || self.resubscriptions.is_empty() {
            return;
        }
        let v5 = self.options.protocol_version().is_v5();
        let not_resumed = *self.options.clean() || (v5 && !self.session_present);
        if !not_resumed {
            return;
        }

        if v5 {
            let topics: Vec<(String, SubscribeOpts)> = self.resubscriptions.clone();
            for (topic, opts) in topics {
                let Some(id) = self.allocator.allocate() else {
                    error!("packet id space exhausted during resubscribe");
                    return;
                };
                let entries = vec![SubscribeEntry::new(topic, opts)];
                self.inflight.insert(
                    id,
                    InflightEntry {
                        kind: InflightKind::Subscribe {
                            entries: entries.clone(),
                        },
                        volatile: true,
                        responder: None,
                    },
                );
                let subscribe = Subscribe {
                    packet_id: id,
                    entries,
                    properties: Properties::default(),
                };
                if let Err(e) = self.send_packet(Packet::Subscribe(subscribe), None, effects) {
                    warn!(packet_id = id, error = %e, "failed to resubscribe");
                }
            }
        } else {
            let Some(id) = self.allocator.allocate() else {
                error!("packet id space exhausted during resubscribe");
                return;
            };
            let entries: Vec<SubscribeEntry> = self
                .resubscriptions
                .iter()
                .map(|(topic, opts)| SubscribeEntry::new(topic.clone(), *opts))
                .collect();
            self.inflight.insert(
                id,
                InflightEntry {
                    kind: InflightKind::Subscribe {
                        entries: entries.clone(),
                    },
                    volatile: true,
                    responder: None,
                },
            );
            let subscribe = Subscribe {
                packet_id: id,
                entries,
                properties: Properties::default(),
            };
            if let Err(e) = self.send_packet(Packet::Subscribe(subscribe), None, effects) {
                warn!(packet_id = id, error = %e, "failed to resubscribe");
            }
        }
    }

    fn drain_offline_queue(&mut self, effects: &mut VecDeque<Effect>) {
        let ops: Vec<QueuedOp> = self.offline_queue.drain(..).collect();
        for op in ops {
            match op {
                QueuedOp::Publish {
                    publish,
                    response_tx,
                } => self.handle_publish(publish, response_tx, effects),
                QueuedOp::Subscribe {
                    entries,
                    response_tx,
                } => self.handle_subscribe(entries, response_tx, effects),
                QueuedOp::Unsubscribe {
                    topics,
                    response_tx,
                } => self.handle_unsubscribe(topics, response_tx, effects),
            }
        }
    }

    // ---- requests --------------------------------------------------------

    fn handle_request(&mut self, request: Request, effects: &mut VecDeque<Effect>) {
        match request {
            Request::Publish {
                publish,
                response_tx,
            } => self.handle_publish(publish, response_tx, effects),
            Request::Subscribe {
                entries,
                response_tx,
            } => self.handle_subscribe(entries, response_tx, effects),
            Request::Unsubscribe {
                topics,
                response_tx,
            } => self.handle_unsubscribe(topics, response_tx, effects),
            Request::End { force, response_tx } => self.handle_end(force, response_tx, effects),
            Request::GetState { response_tx } => {
                let _ = response_tx.send(self.state);
            }
            Request::GetStoredPackets { response_tx } => {
                let _ = response_tx.send(self.outgoing.snapshot());
            }
        }
    }

    fn handle_publish(
        &mut self,
        mut publish: Publish,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
        effects: &mut VecDeque<Effect>,
    ) {
        if self.ending {
            let _ = response_tx.send(Err(SessionError::ConnectionClosed));
            return;
        }

        if publish.qos == Qos::AtMostOnce {
            if self.state == SessionState::Connected {
                match self.wire_publish(publish) {
                    Ok(wire) => {
                        let _ =
                            self.send_packet(Packet::Publish(wire), Some(response_tx), effects);
                    }
                    Err(e) => {
                        let _ = response_tx.send(Err(e));
                    }
                }
            } else if *self.options.queue_qos_zero() {
                self.offline_queue.push_back(QueuedOp::Publish {
                    publish,
                    response_tx,
                });
            } else {
                let _ = response_tx.send(Err(SessionError::OfflineQueueDisabled));
            }
            return;
        }

        let Some(id) = self.allocator.allocate() else {
            let _ = response_tx.send(Err(SessionError::PacketIdExhausted));
            return;
        };
        publish.packet_id = Some(id);

        // Clone-before-store: the stored copy always carries the full topic,
        // never a connection-scoped alias.
        let mut stored = publish.clone();
        stored.properties.topic_alias = None;
        if let Err(e) = self.outgoing.put(id, StoredPacket::Publish(stored)) {
            self.allocator.deallocate(id);
            let _ = response_tx.send(Err(e.into()));
            return;
        }

        let kind = match publish.qos {
            Qos::AtLeastOnce => InflightKind::PublishQos1,
            _ => InflightKind::PublishQos2 { pubrel_sent: false },
        };
        self.inflight.insert(
            id,
            InflightEntry {
                kind,
                volatile: false,
                responder: Some(AckResponder::Publish(response_tx)),
            },
        );

        if self.state == SessionState::Connected {
            self.dispatch_outgoing_publish(id, publish, effects);
        }
        // Otherwise the store replay pass writes it after the next CONNACK.
    }

    /// Write a QoS > 0 publish that is already stored and inflight, honoring
    /// the receive-maximum window.
    fn dispatch_outgoing_publish(
        &mut self,
        id: PacketId,
        publish: Publish,
        effects: &mut VecDeque<Effect>,
    ) {
        if matches!(self.send_quota, Some(0)) {
            self.quota_queue.push_back(id);
            return;
        }
        let wire = match self.wire_publish(publish) {
            Ok(wire) => wire,
            Err(e) => {
                self.fail_outgoing(id, e);
                return;
            }
        };
        if let Err(e) = self.send_packet(Packet::Publish(wire), None, effects) {
            self.fail_outgoing(id, e);
            return;
        }
        if let Some(quota) = self.send_quota.as_mut() {
            *quota -= 1;
        }
    }

    /// Release everything held by a QoS > 0 publish that failed before (or
    /// instead of) acknowledgment, and fail its caller.
    fn fail_outgoing(&mut self, id: PacketId, error: SessionError) {
        let _ = self.outgoing.del(id);
        self.allocator.deallocate(id);
        if let Some(entry) = self.inflight.remove(&id) {
            if let Some(AckResponder::Publish(tx)) = entry.responder {
                let _ = tx.send(Err(error));
            }
        }
    }

    /// One acknowledgment freed a receive-maximum vacancy; release queued
    /// publishes into it.
    fn release_quota(&mut self, effects: &mut VecDeque<Effect>) {
        if let Some(quota) = self.send_quota.as_mut() {
            *quota += 1;
        }
        while !matches!(self.send_quota, Some(0)) {
            let Some(id) = self.quota_queue.pop_front() else { break };
            let publish = match self.outgoing.get(id) {
                Ok(StoredPacket::Publish(p)) => p.clone(),
                _ => continue,
            };
            self.dispatch_outgoing_publish(id, publish, effects);
        }
    }

    fn handle_subscribe(
        &mut self,
        entries: Vec<SubscribeEntry>,
        response_tx: oneshot::Sender<Result<Vec<SubscriptionGrant>, SessionError>>,
        effects: &mut VecDeque<Effect>,
    ) {
        if self.ending {
            let _ = response_tx.send(Err(SessionError::ConnectionClosed));
            return;
        }
        if self.state != SessionState::Connected {
            self.offline_queue.push_back(QueuedOp::Subscribe {
                entries,
                response_tx,
            });
            return;
        }
        let Some(id) = self.allocator.allocate() else {
            let _ = response_tx.send(Err(SessionError::PacketIdExhausted));
            return;
        };
        self.inflight.insert(
            id,
            InflightEntry {
                kind: InflightKind::Subscribe {
                    entries: entries.clone(),
                },
                volatile: true,
                responder: Some(AckResponder::Subscribe(response_tx)),
            },
        );
        let subscribe = Subscribe {
            packet_id: id,
            entries,
            properties: Properties::default(),
        };
        if let Err(e) = self.send_packet(Packet::Subscribe(subscribe), None, effects) {
            self.allocator.deallocate(id);
            if let Some(entry) = self.inflight.remove(&id) {
                if let Some(AckResponder::Subscribe(tx)) = entry.responder {
                    let _ = tx.send(Err(e));
                }
            }
        }
    }

    fn handle_unsubscribe(
        &mut self,
        topics: Vec<String>,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
        effects: &mut VecDeque<Effect>,
    ) {
        if self.ending {
            let _ = response_tx.send(Err(SessionError::ConnectionClosed));
            return;
        }
        if self.state != SessionState::Connected {
            self.offline_queue.push_back(QueuedOp::Unsubscribe {
                topics,
                response_tx,
            });
            return;
        }
        let Some(id) = self.allocator.allocate() else {
            let _ = response_tx.send(Err(SessionError::PacketIdExhausted));
            return;
        };
        self.inflight.insert(
            id,
            InflightEntry {
                kind: InflightKind::Unsubscribe {
                    topics: topics.clone(),
                },
                volatile: true,
                responder: Some(AckResponder::Unsubscribe(response_tx)),
            },
        );
        let unsubscribe = Unsubscribe {
            packet_id: id,
            topics,
            properties: Properties::default(),
        };
        if let Err(e) = self.send_packet(Packet::Unsubscribe(unsubscribe), None, effects) {
            self.allocator.deallocate(id);
            if let Some(entry) = self.inflight.remove(&id) {
                if let Some(AckResponder::Unsubscribe(tx)) = entry.responder {
                    let _ = tx.send(Err(e));
                }
            }
        }
    }

    fn handle_end(
        &mut self,
        force: bool,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
        effects: &mut VecDeque<Effect>,
    ) {
        if self.ending {
            // End already in progress; queue for the same completion.
            self.end_responders.push(response_tx);
            return;
        }
        self.ending = true;
        self.end_responders.push(response_tx);
        effects.push_back(Effect::CancelTimer(TimerKind::ConnackTimeout));
        effects.push_back(Effect::CancelTimer(TimerKind::KeepAliveTick));
        effects.push_back(Effect::CancelTimer(TimerKind::ReconnectDelay));

        if force {
            if *self.options.reconnect_period_ms() == 0 && *self.options.clean() {
                // Nothing can ever replay this state; drop it.
                self.outgoing.clear();
                self.incoming.clear();
            }
            effects.push_back(Effect::CloseTransport);
            self.finalize_end(effects);
            return;
        }

        if self.state == SessionState::Connected {
            self.state = SessionState::Disconnecting;
            if self.outgoing_window_empty() {
                self.finish_disconnect(effects);
            } else {
                self.pending_end_graceful = true;
                effects.push_back(Effect::StartTimer {
                    kind: TimerKind::EndGrace,
                    delay: Duration::from_millis(*self.options.end_grace_ms()),
                });
            }
        } else {
            // Offline: there is no stream to flush on.
            effects.push_back(Effect::CloseTransport);
            self.finalize_end(effects);
        }
    }

    fn outgoing_window_empty(&self) -> bool {
        self.quota_queue.is_empty() && !self.inflight.values().any(InflightEntry::is_publish)
    }

    fn maybe_finish_graceful_end(&mut self, effects: &mut VecDeque<Effect>) {
        if self.pending_end_graceful && self.outgoing_window_empty() {
            self.pending_end_graceful = false;
            effects.push_back(Effect::CancelTimer(TimerKind::EndGrace));
            self.finish_disconnect(effects);
        }
    }

    fn finish_disconnect(&mut self, effects: &mut VecDeque<Effect>) {
        let disconnect = Disconnect {
            reason_code: 0,
            properties: Properties::default(),
        };
        if let Err(e) = self.send_packet(Packet::Disconnect(disconnect), None, effects) {
            warn!(error = %e, "failed to send DISCONNECT");
        }
        effects.push_back(Effect::CloseTransport);
        self.finalize_end(effects);
    }

    fn finalize_end(&mut self, effects: &mut VecDeque<Effect>) {
        for kind in ALL_TIMERS {
            effects.push_back(Effect::CancelTimer(kind));
        }
        self.state = SessionState::Disconnected;
        self.pending_end_graceful = false;
        self.fail_all_inflight();
        self.fail_offline_queue();
        self.quota_queue.clear();
        self.bus.emit(SessionEvent::Close);
        self.bus.emit(SessionEvent::End);
        for tx in self.end_responders.drain(..) {
            let _ = tx.send(Ok(()));
        }
        effects.push_back(Effect::Stop);
    }

    fn handle_handle_dropped(&mut self, effects: &mut VecDeque<Effect>) {
        self.ending = true;
        self.fail_all_inflight();
        self.fail_offline_queue();
        for kind in ALL_TIMERS {
            effects.push_back(Effect::CancelTimer(kind));
        }
        effects.push_back(Effect::CloseTransport);
        effects.push_back(Effect::Stop);
    }

    fn fail_volatile_inflight(&mut self) {
        let ids: Vec<PacketId> = self
            .inflight
            .iter()
            .filter(|(_, entry)| entry.volatile)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(entry) = self.inflight.remove(&id) {
                self.allocator.deallocate(id);
                if let Some(responder) = entry.responder {
                    responder.fail_closed();
                }
            }
        }
    }

    fn fail_all_inflight(&mut self) {
        let entries: Vec<(PacketId, InflightEntry)> = self.inflight.drain().collect();
        for (id, entry) in entries {
            // Publish ids stay paired with their store entries; volatile ids
            // go back to the pool.
            if entry.volatile {
                self.allocator.deallocate(id);
            }
            if let Some(responder) = entry.responder {
                responder.fail_closed();
            }
        }
    }

    fn fail_offline_queue(&mut self) {
        for op in self.offline_queue.drain(..) {
            op.fail_closed();
        }
    }

    // ---- timers ----------------------------------------------------------

    fn handle_timer(&mut self, kind: TimerKind, effects: &mut VecDeque<Effect>) {
        match kind {
            TimerKind::ConnackTimeout => {
                if self.state == SessionState::Connecting {
                    self.bus.error(SessionError::Timeout(TimeoutKind::Connack));
                    self.handle_stream_failure(None, effects);
                }
            }
            TimerKind::KeepAliveTick => {
                if self.state != SessionState::Connected {
                    return;
                }
                match self.keep_alive.tick() {
                    KeepAliveAction::Idle => self.rearm_keep_alive(effects),
                    KeepAliveAction::SendPing => {
                        if let Err(e) = self.send_packet(Packet::Pingreq, None, effects) {
                            warn!(error = %e, "failed to send PINGREQ");
                        }
                        self.rearm_keep_alive(effects);
                    }
                    KeepAliveAction::Timeout => {
                        self.bus
                            .error(SessionError::Timeout(TimeoutKind::Keepalive));
                        self.handle_stream_failure(None, effects);
                    }
                }
            }
            TimerKind::ReconnectDelay => {
                if self.state == SessionState::Reconnecting && !self.ending {
                    self.bus.emit(SessionEvent::Reconnect);
                    self.state = SessionState::Connecting;
                    effects.push_back(Effect::Dial);
                }
            }
            TimerKind::EndGrace => {
                if self.pending_end_graceful {
                    self.pending_end_graceful = false;
                    self.finish_disconnect(effects);
                }
            }
        }
    }

    fn rearm_keep_alive(&mut self, effects: &mut VecDeque<Effect>) {
        if let Some(interval) = self.keep_alive.interval() {
            effects.push_back(Effect::StartTimer {
                kind: TimerKind::KeepAliveTick,
                delay: interval,
            });
        }
    }

    /// Traffic observed: reset the keepalive counter and its tick timer.
    fn touch_keep_alive(&mut self, effects: &mut VecDeque<Effect>) {
        if self.state == SessionState::Connected {
            self.keep_alive.on_activity();
            self.rearm_keep_alive(effects);
        }
    }

    // ---- incoming packets ------------------------------------------------

    fn on_bytes(&mut self, data: &[u8], effects: &mut VecDeque<Effect>) {
        self.rx_buf.extend_from_slice(data);
        loop {
            match self.codec.decode(&self.rx_buf) {
                Ok(DecodeOutcome::Packet { packet, consumed }) => {
                    self.rx_buf.drain(..consumed);
                    self.dispatch_packet(packet, effects);
                    if matches!(
                        self.state,
                        SessionState::Reconnecting | SessionState::Disconnected
                    ) {
                        // The stream died while dispatching; remaining bytes
                        // belong to the old connection.
                        self.rx_buf.clear();
                        break;
                    }
                }
                Ok(DecodeOutcome::NeedMoreData) => break,
                Err(e) => {
                    self.bus
                        .error(SessionError::ProtocolViolation(e.to_string()));
                    self.rx_buf.clear();
                    self.handle_stream_failure(None, effects);
                    break;
                }
            }
        }
    }

    fn dispatch_packet(&mut self, packet: Packet, effects: &mut VecDeque<Effect>) {
        self.bus.emit(SessionEvent::PacketReceive(packet.clone()));
        self.touch_keep_alive(effects);
        match packet {
            Packet::Connack(p) => self.handle_connack(p, effects),
            Packet::Publish(p) => self.handle_incoming_publish(p, effects),
            Packet::Puback(p) => self.handle_puback(p, effects),
            Packet::Pubrec(p) => self.handle_pubrec(p, effects),
            Packet::Pubrel(p) => self.handle_pubrel(p, effects),
            Packet::Pubcomp(p) => self.handle_pubcomp(p, effects),
            Packet::Suback(p) => self.handle_suback(p),
            Packet::Unsuback(p) => self.handle_unsuback(p),
            Packet::Pingresp => {}
            Packet::Disconnect(p) => {
                warn!(reason_code = p.reason_code, "broker sent DISCONNECT");
                self.handle_stream_failure(None, effects);
            }
            Packet::Auth(p) => {
                debug!(reason_code = p.reason_code, "AUTH exchange not handled by the engine");
            }
            other => {
                self.bus.error(SessionError::ProtocolViolation(format!(
                    "unexpected {:?} from broker",
                    other.packet_type()
                )));
            }
        }
    }

    fn handle_incoming_publish(&mut self, publish: Publish, effects: &mut VecDeque<Effect>) {
        let mut publish = publish;

        if let Some(alias) = publish.properties.topic_alias {
            match self.alias_recv.as_mut() {
                None => {
                    self.bus
                        .error(SessionError::TopicAlias(TopicAliasError::NotEnabled));
                    return;
                }
                Some(aliases) => {
                    if publish.topic.is_empty() {
                        match aliases.topic_by_alias(alias) {
                            Ok(topic) => publish.topic = topic.to_owned(),
                            Err(e) => {
                                self.bus.error(e.into());
                                return;
                            }
                        }
                    } else if let Err(e) = aliases.put(&publish.topic, alias) {
                        self.bus.error(e.into());
                        return;
                    }
                }
            }
        } else if publish.topic.is_empty() {
            self.bus
                .error(SessionError::TopicAlias(TopicAliasError::Missing));
            return;
        }

        let ack_code = self
            .options
            .custom_handle_acks()
            .as_ref()
            .map(|handler| handler.decide(&publish))
            .unwrap_or(0);

        match publish.qos {
            Qos::AtMostOnce => {
                if ack_code < 0x80 {
                    self.bus.emit(SessionEvent::Message(publish));
                }
            }
            Qos::AtLeastOnce => {
                let Some(id) = publish.packet_id else {
                    self.bus.error(SessionError::ProtocolViolation(
                        "QoS 1 publish without packet identifier".into(),
                    ));
                    return;
                };
                if ack_code < 0x80 {
                    self.bus.emit(SessionEvent::Message(publish));
                }
                let puback = Puback {
                    packet_id: id,
                    reason_code: ack_code,
                    properties: Properties::default(),
                };
                if let Err(e) = self.send_packet(Packet::Puback(puback), None, effects) {
                    warn!(packet_id = id, error = %e, "failed to send PUBACK");
                }
            }
            Qos::ExactlyOnce => {
                let Some(id) = publish.packet_id else {
                    self.bus.error(SessionError::ProtocolViolation(
                        "QoS 2 publish without packet identifier".into(),
                    ));
                    return;
                };
                if self.incoming.contains(id) {
                    // Duplicate before PUBREL: acknowledge again, never
                    // deliver twice.
                    debug!(packet_id = id, "duplicate QoS 2 publish before PUBREL");
                } else if ack_code < 0x80 {
                    let _ = self
                        .incoming
                        .put(id, StoredPacket::Publish(publish.clone()));
                    self.bus.emit(SessionEvent::Message(publish));
                }
                let pubrec = Pubrec {
                    packet_id: id,
                    reason_code: ack_code,
                    properties: Properties::default(),
                };
                if let Err(e) = self.send_packet(Packet::Pubrec(pubrec), None, effects) {
                    warn!(packet_id = id, error = %e, "failed to send PUBREC");
                }
            }
        }
    }

    fn handle_pubrel(&mut self, pubrel: Pubrel, effects: &mut VecDeque<Effect>) {
        let id = pubrel.packet_id;
        if self.incoming.del(id).is_err() {
            debug!(packet_id = id, "PUBREL with no incoming store entry");
        }
        let pubcomp = Pubcomp {
            packet_id: id,
            reason_code: 0,
            properties: Properties::default(),
        };
        if let Err(e) = self.send_packet(Packet::Pubcomp(pubcomp), None, effects) {
            warn!(packet_id = id, error = %e, "failed to send PUBCOMP");
        }
    }

    fn handle_puback(&mut self, puback: Puback, effects: &mut VecDeque<Effect>) {
        let id = puback.packet_id;
        let is_qos1 = matches!(
            self.inflight.get(&id).map(|entry| &entry.kind),
            Some(InflightKind::PublishQos1)
        );
        if !is_qos1 {
            // Brokers may legitimately resend acks; never fatal.
            debug!(packet_id = id, "PUBACK with no matching QoS 1 inflight entry");
            return;
        }
        let Some(entry) = self.inflight.remove(&id) else { return };
        let _ = self.outgoing.del(id);
        self.allocator.deallocate(id);
        let result = if reason_code_is_success(puback.reason_code) {
            Ok(())
        } else {
            Err(SessionError::ReasonCode {
                code: puback.reason_code,
                reason: reason_code_name(puback.reason_code),
            })
        };
        if let Some(AckResponder::Publish(tx)) = entry.responder {
            let _ = tx.send(result);
        }
        self.release_quota(effects);
        self.notify_outgoing_progress(effects);
    }

    fn handle_pubrec(&mut self, pubrec: Pubrec, effects: &mut VecDeque<Effect>) {
        let id = pubrec.packet_id;
        let pubrel_state = match self.inflight.get(&id).map(|entry| &entry.kind) {
            Some(InflightKind::PublishQos2 { pubrel_sent }) => Some(*pubrel_sent),
            _ => None,
        };
        let Some(pubrel_sent) = pubrel_state else {
            debug!(packet_id = id, "PUBREC with no matching QoS 2 inflight entry");
            return;
        };

        if reason_code_is_success(pubrec.reason_code) {
            if let Some(entry) = self.inflight.get_mut(&id) {
                entry.kind = InflightKind::PublishQos2 { pubrel_sent: true };
            }
            let pubrel = Pubrel {
                packet_id: id,
                reason_code: 0,
                properties: Properties::default(),
            };
            if !pubrel_sent {
                // The publish obligation is replaced by the pubrel
                // obligation under the same store position.
                let _ = self.outgoing.put(id, StoredPacket::Pubrel(pubrel.clone()));
            }
            if let Err(e) = self.send_packet(Packet::Pubrel(pubrel), None, effects) {
                warn!(packet_id = id, error = %e, "failed to send PUBREL");
            }
        } else {
            // A failed PUBREC ends the flow; no PUBREL is sent.
            let Some(entry) = self.inflight.remove(&id) else { return };
            let _ = self.outgoing.del(id);
            self.allocator.deallocate(id);
            if let Some(AckResponder::Publish(tx)) = entry.responder {
                let _ = tx.send(Err(SessionError::ReasonCode {
                    code: pubrec.reason_code,
                    reason: reason_code_name(pubrec.reason_code),
                }));
            }
            self.release_quota(effects);
            self.notify_outgoing_progress(effects);
        }
    }

    fn handle_pubcomp(&mut self, pubcomp: Pubcomp, effects: &mut VecDeque<Effect>) {
        let id = pubcomp.packet_id;
        let ready = matches!(
            self.inflight.get(&id).map(|entry| &entry.kind),
            Some(InflightKind::PublishQos2 { pubrel_sent: true })
        );
        if !ready {
            debug!(packet_id = id, "PUBCOMP with no matching inflight entry");
            return;
        }
        let Some(entry) = self.inflight.remove(&id) else { return };
        let _ = self.outgoing.del(id);
        self.allocator.deallocate(id);
        let result = if reason_code_is_success(pubcomp.reason_code) {
            Ok(())
        } else {
            Err(SessionError::ReasonCode {
                code: pubcomp.reason_code,
                reason: reason_code_name(pubcomp.reason_code),
            })
        };
        if let Some(AckResponder::Publish(tx)) = entry.responder {
            let _ = tx.send(result);
        }
        self.release_quota(effects);
        self.notify_outgoing_progress(effects);
    }

    fn handle_suback(&mut self, suback: Suback) {
        let id = suback.packet_id;
        let is_subscribe = matches!(
            self.inflight.get(&id).map(|entry| &entry.kind),
            Some(InflightKind::Subscribe { .. })
        );
        if !is_subscribe {
            debug!(packet_id = id, "SUBACK with no matching inflight entry");
            return;
        }
        let Some(entry) = self.inflight.remove(&id) else { return };
        self.allocator.deallocate(id);
        let InflightKind::Subscribe { entries } = entry.kind else { return };

        if suback.granted.len() != entries.len() {
            warn!(
                packet_id = id,
                requested = entries.len(),
                granted = suback.granted.len(),
                "SUBACK grant count does not match request"
            );
        }

        // Grants correspond positionally to the requested subscriptions.
        let mut grants = Vec::with_capacity(entries.len());
        for (i, requested) in entries.iter().enumerate() {
            let code = suback.granted.get(i).copied().unwrap_or(0x80);
            if code < 0x80 {
                match self
                    .resubscriptions
                    .iter_mut()
                    .find(|(topic, _)| topic == &requested.topic_filter)
                {
                    Some((_, opts)) => *opts = requested.opts,
                    None => self
                        .resubscriptions
                        .push((requested.topic_filter.clone(), requested.opts)),
                }
            } else {
                self.resubscriptions
                    .retain(|(topic, _)| topic != &requested.topic_filter);
            }
            grants.push(SubscriptionGrant {
                topic_filter: requested.topic_filter.clone(),
                code,
            });
        }

        if let Some(AckResponder::Subscribe(tx)) = entry.responder {
            let _ = tx.send(Ok(grants));
        }
    }

    fn handle_unsuback(&mut self, unsuback: Unsuback) {
        let id = unsuback.packet_id;
        let is_unsubscribe = matches!(
            self.inflight.get(&id).map(|entry| &entry.kind),
            Some(InflightKind::Unsubscribe { .. })
        );
        if !is_unsubscribe {
            debug!(packet_id = id, "UNSUBACK with no matching inflight entry");
            return;
        }
        let Some(entry) = self.inflight.remove(&id) else { return };
        self.allocator.deallocate(id);
        let InflightKind::Unsubscribe { topics } = entry.kind else { return };
        self.resubscriptions
            .retain(|(topic, _)| !topics.contains(topic));
        if let Some(AckResponder::Unsubscribe(tx)) = entry.responder {
            let _ = tx.send(Ok(()));
        }
    }

    fn notify_outgoing_progress(&mut self, effects: &mut VecDeque<Effect>) {
        if self.outgoing.is_empty() {
            self.bus.emit(SessionEvent::OutgoingEmpty);
        }
        self.maybe_finish_graceful_end(effects);
    }

    // ---- outgoing plumbing -----------------------------------------------

    /// Apply send-side topic aliasing to a wire-bound publish.
    fn wire_publish(&mut self, mut publish: Publish) -> Result<Publish, SessionError> {
        match self.alias_send.as_mut() {
            None => {
                if publish.properties.topic_alias.is_some() {
                    // The peer advertised no alias space; fail loudly rather
                    // than silently stripping the alias.
                    return Err(TopicAliasError::NotEnabled.into());
                }
            }
            Some(aliases) => {
                if let Some(alias) = publish.properties.topic_alias {
                    if publish.topic.is_empty() {
                        if !aliases.contains_alias(alias) {
                            return Err(TopicAliasError::Unresolved(alias).into());
                        }
                    } else {
                        aliases.put(&publish.topic, alias)?;
                    }
                } else {
                    if *self.options.auto_use_topic_alias() {
                        if let Some(alias) = aliases.alias_by_topic(&publish.topic) {
                            publish.properties.topic_alias = Some(alias);
                            publish.topic = String::new();
                            return Ok(publish);
                        }
                    }
                    if *self.options.auto_assign_topic_alias() {
                        let alias = aliases.lru_alias();
                        aliases.put(&publish.topic, alias)?;
                        // Keep the full topic on first use so the broker
                        // learns the mapping.
                        publish.properties.topic_alias = Some(alias);
                    }
                }
            }
        }
        Ok(publish)
    }

    /// Encode and queue a packet for the transport, enforcing the negotiated
    /// maximum packet size. `done` resolves once the bytes are flushed.
    ///
    /// An encode or size failure is delivered to `done` when one is present;
    /// the returned error is for callers that have no responder of their own.
    fn send_packet(
        &mut self,
        packet: Packet,
        done: Option<oneshot::Sender<Result<(), SessionError>>>,
        effects: &mut VecDeque<Effect>,
    ) -> Result<(), SessionError> {
        let failure = match self.codec.encode(&packet) {
            Ok(bytes) => match self.maximum_packet_size {
                Some(max) if bytes.len() as u64 > u64::from(max) => {
                    SessionError::ProtocolViolation(format!(
                        "encoded packet of {} bytes exceeds negotiated maximum of {max}",
                        bytes.len()
                    ))
                }
                _ => {
                    let is_ping = matches!(packet, Packet::Pingreq);
                    self.bus.emit(SessionEvent::PacketSend(packet));
                    effects.push_back(Effect::Write { bytes, done });
                    // The ping itself must not reset its own liveness window.
                    if !is_ping {
                        self.touch_keep_alive(effects);
                    }
                    return Ok(());
                }
            },
            Err(e) => SessionError::Codec(e),
        };
        match done {
            Some(tx) => {
                let _ = tx.send(Err(failure));
                Ok(())
            }
            None => Err(failure),
        }
    }
}

#[derive(Default)]
struct TimerTable {
    connack: Option<tokio::task::JoinHandle<()>>,
    keep_alive: Option<tokio::task::JoinHandle<()>>,
    reconnect: Option<tokio::task::JoinHandle<()>>,
    end_grace: Option<tokio::task::JoinHandle<()>>,
}

impl TimerTable {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<tokio::task::JoinHandle<()>> {
        match kind {
            TimerKind::ConnackTimeout => &mut self.connack,
            TimerKind::KeepAliveTick => &mut self.keep_alive,
            TimerKind::ReconnectDelay => &mut self.reconnect,
            TimerKind::EndGrace => &mut self.end_grace,
        }
    }

    fn abort_all(&mut self) {
        for kind in ALL_TIMERS {
            if let Some(handle) = self.slot(kind).take() {
                handle.abort();
            }
        }
    }
}

async fn transport_recv(
    transport: &mut Option<Box<dyn TransportOps + Send>>,
    chunk: &mut [u8],
) -> Result<usize, TransportError> {
    match transport.as_mut() {
        Some(t) => t.recv(chunk).await,
        None => future::pending().await,
    }
}

/// Actor event loop: executes core effects, then waits for the next request,
/// timer fire, or transport read.
async fn run_session(
    mut core: SessionCore,
    mut connector: Box<dyn Connector>,
    mut rx_send: mpsc::UnboundedReceiver<Request>,
) {
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<TimerKind>();
    let mut timers = TimerTable::default();
    let mut transport: Option<Box<dyn TransportOps + Send>> = None;
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut effects: VecDeque<Effect> = VecDeque::new();

    core.start(&mut effects);

    'session: loop {
        while let Some(effect) = effects.pop_front() {
            match effect {
                Effect::Write { bytes, done } => {
                    let result = match transport.as_mut() {
                        Some(t) => Some(t.send(&[IoSlice::new(&bytes)]).await),
                        None => None,
                    };
                    match result {
                        Some(Ok(())) => {
                            if let Some(tx) = done {
                                let _ = tx.send(Ok(()));
                            }
                        }
                        Some(Err(e)) => {
                            if let Some(tx) = done {
                                let _ = tx.send(Err(SessionError::ConnectionClosed));
                            }
                            transport = None;
                            core.on_write_error(e, &mut effects);
                        }
                        None => {
                            // Stream lost while this write was queued; the
                            // store replay covers anything that must survive.
                            if let Some(tx) = done {
                                let _ = tx.send(Err(SessionError::ConnectionClosed));
                            }
                        }
                    }
                }
                Effect::StartTimer { kind, delay } => {
                    if let Some(handle) = timers.slot(kind).take() {
                        handle.abort();
                    }
                    let tx = timer_tx.clone();
                    *timers.slot(kind) = Some(tokio::spawn(async move {
                        sleep(delay).await;
                        let _ = tx.send(kind);
                    }));
                }
                Effect::CancelTimer(kind) => {
                    if let Some(handle) = timers.slot(kind).take() {
                        handle.abort();
                    }
                }
                Effect::Dial => match connector.connect().await {
                    Ok(t) => {
                        transport = Some(t);
                        core.on_transport_opened(&mut effects);
                    }
                    Err(e) => core.on_dial_error(e, &mut effects),
                },
                Effect::CloseTransport => {
                    if let Some(mut t) = transport.take() {
                        t.shutdown(SHUTDOWN_TIMEOUT).await;
                    }
                }
                Effect::Stop => break 'session,
            }
        }

        tokio::select! {
            request = rx_send.recv() => match request {
                Some(request) => core.handle_request(request, &mut effects),
                None => core.handle_handle_dropped(&mut effects),
            },
            kind = timer_rx.recv() => {
                if let Some(kind) = kind {
                    *timers.slot(kind) = None;
                    core.handle_timer(kind, &mut effects);
                }
            },
            result = transport_recv(&mut transport, &mut chunk) => match result {
                Ok(0) => {
                    transport = None;
                    core.on_transport_closed(None, &mut effects);
                }
                Ok(n) => core.on_bytes(&chunk[..n], &mut effects),
                Err(e) => {
                    transport = None;
                    core.on_transport_closed(Some(e), &mut effects);
                }
            },
        }
    }

    timers.abort_all();
}
