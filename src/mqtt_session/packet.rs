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

//! MQTT control packet data model.
//!
//! These types are what the session engine exchanges with the
//! [`PacketCodec`](crate::mqtt_session::PacketCodec) boundary: one variant per
//! control packet, each carrying its own field set. Binary layout is the
//! codec's concern; the engine only reads and constructs these values.

use serde::{Deserialize, Serialize};

/// MQTT packet identifier. 0 is reserved and never allocated.
pub type PacketId = u16;

/// Quality of service level for a publish delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qos {
    /// QoS 0 - fire and forget
    AtMostOnce,
    /// QoS 1 - acknowledged via PUBACK
    AtLeastOnce,
    /// QoS 2 - two-phase PUBREC/PUBREL/PUBCOMP handshake
    ExactlyOnce,
}

impl Default for Qos {
    fn default() -> Self {
        Qos::AtMostOnce
    }
}

impl Qos {
    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Qos::AtMostOnce),
            1 => Some(Qos::AtLeastOnce),
            2 => Some(Qos::ExactlyOnce),
            _ => None,
        }
    }
}

/// Discriminant of a control packet, used for event reporting and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Connect,
    Connack,
    Publish,
    Puback,
    Pubrec,
    Pubrel,
    Pubcomp,
    Subscribe,
    Suback,
    Unsubscribe,
    Unsuback,
    Pingreq,
    Pingresp,
    Disconnect,
    Auth,
}

/// MQTT v5.0 property subset the engine inspects.
///
/// Codecs may carry further properties through `user_properties`; everything
/// the session engine negotiates or validates is a named field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub topic_alias: Option<u16>,
    pub topic_alias_maximum: Option<u16>,
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    pub session_expiry_interval: Option<u32>,
    pub server_keep_alive: Option<u16>,
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

/// Last-will message carried in CONNECT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connect {
    pub client_id: String,
    pub clean: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connack {
    pub session_present: bool,
    /// v5.0 reason code, or the v3 connect return code for earlier versions.
    pub reason_code: u8,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
    pub dup: bool,
    /// Present for QoS > 0 once allocated by the engine.
    pub packet_id: Option<PacketId>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Puback {
    pub packet_id: PacketId,
    pub reason_code: u8,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pubrec {
    pub packet_id: PacketId,
    pub reason_code: u8,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pubrel {
    pub packet_id: PacketId,
    pub reason_code: u8,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pubcomp {
    pub packet_id: PacketId,
    pub reason_code: u8,
    pub properties: Properties,
}

/// Per-topic subscription options as sent in SUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubscribeOpts {
    pub qos: Qos,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: u8,
}

impl Default for SubscribeOpts {
    fn default() -> Self {
        Self {
            qos: Qos::AtMostOnce,
            no_local: false,
            retain_as_published: false,
            retain_handling: 0,
        }
    }
}

impl SubscribeOpts {
    pub fn qos(qos: Qos) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeEntry {
    pub topic_filter: String,
    pub opts: SubscribeOpts,
}

impl SubscribeEntry {
    pub fn new(topic_filter: impl Into<String>, opts: SubscribeOpts) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            opts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    pub packet_id: PacketId,
    pub entries: Vec<SubscribeEntry>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suback {
    pub packet_id: PacketId,
    /// Positionally matched to the SUBSCRIBE entries: 0/1/2 grant that QoS,
    /// >= 0x80 is a per-topic failure.
    pub granted: Vec<u8>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unsubscribe {
    pub packet_id: PacketId,
    pub topics: Vec<String>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unsuback {
    pub packet_id: PacketId,
    pub reason_codes: Vec<u8>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disconnect {
    pub reason_code: u8,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    pub reason_code: u8,
    pub properties: Properties,
}

/// A decoded MQTT control packet, one variant per packet type.
///
/// Values are immutable once handed to the engine, except that publishes are
/// cloned before storage so the stored copy carries the full topic rather
/// than a connection-scoped alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(Puback),
    Pubrec(Pubrec),
    Pubrel(Pubrel),
    Pubcomp(Pubcomp),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect(Disconnect),
    Auth(Auth),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::Puback,
            Packet::Pubrec(_) => PacketType::Pubrec,
            Packet::Pubrel(_) => PacketType::Pubrel,
            Packet::Pubcomp(_) => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// The packet identifier, for packet types that carry one.
    pub fn packet_id(&self) -> Option<PacketId> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::Puback(p) => Some(p.packet_id),
            Packet::Pubrec(p) => Some(p.packet_id),
            Packet::Pubrel(p) => Some(p.packet_id),
            Packet::Pubcomp(p) => Some(p.packet_id),
            Packet::Subscribe(p) => Some(p.packet_id),
            Packet::Suback(p) => Some(p.packet_id),
            Packet::Unsubscribe(p) => Some(p.packet_id),
            Packet::Unsuback(p) => Some(p.packet_id),
            _ => None,
        }
    }
}

/// A packet held by the outgoing store for resend across reconnects: an
/// unacknowledged QoS > 0 publish, or a pending PUBREL obligation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredPacket {
    Publish(Publish),
    Pubrel(Pubrel),
}

impl StoredPacket {
    pub fn packet_id(&self) -> Option<PacketId> {
        match self {
            StoredPacket::Publish(p) => p.packet_id,
            StoredPacket::Pubrel(p) => Some(p.packet_id),
        }
    }

    pub fn into_packet(self) -> Packet {
        match self {
            StoredPacket::Publish(p) => Packet::Publish(p),
            StoredPacket::Pubrel(p) => Packet::Pubrel(p),
        }
    }
}

/// Success reason codes shared by the ack flows: 0x00 (success / granted
/// QoS 0) and 0x10 (no matching subscribers).
pub fn reason_code_is_success(code: u8) -> bool {
    code == 0x00 || code == 0x10
}

/// Human-readable name for an MQTT v5.0 reason code.
pub fn reason_code_name(code: u8) -> &'static str {
    match code {
        0x00 => "Success",
        0x01 => "Granted QoS 1",
        0x02 => "Granted QoS 2",
        0x04 => "Disconnect with Will Message",
        0x10 => "No matching subscribers",
        0x11 => "No subscription existed",
        0x80 => "Unspecified error",
        0x81 => "Malformed Packet",
        0x82 => "Protocol Error",
        0x83 => "Implementation specific error",
        0x84 => "Unsupported Protocol Version",
        0x85 => "Client Identifier not valid",
        0x86 => "Bad User Name or Password",
        0x87 => "Not authorized",
        0x88 => "Server unavailable",
        0x89 => "Server busy",
        0x8A => "Banned",
        0x8C => "Bad authentication method",
        0x8F => "Topic Filter invalid",
        0x90 => "Topic Name invalid",
        0x91 => "Packet Identifier in use",
        0x92 => "Packet Identifier not found",
        0x93 => "Receive Maximum exceeded",
        0x94 => "Topic Alias invalid",
        0x95 => "Packet too large",
        0x97 => "Quota exceeded",
        0x98 => "Administrative action",
        0x99 => "Payload format invalid",
        0x9A => "Retain not supported",
        0x9B => "QoS not supported",
        0x9C => "Use another server",
        0x9D => "Server moved",
        0x9E => "Shared Subscriptions not supported",
        0x9F => "Connection rate exceeded",
        0xA0 => "Maximum connect time",
        0xA1 => "Subscription Identifiers not supported",
        0xA2 => "Wildcard Subscriptions not supported",
        _ => "Unknown reason code",
    }
}

/// Human-readable name for a v3.1/v3.1.1 CONNACK return code.
pub fn connect_return_code_name(code: u8) -> &'static str {
    match code {
        0 => "Connection accepted",
        1 => "Connection refused: unacceptable protocol version",
        2 => "Connection refused: identifier rejected",
        3 => "Connection refused: server unavailable",
        4 => "Connection refused: bad user name or password",
        5 => "Connection refused: not authorized",
        _ => "Connection refused: unknown return code",
    }
}
