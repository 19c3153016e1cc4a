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

use std::sync::Arc;

use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::mqtt_session::packet::{Properties, Publish, Qos, Will};

/// MQTT protocol revision selected for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V3_1,
    V3_1_1,
    V5_0,
}

impl ProtocolVersion {
    /// Wire protocol level (3, 4 or 5).
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::V3_1 => 3,
            ProtocolVersion::V3_1_1 => 4,
            ProtocolVersion::V5_0 => 5,
        }
    }

    pub fn is_v5(self) -> bool {
        matches!(self, ProtocolVersion::V5_0)
    }
}

/// Packet identifier allocation strategy.
///
/// `Default` is a monotonic wraparound counter with no reuse tracking;
/// `Unique` is an interval free-list with real collision prevention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketIdStrategy {
    Default,
    Unique,
}

/// Override for the QoS 1/2 incoming acknowledgment policy.
///
/// The callback inspects an incoming publish and returns the reason code to
/// send in PUBACK/PUBREC. Codes >= 0x80 suppress delivery of the message to
/// the application.
#[derive(Clone)]
pub struct AckOverride(pub Arc<dyn Fn(&Publish) -> u8 + Send + Sync>);

impl AckOverride {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Publish) -> u8 + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn decide(&self, publish: &Publish) -> u8 {
        (self.0)(publish)
    }
}

impl std::fmt::Debug for AckOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AckOverride(..)")
    }
}

/// MQTT Session Connection Options
///
/// Configuration applied for the whole lifetime of a session, including every
/// reconnection attempt. There is no global state; all behavior is selected
/// here at construction.
///
/// # Usage
///
/// ```ignore
/// use mqtt_session_tokio::mqtt_session::ConnectOptions;
///
/// let options = ConnectOptions::builder()
///     .client_id("sensor-17".to_string())
///     .clean(false)
///     .keep_alive_secs(30u16)
///     .reconnect_period_ms(2000u64)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Builder, Getters)]
#[builder(derive(Debug), pattern = "owned", setter(into))]
pub struct ConnectOptions {
    /// Client identifier sent in CONNECT.
    ///
    /// Required when `clean` is false: a persistent session without a stable
    /// identity cannot be resumed. When absent on a clean session, an empty
    /// client identifier is sent and the broker may assign one.
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    client_id: Option<String>,

    /// Protocol revision (3 = v3.1, 4 = v3.1.1, 5 = v5.0).
    ///
    /// # Default
    /// `ProtocolVersion::V3_1_1`
    #[builder(default = "ProtocolVersion::V3_1_1")]
    #[getset(get = "pub")]
    protocol_version: ProtocolVersion,

    /// Clean session (v3) / clean start (v5) flag.
    ///
    /// # Default
    /// true
    #[builder(default = "true")]
    #[getset(get = "pub")]
    clean: bool,

    /// Keepalive interval in seconds. 0 disables the keepalive manager.
    ///
    /// # Default
    /// 60
    #[builder(default = "60")]
    #[getset(get = "pub")]
    keep_alive_secs: u16,

    /// Delay between reconnection attempts in milliseconds. 0 disables
    /// automatic reconnection.
    ///
    /// # Default
    /// 1000
    #[builder(default = "1000")]
    #[getset(get = "pub")]
    reconnect_period_ms: u64,

    /// Maximum time to wait for CONNACK after the transport opens, in
    /// milliseconds. 0 disables the timeout.
    ///
    /// # Default
    /// 30000
    #[builder(default = "30000")]
    #[getset(get = "pub")]
    connect_timeout_ms: u64,

    /// Grace period for a graceful `end(false)`: how long to wait for the
    /// outgoing inflight window to drain before DISCONNECT is sent anyway.
    ///
    /// # Default
    /// 10000
    #[builder(default = "10000")]
    #[getset(get = "pub")]
    end_grace_ms: u64,

    /// Re-issue SUBSCRIBE for known subscriptions after a reconnect that did
    /// not resume the server-side session.
    ///
    /// # Default
    /// true
    #[builder(default = "true")]
    #[getset(get = "pub")]
    resubscribe: bool,

    /// Queue QoS 0 publishes submitted while offline instead of failing them.
    ///
    /// # Default
    /// true
    #[builder(default = "true")]
    #[getset(get = "pub")]
    queue_qos_zero: bool,

    /// Packet identifier allocation strategy.
    ///
    /// # Default
    /// `PacketIdStrategy::Default`
    #[builder(default = "PacketIdStrategy::Default")]
    #[getset(get = "pub")]
    packet_id_strategy: PacketIdStrategy,

    /// Highest topic alias this client accepts from the broker (v5.0).
    /// Advertised in CONNECT; 0 means incoming aliases are refused.
    ///
    /// # Default
    /// 0
    #[builder(default = "0")]
    #[getset(get = "pub")]
    topic_alias_maximum: u16,

    /// Automatically assign send-side topic aliases from the LRU pool when
    /// the broker advertises alias support (v5.0).
    ///
    /// # Default
    /// false
    #[builder(default = "false")]
    #[getset(get = "pub")]
    auto_assign_topic_alias: bool,

    /// Automatically substitute an already-established alias for the topic
    /// on outgoing publishes (v5.0).
    ///
    /// # Default
    /// false
    #[builder(default = "false")]
    #[getset(get = "pub")]
    auto_use_topic_alias: bool,

    /// User name sent in CONNECT.
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    username: Option<String>,

    /// Password sent in CONNECT.
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    password: Option<Vec<u8>>,

    /// Last-will message sent in CONNECT.
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    will: Option<Will>,

    /// Additional CONNECT properties (v5.0).
    #[builder(default)]
    #[getset(get = "pub")]
    connect_properties: Properties,

    /// Override for the incoming QoS 1/2 acknowledgment policy.
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    custom_handle_acks: Option<AckOverride>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Default ConnectOptions should be valid")
    }
}

impl ConnectOptions {
    pub fn builder() -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::default()
    }
}

/// Per-publish options.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub qos: Qos,
    pub retain: bool,
    pub dup: bool,
    pub properties: Properties,
}

impl PublishOptions {
    pub fn qos(qos: Qos) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }
}

/// One entry of a SUBACK reconciliation, positionally matched to the
/// requested subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionGrant {
    pub topic_filter: String,
    /// Granted QoS (0/1/2) or a failure code (>= 0x80).
    pub code: u8,
}

impl SubscriptionGrant {
    pub fn is_failure(&self) -> bool {
        self.code >= 0x80
    }
}
