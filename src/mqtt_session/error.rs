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

use crate::mqtt_session::codec::CodecError;
use crate::mqtt_session::store::StoreError;
use crate::mqtt_session::topic_alias::TopicAliasError;
use crate::mqtt_session::transport::TransportError;

/// Which negotiated deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No CONNACK arrived within the connect timeout.
    Connack,
    /// No PINGRESP arrived within the keepalive window.
    Keepalive,
}

/// Unified error type for session operations.
///
/// Connection-level failures surface through the `error` event and trigger
/// cleanup plus reconnection scheduling; operation-level failures
/// (publish/subscribe/unsubscribe) surface solely through that operation's
/// own result. The only errors returned synchronously from the public API
/// are programmer-error validations (`InvalidTopic`, `InvalidFilter`,
/// `InvalidOptions`).
#[derive(Debug)]
pub enum SessionError {
    /// The broker answered CONNECT with a non-success reason/return code.
    ConnectionRefused { code: u8, reason: &'static str },
    /// Malformed frame, unexpected packet type, or a packet exceeding the
    /// negotiated maximum packet size.
    ProtocolViolation(String),
    /// A connack or keepalive deadline expired.
    Timeout(TimeoutKind),
    /// I/O or transport-level error.
    Transport(TransportError),
    /// Encode/decode failure at the codec boundary.
    Codec(CodecError),
    /// Topic alias out of range or unresolved.
    TopicAlias(TopicAliasError),
    /// Inflight store failure.
    Store(StoreError),
    /// A per-operation acknowledgment carried a non-success reason code.
    ReasonCode { code: u8, reason: &'static str },
    /// All 65535 packet identifiers are in use.
    PacketIdExhausted,
    /// Publish topic is empty or contains wildcard characters.
    InvalidTopic(String),
    /// Subscription filter is empty or malformed.
    InvalidFilter(String),
    /// Option combination rejected at construction.
    InvalidOptions(&'static str),
    /// A QoS 0 publish was submitted while offline and `queue_qos_zero` is
    /// disabled.
    OfflineQueueDisabled,
    /// The session closed before the operation completed.
    ConnectionClosed,
    /// The session actor task is gone.
    ChannelClosed,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::ConnectionRefused { code, reason } => {
                write!(f, "Connection refused ({code}): {reason}")
            }
            SessionError::ProtocolViolation(msg) => write!(f, "Protocol violation: {msg}"),
            SessionError::Timeout(TimeoutKind::Connack) => write!(f, "CONNACK timeout"),
            SessionError::Timeout(TimeoutKind::Keepalive) => write!(f, "Keepalive timeout"),
            SessionError::Transport(e) => write!(f, "Transport error: {e}"),
            SessionError::Codec(e) => write!(f, "Codec error: {e}"),
            SessionError::TopicAlias(e) => write!(f, "Topic alias error: {e}"),
            SessionError::Store(e) => write!(f, "Store error: {e}"),
            SessionError::ReasonCode { code, reason } => {
                write!(f, "Operation failed with reason code {code}: {reason}")
            }
            SessionError::PacketIdExhausted => write!(f, "No packet identifiers available"),
            SessionError::InvalidTopic(topic) => write!(f, "Invalid publish topic: {topic:?}"),
            SessionError::InvalidFilter(filter) => {
                write!(f, "Invalid subscription filter: {filter:?}")
            }
            SessionError::InvalidOptions(msg) => write!(f, "Invalid options: {msg}"),
            SessionError::OfflineQueueDisabled => {
                write!(f, "Offline and QoS 0 queueing is disabled")
            }
            SessionError::ConnectionClosed => write!(f, "Connection closed"),
            SessionError::ChannelClosed => write!(f, "Internal channel closed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}

impl From<CodecError> for SessionError {
    fn from(e: CodecError) -> Self {
        SessionError::Codec(e)
    }
}

impl From<TopicAliasError> for SessionError {
    fn from(e: TopicAliasError) -> Self {
        SessionError::TopicAlias(e)
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e)
    }
}
