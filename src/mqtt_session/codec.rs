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

//! Packet codec contract.
//!
//! Binary MQTT framing (fixed header, variable-length remaining-length field,
//! v5.0 property sets) is an external collaborator: the engine hands a
//! [`Packet`] to `encode` and feeds received bytes through `decode`, which
//! emits one packet per complete frame. Implementations follow the
//! MQTT 3.1.1 / 5.0 wire specifications; the engine never inspects bytes.

use crate::mqtt_session::packet::Packet;

/// Error raised at the encode/decode boundary.
///
/// A decode failure means the byte stream can no longer be framed and is
/// treated by the engine as a protocol violation: the connection is torn
/// down rather than resynchronized by guesswork.
#[derive(Debug)]
pub enum CodecError {
    /// The byte stream does not form a valid MQTT frame.
    Malformed(String),
    /// The packet cannot be represented in the negotiated protocol version.
    Unsupported(&'static str),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Malformed(msg) => write!(f, "Malformed frame: {msg}"),
            CodecError::Unsupported(msg) => write!(f, "Unsupported packet: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result of one incremental decode step.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A complete frame was decoded; `consumed` bytes must be dropped from
    /// the front of the input before the next call.
    Packet { packet: Packet, consumed: usize },
    /// The input holds no complete frame yet.
    NeedMoreData,
}

/// Streaming MQTT packet codec.
///
/// `decode` is called with the whole unconsumed input prefix and must either
/// report how many bytes form the next complete packet or ask for more data;
/// it is never handed the same consumed bytes twice.
pub trait PacketCodec: Send {
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CodecError>;

    fn decode(&mut self, buf: &[u8]) -> Result<DecodeOutcome, CodecError>;
}

impl PacketCodec for Box<dyn PacketCodec> {
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        (**self).encode(packet)
    }

    fn decode(&mut self, buf: &[u8]) -> Result<DecodeOutcome, CodecError> {
        (**self).decode(buf)
    }
}
