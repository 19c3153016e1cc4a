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

//! # MQTT Session Tokio
//!
//! An async MQTT client session engine for Rust with tokio, supporting
//! MQTT v3.1, v3.1.1 and v5.0 over any byte-stream transport.
//!
//! This library implements the client-side protocol engine: the connection
//! lifecycle state machine, the QoS 0/1/2 acknowledgment and retry engine,
//! packet-identifier allocation, the in-flight message stores and their
//! reconnect replay queue, MQTT v5.0 topic-alias bookkeeping, and the
//! keepalive/reconnect schedulers. Binary packet encoding and transport
//! construction are pluggable collaborators supplied at the
//! [`mqtt_session::PacketCodec`] and [`mqtt_session::transport`] boundaries.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mqtt_session_tokio::mqtt_session::{self, ConnectOptions, PublishOptions, Qos};
//! use mqtt_session_tokio::mqtt_session::transport::TcpConnector;
//!
//! let options = ConnectOptions::builder()
//!     .client_id("my-client".to_string())
//!     .keep_alive_secs(30u16)
//!     .build()?;
//!
//! let session = mqtt_session::Session::connect(
//!     TcpConnector::new("localhost:1883"),
//!     my_codec,
//!     options,
//! )?;
//!
//! let mut events = session.events();
//! session
//!     .publish("sensors/temp", b"21.5".to_vec(), PublishOptions::qos(Qos::AtLeastOnce))
//!     .await?;
//! ```
//!
//! ## Main Components
//!
//! - [`mqtt_session::Session`]: the public handle; one background actor task
//!   per session owns all protocol state
//! - [`mqtt_session::transport`]: the transport contract plus a TCP variant
//! - [`mqtt_session::ConnectOptions`]: connection behavior configuration
//! - [`mqtt_session::packet`]: the control-packet data model consumed at the
//!   codec boundary
//! - [`mqtt_session::SessionEvent`]: the typed event stream (`connect`,
//!   `offline`, `message`, ...)

pub mod mqtt_session;
