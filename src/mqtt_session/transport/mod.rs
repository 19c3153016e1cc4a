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

//! Transport layer contract.
//!
//! The session engine only requires an ordered, reliable byte stream: vectored
//! `send`, `recv`, and a timed `shutdown`. Concrete variants (TCP here; TLS,
//! WebSocket, proxied or in-process streams elsewhere) are interchangeable
//! implementations of this single contract. The [`Connector`] factory produces
//! a fresh transport for each connection attempt, which is how the
//! reconnection scheduler re-dials after a failure.

mod tcp;

pub use tcp::{TcpConnector, TcpTransport};

use std::future::Future;
use std::io::IoSlice;
use std::pin::Pin;
use tokio::time::Duration;

/// Error types that can occur during transport operations.
#[derive(Debug)]
pub enum TransportError {
    Io(std::io::Error),
    Timeout,
    Connect(String),
    NotConnected,
}

impl TransportError {
    /// Whether this error belongs to the fatal subset surfaced to the
    /// application. Connection-refused, reset/aborted, host-not-found,
    /// timed-out and address-in-use are surfaced; everything else is treated
    /// as non-fatal stream noise and only logged.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::AddrInUse
            ),
            TransportError::Timeout => true,
            TransportError::Connect(_) => true,
            TransportError::NotConnected => false,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "IO error: {e}"),
            TransportError::Timeout => write!(f, "Operation timed out"),
            TransportError::Connect(msg) => write!(f, "Connection failed: {msg}"),
            TransportError::NotConnected => write!(f, "Transport not connected"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// Core trait that defines the transport layer operations for a session.
///
/// Implementations must already be connected when handed to the engine.
/// `send` resolves only once the bytes have been accepted and flushed, which
/// is what defers operation completion behind transport backpressure.
pub trait TransportOps {
    /// Sends data through the transport layer.
    fn send<'a>(
        &'a mut self,
        buffers: &'a [IoSlice<'a>],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    /// Receives data from the transport layer. `Ok(0)` means the peer closed
    /// the stream.
    fn recv<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>>;

    /// Gracefully shuts down the transport within `timeout`, forcing the
    /// close afterwards.
    fn shutdown<'a>(
        &'a mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

impl TransportOps for Box<dyn TransportOps + Send> {
    fn send<'a>(
        &'a mut self,
        buffers: &'a [IoSlice<'a>],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        (**self).send(buffers)
    }

    fn recv<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>> {
        (**self).recv(buffer)
    }

    fn shutdown<'a>(
        &'a mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        (**self).shutdown(timeout)
    }
}

/// Factory producing a fresh connected transport per connection attempt.
///
/// Called once for the initial connect and once per reconnection retry; the
/// previous transport is fully torn down before the next call.
pub trait Connector: Send {
    fn connect(
        &mut self,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Box<dyn TransportOps + Send>, TransportError>> + Send + '_,
        >,
    >;
}
