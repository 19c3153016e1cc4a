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

use super::{Connector, TransportError, TransportOps};
use std::future::Future;
use std::io::IoSlice;
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// Plain TCP transport.
///
/// Accepts an already established stream via [`TcpTransport::from_stream`];
/// connection establishment belongs to [`TcpConnector`].
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl TransportOps for TcpTransport {
    fn send<'a>(
        &'a mut self,
        buffers: &'a [IoSlice<'a>],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let total_bytes: usize = buffers.iter().map(|buf| buf.len()).sum();

            // write_vectored may write partially; track per-buffer offsets
            // until every slice is drained.
            let mut offsets = vec![0usize; buffers.len()];
            let mut total_written = 0usize;

            while total_written < total_bytes {
                let remaining: Vec<IoSlice> = buffers
                    .iter()
                    .enumerate()
                    .filter_map(|(i, buf)| {
                        let start = offsets[i];
                        (start < buf.len()).then(|| IoSlice::new(&buf[start..]))
                    })
                    .collect();

                if remaining.is_empty() {
                    break;
                }

                let written = self
                    .stream
                    .write_vectored(&remaining)
                    .await
                    .map_err(TransportError::Io)?;
                if written == 0 {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "write_vectored returned 0 bytes written",
                    )));
                }
                total_written += written;

                let mut to_skip = written;
                for (i, buf) in buffers.iter().enumerate() {
                    let available = buf.len() - offsets[i];
                    if available > 0 {
                        let consumed = to_skip.min(available);
                        offsets[i] += consumed;
                        to_skip -= consumed;
                        if to_skip == 0 {
                            break;
                        }
                    }
                }
            }

            self.stream.flush().await.map_err(TransportError::Io)?;
            Ok(())
        })
    }

    fn recv<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>> {
        Box::pin(async move { self.stream.read(buffer).await.map_err(TransportError::Io) })
    }

    fn shutdown<'a>(
        &'a mut self,
        timeout_duration: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            // Best effort: on failure or timeout the connection dies when the
            // stream is dropped.
            let _ = timeout(timeout_duration, self.stream.shutdown()).await;
        })
    }
}

/// [`Connector`] dialing a fixed TCP address for every attempt.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    fn connect(
        &mut self,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Box<dyn TransportOps + Send>, TransportError>> + Send + '_,
        >,
    > {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(TransportError::Io)?;
            stream.set_nodelay(true).map_err(TransportError::Io)?;
            Ok(Box::new(TcpTransport::from_stream(stream)) as Box<dyn TransportOps + Send>)
        })
    }
}
