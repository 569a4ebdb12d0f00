use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::network::RequestFrame;
use crate::service::GatewayResult;

/// Read side of a client connection: buffers the stream until complete
/// request frames can be parsed out of it.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, buffer_size: usize, max_frame_size: usize) -> Connection {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(buffer_size),
            max_frame_size,
        }
    }

    /// Reads the next `RequestFrame`.
    ///
    /// Returns `None` when the client closed the connection between frames;
    /// a close mid-frame is an error. A malformed or oversized frame is an
    /// error too, and the connection should be dropped.
    pub async fn read_frame(&mut self) -> GatewayResult<Option<RequestFrame>> {
        loop {
            if let Some(frame) = RequestFrame::parse(&mut self.buffer, self.max_frame_size)? {
                return Ok(Some(frame));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    // clean close between frames
                    Ok(None)
                } else {
                    // EOF mid-frame, the peer vanished
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}
