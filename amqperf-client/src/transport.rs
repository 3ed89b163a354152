//! Blocking frame transport over a byte stream.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use amqperf_codec::codec::{decode_frame, encode_frame, Decoded};
use amqperf_codec::frame::AMQPFrame;
use bytes::{Buf, BytesMut};
use log::{debug, trace};

use crate::error::{ClientError, Result};

const READ_CHUNK: usize = 64 * 1024;

/// A byte stream the blocking transport can drive.
pub trait Socket: Read + Write {
    /// `None` blocks until data arrives.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;

    fn shutdown(&mut self) -> std::io::Result<()>;
}

impl Socket for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Writes frames and reads them back in a streaming buffer.
pub struct Transport<S: Socket> {
    socket: S,
    read_buf: BytesMut,
    /// Socket reads land here before they are appended to `read_buf`.
    read_chunk: Box<[u8]>,
    write_buf: BytesMut,
    frame_max: u32,
    last_sent: Instant,
    closed: bool,
}

impl<S: Socket> Transport<S> {
    pub fn new(socket: S, frame_max: u32) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            read_chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            frame_max,
            last_sent: Instant::now(),
            closed: false,
        }
    }

    /// Incoming frames larger than this are errors.
    pub fn set_frame_max(&mut self, frame_max: u32) {
        self.frame_max = frame_max;
    }

    /// When the last frame was written, for heartbeat pacing.
    pub fn last_sent(&self) -> Instant {
        self.last_sent
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn send(&mut self, frames: &[AMQPFrame]) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }

        if self.closed {
            return Err(ClientError::ConnectionReset);
        }

        self.write_buf.clear();

        for frame in frames {
            trace!("Outgoing frame {:?}", frame);

            encode_frame(&mut self.write_buf, frame)?;
        }

        self.socket.write_all(&self.write_buf).map_err(io_error)?;
        self.socket.flush().map_err(io_error)?;
        self.last_sent = Instant::now();

        Ok(())
    }

    /// Decode a frame which is already in the read buffer.
    pub fn try_decode(&mut self) -> Result<Option<AMQPFrame>> {
        match decode_frame(&self.read_buf[..], self.frame_max)? {
            Decoded::Frame(frame, consumed) => {
                self.read_buf.advance(consumed);

                Ok(Some(frame))
            }
            Decoded::NeedMoreData => Ok(None),
        }
    }

    /// Next frame, or `None` if no complete frame arrived in `timeout`.
    ///
    /// EOF or a reset socket is `ConnectionReset`, a malformed frame is `Frame`.
    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<AMQPFrame>> {
        if let Some(frame) = self.try_decode()? {
            return Ok(Some(frame));
        }

        if self.closed {
            return Err(ClientError::ConnectionReset);
        }

        // zero timeout is an error in std
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.socket.set_read_timeout(timeout).map_err(io_error)?;

        loop {
            match self.socket.read(&mut self.read_chunk) {
                Ok(0) => {
                    debug!("Peer closed the socket");

                    self.closed = true;

                    return Err(ClientError::ConnectionReset);
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&self.read_chunk[..n]);

                    if let Some(frame) = self.try_decode()? {
                        return Ok(Some(frame));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_error(e)),
            }
        }
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;

            if let Err(e) = self.socket.shutdown() {
                debug!("Socket shutdown {:?}", e);
            }
        }
    }
}

fn io_error(err: std::io::Error) -> ClientError {
    match err.kind() {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
            ClientError::ConnectionReset
        }
        _ => err.into(),
    }
}
