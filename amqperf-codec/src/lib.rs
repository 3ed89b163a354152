//! Data structures and converter functions for dealing with AMQP 0-9-1 frames.
//!
//! All the data types are in the `frame` module, the `codec` implements
//! the encoding and the decoding. Decoding is a pure function over a byte
//! buffer, so the same code serves the blocking and the async transports.
pub mod codec;
pub mod frame;

#[cfg(test)]
mod tests;

#[macro_use]
extern crate bitflags;

/// Type alias for a simplified Result with FrameError.
pub type Result<T> = std::result::Result<T, FrameError>;

/// Malformed or oversized wire data. Any of these is fatal to the connection
/// which received the bytes.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame end octet is {0:#04X} instead of 0xCE")]
    BadFrameEnd(u8),
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),
    #[error("frame of {size} bytes exceeds the negotiated frame max {max}")]
    FrameTooLarge { size: u64, max: u32 },
    #[error("unknown class method {0:08X}")]
    UnknownMethod(u32),
    #[error("unknown field value type {0:#04X}")]
    UnknownFieldType(u8),
    #[error("frame payload ended unexpectedly")]
    Truncated,
    #[error("string is not valid utf-8")]
    InvalidString,
    #[error("short string is longer than 255 bytes")]
    ShortStringTooLong,
}
