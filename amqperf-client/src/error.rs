use crate::model::ChannelNumber;
use amqperf_codec::FrameError;
use std::sync::Arc;

/// Shorthand for client results.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Every failure the client reports.
///
/// It is `Clone` because a connection level failure is delivered to every waiting call and
/// every pending confirm of that connection.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// Protocol negotiation or authentication failed, the connection is closed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Malformed or oversized frame, the connection is closed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// Channel level protocol violation.
    #[error("channel {channel} error {code}: {text}")]
    Channel {
        channel: ChannelNumber,
        code: u16,
        text: String,
    },
    /// A synchronous request is already in flight on the channel.
    #[error("channel {0} has an outstanding synchronous request")]
    ChannelBusy(ChannelNumber),
    #[error("channel {channel} is closed ({code} {text})")]
    ChannelClosed {
        channel: ChannelNumber,
        code: u16,
        text: String,
    },
    /// The broker confirmed a delivery tag which was not pending, the channel is closed.
    #[error("unexpected ack of delivery tag {delivery_tag} on channel {channel}")]
    UnexpectedAck { channel: ChannelNumber, delivery_tag: u64 },
    /// The broker nacked a publish the confirm wait covered.
    #[error("broker nacked delivery tag {delivery_tag} on channel {channel}")]
    Nacked { channel: ChannelNumber, delivery_tag: u64 },
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("connection is closed ({code} {text})")]
    ConnectionClosed { code: u16, text: String },
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
    #[error("i/o error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

impl From<amqperf_codec::codec::CodecError> for ClientError {
    fn from(err: amqperf_codec::codec::CodecError) -> Self {
        match err {
            amqperf_codec::codec::CodecError::Frame(e) => ClientError::Frame(e),
            amqperf_codec::codec::CodecError::Io(e) => e.into(),
        }
    }
}

impl ClientError {
    /// The error is fatal to the whole connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Handshake(_)
                | ClientError::Frame(_)
                | ClientError::ConnectionReset
                | ClientError::ConnectionClosed { .. }
                | ClientError::Io(_)
        )
    }
}
