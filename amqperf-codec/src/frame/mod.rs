mod basic;
mod channel;
mod connection;
mod exchange;
mod queue;

use bytes::Bytes;
use std::collections::HashMap;

pub use self::{
    basic::{
        basic_ack, basic_nack, confirm_select, confirm_select_ok, BasicAckArgs, BasicCancelArgs, BasicCancelOkArgs,
        BasicConsumeArgs, BasicConsumeFlags, BasicConsumeOkArgs, BasicDeliverArgs, BasicNackArgs, BasicNackFlags,
        BasicPublishArgs, BasicPublishFlags, BasicRejectArgs, BasicReturnArgs, ConfirmSelectArgs,
    },
    channel::{channel_close, channel_close_ok, channel_open, channel_open_ok, ChannelCloseArgs},
    connection::{
        connection_close, connection_close_ok, connection_open_ok, ConnectionBlockedArgs, ConnectionCloseArgs,
        ConnectionOpenArgs, ConnectionStartArgs, ConnectionStartOkArgs, ConnectionTuneArgs, ConnectionTuneOkArgs,
    },
    exchange::{
        exchange_declare_ok, exchange_delete_ok, ExchangeDeclareArgs, ExchangeDeclareFlags, ExchangeDeleteArgs,
        ExchangeDeleteFlags,
    },
    queue::{
        queue_bind_ok, queue_unbind_ok, QueueBindArgs, QueueDeclareArgs, QueueDeclareFlags, QueueDeclareOkArgs,
        QueueDeleteArgs, QueueDeleteFlags, QueueDeleteOkArgs, QueuePurgeArgs, QueuePurgeOkArgs, QueueUnbindArgs,
    },
};

pub const CONNECTION_START: u32 = 0x000A000A;
pub const CONNECTION_START_OK: u32 = 0x000A000B;
pub const CONNECTION_TUNE: u32 = 0x000A001E;
pub const CONNECTION_TUNE_OK: u32 = 0x000A001F;
pub const CONNECTION_OPEN: u32 = 0x000A0028;
pub const CONNECTION_OPEN_OK: u32 = 0x000A0029;
pub const CONNECTION_CLOSE: u32 = 0x000A0032;
pub const CONNECTION_CLOSE_OK: u32 = 0x000A0033;
pub const CONNECTION_BLOCKED: u32 = 0x000A003C;
pub const CONNECTION_UNBLOCKED: u32 = 0x000A003D;

pub const CHANNEL_OPEN: u32 = 0x0014000A;
pub const CHANNEL_OPEN_OK: u32 = 0x0014000B;
pub const CHANNEL_CLOSE: u32 = 0x00140028;
pub const CHANNEL_CLOSE_OK: u32 = 0x00140029;

pub const EXCHANGE_DECLARE: u32 = 0x0028000A;
pub const EXCHANGE_DECLARE_OK: u32 = 0x0028000B;
pub const EXCHANGE_DELETE: u32 = 0x00280014;
pub const EXCHANGE_DELETE_OK: u32 = 0x00280015;

pub const QUEUE_DECLARE: u32 = 0x0032000A;
pub const QUEUE_DECLARE_OK: u32 = 0x0032000B;
pub const QUEUE_BIND: u32 = 0x00320014;
pub const QUEUE_BIND_OK: u32 = 0x00320015;
pub const QUEUE_PURGE: u32 = 0x0032001E;
pub const QUEUE_PURGE_OK: u32 = 0x0032001F;
pub const QUEUE_DELETE: u32 = 0x00320028;
pub const QUEUE_DELETE_OK: u32 = 0x00320029;
pub const QUEUE_UNBIND: u32 = 0x00320032;
pub const QUEUE_UNBIND_OK: u32 = 0x00320033;

pub const BASIC_CONSUME: u32 = 0x003C0014;
pub const BASIC_CONSUME_OK: u32 = 0x003C0015;
pub const BASIC_CANCEL: u32 = 0x003C001E;
pub const BASIC_CANCEL_OK: u32 = 0x003C001F;
pub const BASIC_PUBLISH: u32 = 0x003C0028;
pub const BASIC_RETURN: u32 = 0x003C0032;
pub const BASIC_DELIVER: u32 = 0x003C003C;
pub const BASIC_ACK: u32 = 0x003C0050;
pub const BASIC_REJECT: u32 = 0x003C005A;
pub const BASIC_NACK: u32 = 0x003C0078;

pub const CONFIRM_SELECT: u32 = 0x0055000A;
pub const CONFIRM_SELECT_OK: u32 = 0x0055000B;

/// Class id of the `basic` class, content header frames carry it.
pub const BASIC_CLASS: u16 = 60;

pub type Channel = u16;
pub type ClassMethod = u32;
pub type ClassId = u16;
pub type Weight = u16;

/// Represents an AMQP frame.
#[derive(Clone, PartialEq)]
pub enum AMQPFrame {
    /// Header is to be sent to the server at first, announcing the AMQP version we support. If the
    /// server sends a header back, it doesn't support our version.
    Header,
    /// Represents the AMQP RPC frames. Connection based calls have a channel number 0, otherwise
    /// channel is the current channel on which the frames are sent. The RPC arguments are
    /// represented in `MethodFrameArgs`.
    Method(Channel, ClassMethod, MethodFrameArgs),
    ContentHeader(ContentHeaderFrame),
    ContentBody(ContentBodyFrame),
    Heartbeat(Channel),
}

impl std::fmt::Debug for AMQPFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AMQPFrame::Header => write!(f, "Header"),
            AMQPFrame::Method(ch, cm, args) => write!(f, "Method(channel={}, {:08X}, {:?})", ch, cm, args),
            AMQPFrame::ContentHeader(ch) => write!(f, "ContentHeader({:?})", ch),
            AMQPFrame::ContentBody(cb) => write!(f, "ContentBody({:?})", cb),
            AMQPFrame::Heartbeat(ch) => write!(f, "Heartbeat(channel={})", ch),
        }
    }
}

impl AMQPFrame {
    /// The channel the frame travels on, the protocol header belongs to the connection.
    pub fn channel(&self) -> Channel {
        match self {
            AMQPFrame::Header => 0,
            AMQPFrame::Method(ch, _, _) => *ch,
            AMQPFrame::ContentHeader(hf) => hf.channel,
            AMQPFrame::ContentBody(bf) => bf.channel,
            AMQPFrame::Heartbeat(ch) => *ch,
        }
    }
}

/// Represents all types of method frame arguments.
#[derive(Clone, Debug, PartialEq)]
pub enum MethodFrameArgs {
    ConnectionStart(ConnectionStartArgs),
    ConnectionStartOk(ConnectionStartOkArgs),
    ConnectionTune(ConnectionTuneArgs),
    ConnectionTuneOk(ConnectionTuneOkArgs),
    ConnectionOpen(ConnectionOpenArgs),
    ConnectionOpenOk,
    ConnectionClose(ConnectionCloseArgs),
    ConnectionCloseOk,
    ConnectionBlocked(ConnectionBlockedArgs),
    ConnectionUnblocked,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose(ChannelCloseArgs),
    ChannelCloseOk,
    ExchangeDeclare(ExchangeDeclareArgs),
    ExchangeDeclareOk,
    ExchangeDelete(ExchangeDeleteArgs),
    ExchangeDeleteOk,
    QueueDeclare(QueueDeclareArgs),
    QueueDeclareOk(QueueDeclareOkArgs),
    QueueBind(QueueBindArgs),
    QueueBindOk,
    QueuePurge(QueuePurgeArgs),
    QueuePurgeOk(QueuePurgeOkArgs),
    QueueDelete(QueueDeleteArgs),
    QueueDeleteOk(QueueDeleteOkArgs),
    QueueUnbind(QueueUnbindArgs),
    QueueUnbindOk,
    BasicConsume(BasicConsumeArgs),
    BasicConsumeOk(BasicConsumeOkArgs),
    BasicCancel(BasicCancelArgs),
    BasicCancelOk(BasicCancelOkArgs),
    BasicPublish(BasicPublishArgs),
    BasicReturn(BasicReturnArgs),
    BasicDeliver(BasicDeliverArgs),
    BasicAck(BasicAckArgs),
    BasicReject(BasicRejectArgs),
    BasicNack(BasicNackArgs),
    ConfirmSelect(ConfirmSelectArgs),
    ConfirmSelectOk,
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct HeaderPropertyFlags: u16 {
        const CLUSTER_ID       = 0b0000_0000_0000_0100;
        const APP_ID           = 0b0000_0000_0000_1000;
        const USER_ID          = 0b0000_0000_0001_0000;
        const MESSAGE_TYPE     = 0b0000_0000_0010_0000;
        const TIMESTAMP        = 0b0000_0000_0100_0000;
        const MESSAGE_ID       = 0b0000_0000_1000_0000;
        const EXPIRATION       = 0b0000_0001_0000_0000;
        const REPLY_TO         = 0b0000_0010_0000_0000;
        const CORRELATION_ID   = 0b0000_0100_0000_0000;
        const PRIORITY         = 0b0000_1000_0000_0000;
        const DELIVERY_MODE    = 0b0001_0000_0000_0000;
        const HEADERS          = 0b0010_0000_0000_0000;
        const CONTENT_ENCODING = 0b0100_0000_0000_0000;
        const CONTENT_TYPE     = 0b1000_0000_0000_0000;
    }
}

/// Content header, the properties of the message which follows in content body frames.
///
/// The property flags on the wire are not stored, they are derived from the properties which
/// have values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContentHeaderFrame {
    pub channel: Channel,
    pub class_id: ClassId,
    pub weight: Weight,
    pub body_size: u64,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub message_type: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
}

impl ContentHeaderFrame {
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn property_flags(&self) -> HeaderPropertyFlags {
        let mut flags = HeaderPropertyFlags::empty();

        flags.set(HeaderPropertyFlags::CONTENT_TYPE, self.content_type.is_some());
        flags.set(HeaderPropertyFlags::CONTENT_ENCODING, self.content_encoding.is_some());
        flags.set(HeaderPropertyFlags::HEADERS, self.headers.is_some());
        flags.set(HeaderPropertyFlags::DELIVERY_MODE, self.delivery_mode.is_some());
        flags.set(HeaderPropertyFlags::PRIORITY, self.priority.is_some());
        flags.set(HeaderPropertyFlags::CORRELATION_ID, self.correlation_id.is_some());
        flags.set(HeaderPropertyFlags::REPLY_TO, self.reply_to.is_some());
        flags.set(HeaderPropertyFlags::EXPIRATION, self.expiration.is_some());
        flags.set(HeaderPropertyFlags::MESSAGE_ID, self.message_id.is_some());
        flags.set(HeaderPropertyFlags::TIMESTAMP, self.timestamp.is_some());
        flags.set(HeaderPropertyFlags::MESSAGE_TYPE, self.message_type.is_some());
        flags.set(HeaderPropertyFlags::USER_ID, self.user_id.is_some());
        flags.set(HeaderPropertyFlags::APP_ID, self.app_id.is_some());
        flags.set(HeaderPropertyFlags::CLUSTER_ID, self.cluster_id.is_some());

        flags
    }

    pub fn frame(self) -> AMQPFrame {
        AMQPFrame::ContentHeader(self)
    }
}

#[derive(Clone, PartialEq)]
pub struct ContentBodyFrame {
    pub channel: Channel,
    pub body: Bytes,
}

impl ContentBodyFrame {
    pub fn frame(self) -> AMQPFrame {
        AMQPFrame::ContentBody(self)
    }
}

impl std::fmt::Debug for ContentBodyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = String::from_utf8_lossy(&self.body[..std::cmp::min(64usize, self.body.len())]);

        f.write_fmt(format_args!(
            "ContentBodyFrame {{ channel: {}, size: {}, body: \"{}\" }}",
            &self.channel,
            self.body.len(),
            body
        ))
    }
}

/// Type alias for inner type of field value.
pub type FieldTable = HashMap<String, AMQPFieldValue>;

/// Values of field tables and field arrays, with the RabbitMQ flavour of type tags.
#[derive(Clone, Debug, PartialEq)]
pub enum AMQPFieldValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(u8, u32),
    LongString(String),
    FieldArray(Vec<AMQPFieldValue>),
    Timestamp(u64),
    FieldTable(Box<FieldTable>),
    Void,
    ByteArray(Vec<u8>),
}

impl From<ContentHeaderFrame> for AMQPFrame {
    fn from(chf: ContentHeaderFrame) -> AMQPFrame {
        AMQPFrame::ContentHeader(chf)
    }
}

impl From<ContentBodyFrame> for AMQPFrame {
    fn from(cbf: ContentBodyFrame) -> AMQPFrame {
        AMQPFrame::ContentBody(cbf)
    }
}

/// Split class id and method id from `u32` combined code.
pub fn split_class_method(cm: u32) -> (u16, u16) {
    let method_id = (cm & 0x0000FFFF) as u16;
    let class_id = (cm >> 16) as u16;

    (class_id, method_id)
}

/// Combine class id and method id to a single `u32` value
pub fn unify_class_method(class: u16, method: u16) -> u32 {
    ((class as u32) << 16) | (method as u32)
}

pub fn heartbeat() -> AMQPFrame {
    AMQPFrame::Heartbeat(0)
}
