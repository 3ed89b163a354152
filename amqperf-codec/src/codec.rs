//! Encoding and decoding of AMQP frames.
//!
//! `decode_frame` and `encode_frame` work on plain buffers, the blocking transport calls them
//! directly. `AMQPCodec` wraps them for `tokio_util::codec::Framed`.
use crate::frame::*;
use crate::{FrameError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const FRAME_METHOD_FRAME: u8 = 0x01;
const FRAME_CONTENT_HEADER: u8 = 0x02;
const FRAME_CONTENT_BODY: u8 = 0x03;
const FRAME_HEARTBEAT: u8 = 0x08;
const FRAME_AMQP_VERSION: u8 = 0x41;
const FRAME_END: u8 = 0xCE;

const PROTOCOL_HEADER: &[u8; 8] = b"AMQP\x00\x00\x09\x01";

/// Size of the frame header (type, channel, size) plus the end octet.
pub const FRAME_OVERHEAD: usize = 8;

/// Result of trying to decode one frame from the beginning of a buffer.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    /// A complete frame and the number of bytes it occupied.
    Frame(AMQPFrame, usize),
    NeedMoreData,
}

/// Error type of the `Framed` codec, wire errors and socket errors together.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Codec for `Framed` streams. `frame_max` is zero until the connection is tuned, zero means
/// there is no limit.
#[derive(Debug, Default)]
pub struct AMQPCodec {
    pub frame_max: u32,
}

impl AMQPCodec {
    pub fn new(frame_max: u32) -> Self {
        Self { frame_max }
    }
}

#[derive(Debug)]
pub enum Frame {
    Frame(AMQPFrame),
    Frames(Vec<AMQPFrame>),
}

impl Encoder<Frame> for AMQPCodec {
    type Error = CodecError;

    fn encode(&mut self, event: Frame, buf: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        match event {
            Frame::Frame(frame) => encode_frame(buf, &frame)?,
            Frame::Frames(frames) => {
                for frame in &frames {
                    encode_frame(buf, frame)?;
                }
            }
        }

        Ok(())
    }
}

impl Decoder for AMQPCodec {
    type Item = AMQPFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        match decode_frame(&src[..], self.frame_max)? {
            Decoded::Frame(frame, consumed) => {
                src.advance(consumed);

                Ok(Some(frame))
            }
            Decoded::NeedMoreData => Ok(None),
        }
    }
}

/// Decode the first frame of `src`.
///
/// The size limit is checked as soon as the frame header is available, so an oversized frame
/// is rejected before its payload arrives.
pub fn decode_frame(src: &[u8], frame_max: u32) -> Result<Decoded> {
    if src.is_empty() {
        return Ok(Decoded::NeedMoreData);
    }

    if src[0] == FRAME_AMQP_VERSION {
        if src.len() < PROTOCOL_HEADER.len() {
            return Ok(Decoded::NeedMoreData);
        }

        if &src[..4] != b"AMQP" {
            return Err(FrameError::UnknownFrameType(src[0]));
        }

        return Ok(Decoded::Frame(AMQPFrame::Header, PROTOCOL_HEADER.len()));
    }

    if src.len() < 7 {
        return Ok(Decoded::NeedMoreData);
    }

    let mut header = &src[..7];
    let frame_type = header.get_u8();
    let channel = header.get_u16();
    let size = header.get_u32();

    let total = size as u64 + FRAME_OVERHEAD as u64;

    if frame_max != 0 && total > frame_max as u64 {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: frame_max,
        });
    }

    let total = total as usize;

    if src.len() < total {
        return Ok(Decoded::NeedMoreData);
    }

    if src[total - 1] != FRAME_END {
        return Err(FrameError::BadFrameEnd(src[total - 1]));
    }

    let mut payload = Reader::new(&src[7..total - 1]);

    let frame = match frame_type {
        FRAME_METHOD_FRAME => decode_method_frame(&mut payload, channel)?,
        FRAME_CONTENT_HEADER => decode_content_header_frame(&mut payload, channel)?,
        FRAME_CONTENT_BODY => AMQPFrame::ContentBody(ContentBodyFrame {
            channel,
            body: Bytes::copy_from_slice(payload.rest()),
        }),
        FRAME_HEARTBEAT => AMQPFrame::Heartbeat(channel),
        f => return Err(FrameError::UnknownFrameType(f)),
    };

    Ok(Decoded::Frame(frame, total))
}

/// Append the wire form of `frame` to `buf`. On error `buf` is left as it was.
pub fn encode_frame(buf: &mut BytesMut, frame: &AMQPFrame) -> Result<()> {
    let start = buf.len();

    let result = match frame {
        AMQPFrame::Header => {
            buf.put(&PROTOCOL_HEADER[..]);
            Ok(())
        }
        AMQPFrame::Method(ch, cm, args) => {
            write_frame(buf, FRAME_METHOD_FRAME, *ch, |fr| encode_method_frame(fr, *cm, args))
        }
        AMQPFrame::ContentHeader(hf) => {
            write_frame(buf, FRAME_CONTENT_HEADER, hf.channel, |fr| encode_content_header_frame(fr, hf))
        }
        AMQPFrame::ContentBody(bf) => write_frame(buf, FRAME_CONTENT_BODY, bf.channel, |fr| {
            fr.put_slice(&bf.body);
            Ok(())
        }),
        AMQPFrame::Heartbeat(channel) => write_frame(buf, FRAME_HEARTBEAT, *channel, |_| Ok(())),
    };

    if result.is_err() {
        buf.truncate(start);
    }

    result
}

/// Write the frame header, the payload produced by `payload` and the end octet. The size field
/// is patched after the payload is written.
fn write_frame<F>(buf: &mut BytesMut, frame_type: u8, channel: Channel, payload: F) -> Result<()>
where
    F: FnOnce(&mut BytesMut) -> Result<()>,
{
    buf.put_u8(frame_type);
    buf.put_u16(channel);

    let size_pos = buf.len();
    buf.put_u32(0);

    payload(buf)?;

    let size = (buf.len() - size_pos - 4) as u32;
    buf[size_pos..size_pos + 4].copy_from_slice(&size.to_be_bytes());
    buf.put_u8(FRAME_END);

    Ok(())
}

/// Bounds checked reading over a frame payload.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            Err(FrameError::Truncated)
        } else {
            Ok(())
        }
    }

    fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;

        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;

        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn i8(&mut self) -> Result<i8> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    fn i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    fn i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    fn u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    fn i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    fn f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    fn f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    fn short_string(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;

        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| FrameError::InvalidString)
    }

    fn long_string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;

        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| FrameError::InvalidString)
    }

    /// Field table is a `u32` length and the name-value pairs.
    fn field_table(&mut self) -> Result<FieldTable> {
        let len = self.u32()? as usize;
        let mut ft = Reader::new(self.take(len)?);
        let mut table = FieldTable::new();

        while ft.has_remaining() {
            let name = ft.short_string()?;
            let value = ft.field_value()?;

            table.insert(name, value);
        }

        Ok(table)
    }

    fn field_value(&mut self) -> Result<AMQPFieldValue> {
        let value = match self.u8()? {
            b't' => AMQPFieldValue::Bool(self.bool()?),
            b'b' => AMQPFieldValue::I8(self.i8()?),
            b'B' => AMQPFieldValue::U8(self.u8()?),
            b's' => AMQPFieldValue::I16(self.i16()?),
            b'u' => AMQPFieldValue::U16(self.u16()?),
            b'I' => AMQPFieldValue::I32(self.i32()?),
            b'i' => AMQPFieldValue::U32(self.u32()?),
            b'l' => AMQPFieldValue::I64(self.i64()?),
            b'f' => AMQPFieldValue::F32(self.f32()?),
            b'd' => AMQPFieldValue::F64(self.f64()?),
            b'D' => AMQPFieldValue::Decimal(self.u8()?, self.u32()?),
            b'S' => AMQPFieldValue::LongString(self.long_string()?),
            b'A' => {
                let len = self.u32()? as usize;
                let mut array = Reader::new(self.take(len)?);
                let mut values = vec![];

                while array.has_remaining() {
                    values.push(array.field_value()?);
                }

                AMQPFieldValue::FieldArray(values)
            }
            b'T' => AMQPFieldValue::Timestamp(self.u64()?),
            b'F' => AMQPFieldValue::FieldTable(Box::new(self.field_table()?)),
            b'V' => AMQPFieldValue::Void,
            b'x' => {
                let len = self.u32()? as usize;

                AMQPFieldValue::ByteArray(self.take(len)?.to_vec())
            }
            t => return Err(FrameError::UnknownFieldType(t)),
        };

        Ok(value)
    }
}

fn decode_method_frame(src: &mut Reader<'_>, channel: Channel) -> Result<AMQPFrame> {
    let class_method = src.u32()?;

    let args = match class_method {
        CONNECTION_START => MethodFrameArgs::ConnectionStart(ConnectionStartArgs {
            version_major: src.u8()?,
            version_minor: src.u8()?,
            properties: src.field_table()?,
            mechanisms: src.long_string()?,
            locales: src.long_string()?,
        }),
        CONNECTION_START_OK => MethodFrameArgs::ConnectionStartOk(ConnectionStartOkArgs {
            properties: src.field_table()?,
            mechanism: src.short_string()?,
            response: src.long_string()?,
            locale: src.short_string()?,
        }),
        CONNECTION_TUNE => MethodFrameArgs::ConnectionTune(ConnectionTuneArgs {
            channel_max: src.u16()?,
            frame_max: src.u32()?,
            heartbeat: src.u16()?,
        }),
        CONNECTION_TUNE_OK => MethodFrameArgs::ConnectionTuneOk(ConnectionTuneOkArgs {
            channel_max: src.u16()?,
            frame_max: src.u32()?,
            heartbeat: src.u16()?,
        }),
        CONNECTION_OPEN => {
            let virtual_host = src.short_string()?;
            let _reserved = src.short_string()?;

            MethodFrameArgs::ConnectionOpen(ConnectionOpenArgs {
                virtual_host,
                insist: src.u8()? & 0x01 != 0,
            })
        }
        CONNECTION_OPEN_OK => {
            let _reserved = src.short_string()?;

            MethodFrameArgs::ConnectionOpenOk
        }
        CONNECTION_CLOSE => MethodFrameArgs::ConnectionClose(ConnectionCloseArgs {
            code: src.u16()?,
            text: src.short_string()?,
            class_id: src.u16()?,
            method_id: src.u16()?,
        }),
        CONNECTION_CLOSE_OK => MethodFrameArgs::ConnectionCloseOk,
        CONNECTION_BLOCKED => MethodFrameArgs::ConnectionBlocked(ConnectionBlockedArgs {
            reason: src.short_string()?,
        }),
        CONNECTION_UNBLOCKED => MethodFrameArgs::ConnectionUnblocked,
        CHANNEL_OPEN => {
            let _reserved = src.short_string()?;

            MethodFrameArgs::ChannelOpen
        }
        CHANNEL_OPEN_OK => {
            let _reserved = src.long_string()?;

            MethodFrameArgs::ChannelOpenOk
        }
        CHANNEL_CLOSE => MethodFrameArgs::ChannelClose(ChannelCloseArgs {
            code: src.u16()?,
            text: src.short_string()?,
            class_id: src.u16()?,
            method_id: src.u16()?,
        }),
        CHANNEL_CLOSE_OK => MethodFrameArgs::ChannelCloseOk,
        EXCHANGE_DECLARE => {
            let _ = src.u16()?;

            MethodFrameArgs::ExchangeDeclare(ExchangeDeclareArgs {
                exchange_name: src.short_string()?,
                exchange_type: src.short_string()?,
                flags: ExchangeDeclareFlags::from_bits_truncate(src.u8()?),
                args: src.field_table()?,
            })
        }
        EXCHANGE_DECLARE_OK => MethodFrameArgs::ExchangeDeclareOk,
        EXCHANGE_DELETE => {
            let _ = src.u16()?;

            MethodFrameArgs::ExchangeDelete(ExchangeDeleteArgs {
                exchange_name: src.short_string()?,
                flags: ExchangeDeleteFlags::from_bits_truncate(src.u8()?),
            })
        }
        EXCHANGE_DELETE_OK => MethodFrameArgs::ExchangeDeleteOk,
        QUEUE_DECLARE => {
            let _ = src.u16()?;

            MethodFrameArgs::QueueDeclare(QueueDeclareArgs {
                name: src.short_string()?,
                flags: QueueDeclareFlags::from_bits_truncate(src.u8()?),
                args: src.field_table()?,
            })
        }
        QUEUE_DECLARE_OK => MethodFrameArgs::QueueDeclareOk(QueueDeclareOkArgs {
            name: src.short_string()?,
            message_count: src.u32()?,
            consumer_count: src.u32()?,
        }),
        QUEUE_BIND => {
            let _ = src.u16()?;

            MethodFrameArgs::QueueBind(QueueBindArgs {
                queue_name: src.short_string()?,
                exchange_name: src.short_string()?,
                routing_key: src.short_string()?,
                no_wait: src.bool()?,
                args: src.field_table()?,
            })
        }
        QUEUE_BIND_OK => MethodFrameArgs::QueueBindOk,
        QUEUE_PURGE => {
            let _ = src.u16()?;

            MethodFrameArgs::QueuePurge(QueuePurgeArgs {
                queue_name: src.short_string()?,
                no_wait: src.bool()?,
            })
        }
        QUEUE_PURGE_OK => MethodFrameArgs::QueuePurgeOk(QueuePurgeOkArgs {
            message_count: src.u32()?,
        }),
        QUEUE_DELETE => {
            let _ = src.u16()?;

            MethodFrameArgs::QueueDelete(QueueDeleteArgs {
                queue_name: src.short_string()?,
                flags: QueueDeleteFlags::from_bits_truncate(src.u8()?),
            })
        }
        QUEUE_DELETE_OK => MethodFrameArgs::QueueDeleteOk(QueueDeleteOkArgs {
            message_count: src.u32()?,
        }),
        QUEUE_UNBIND => {
            let _ = src.u16()?;

            MethodFrameArgs::QueueUnbind(QueueUnbindArgs {
                queue_name: src.short_string()?,
                exchange_name: src.short_string()?,
                routing_key: src.short_string()?,
                args: src.field_table()?,
            })
        }
        QUEUE_UNBIND_OK => MethodFrameArgs::QueueUnbindOk,
        BASIC_CONSUME => {
            let _ = src.u16()?;

            MethodFrameArgs::BasicConsume(BasicConsumeArgs {
                queue: src.short_string()?,
                consumer_tag: src.short_string()?,
                flags: BasicConsumeFlags::from_bits_truncate(src.u8()?),
                args: src.field_table()?,
            })
        }
        BASIC_CONSUME_OK => MethodFrameArgs::BasicConsumeOk(BasicConsumeOkArgs {
            consumer_tag: src.short_string()?,
        }),
        BASIC_CANCEL => MethodFrameArgs::BasicCancel(BasicCancelArgs {
            consumer_tag: src.short_string()?,
            no_wait: src.bool()?,
        }),
        BASIC_CANCEL_OK => MethodFrameArgs::BasicCancelOk(BasicCancelOkArgs {
            consumer_tag: src.short_string()?,
        }),
        BASIC_PUBLISH => {
            let _ = src.u16()?;

            MethodFrameArgs::BasicPublish(BasicPublishArgs {
                exchange_name: src.short_string()?,
                routing_key: src.short_string()?,
                flags: BasicPublishFlags::from_bits_truncate(src.u8()?),
            })
        }
        BASIC_RETURN => MethodFrameArgs::BasicReturn(BasicReturnArgs {
            reply_code: src.u16()?,
            reply_text: src.short_string()?,
            exchange_name: src.short_string()?,
            routing_key: src.short_string()?,
        }),
        BASIC_DELIVER => MethodFrameArgs::BasicDeliver(BasicDeliverArgs {
            consumer_tag: src.short_string()?,
            delivery_tag: src.u64()?,
            redelivered: src.bool()?,
            exchange_name: src.short_string()?,
            routing_key: src.short_string()?,
        }),
        BASIC_ACK => MethodFrameArgs::BasicAck(BasicAckArgs {
            delivery_tag: src.u64()?,
            multiple: src.bool()?,
        }),
        BASIC_REJECT => MethodFrameArgs::BasicReject(BasicRejectArgs {
            delivery_tag: src.u64()?,
            requeue: src.bool()?,
        }),
        BASIC_NACK => MethodFrameArgs::BasicNack(BasicNackArgs {
            delivery_tag: src.u64()?,
            flags: BasicNackFlags::from_bits_truncate(src.u8()?),
        }),
        CONFIRM_SELECT => MethodFrameArgs::ConfirmSelect(ConfirmSelectArgs { no_wait: src.bool()? }),
        CONFIRM_SELECT_OK => MethodFrameArgs::ConfirmSelectOk,
        _ => return Err(FrameError::UnknownMethod(class_method)),
    };

    Ok(AMQPFrame::Method(channel, class_method, args))
}

fn decode_content_header_frame(src: &mut Reader<'_>, channel: Channel) -> Result<AMQPFrame> {
    let mut hf = ContentHeaderFrame {
        channel,
        class_id: src.u16()?,
        weight: src.u16()?,
        body_size: src.u64()?,
        ..Default::default()
    };

    let flags = HeaderPropertyFlags::from_bits_truncate(src.u16()?);

    if flags.contains(HeaderPropertyFlags::CONTENT_TYPE) {
        hf.content_type = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::CONTENT_ENCODING) {
        hf.content_encoding = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::HEADERS) {
        hf.headers = Some(src.field_table()?);
    }
    if flags.contains(HeaderPropertyFlags::DELIVERY_MODE) {
        hf.delivery_mode = Some(src.u8()?);
    }
    if flags.contains(HeaderPropertyFlags::PRIORITY) {
        hf.priority = Some(src.u8()?);
    }
    if flags.contains(HeaderPropertyFlags::CORRELATION_ID) {
        hf.correlation_id = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::REPLY_TO) {
        hf.reply_to = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::EXPIRATION) {
        hf.expiration = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::MESSAGE_ID) {
        hf.message_id = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::TIMESTAMP) {
        hf.timestamp = Some(src.u64()?);
    }
    if flags.contains(HeaderPropertyFlags::MESSAGE_TYPE) {
        hf.message_type = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::USER_ID) {
        hf.user_id = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::APP_ID) {
        hf.app_id = Some(src.short_string()?);
    }
    if flags.contains(HeaderPropertyFlags::CLUSTER_ID) {
        hf.cluster_id = Some(src.short_string()?);
    }

    Ok(AMQPFrame::ContentHeader(hf))
}

fn encode_method_frame(buf: &mut BytesMut, cm: ClassMethod, args: &MethodFrameArgs) -> Result<()> {
    buf.put_u32(cm);

    match args {
        MethodFrameArgs::ConnectionStart(args) => {
            buf.put_u8(args.version_major);
            buf.put_u8(args.version_minor);
            encode_field_table(buf, &args.properties)?;
            encode_long_string(buf, &args.mechanisms);
            encode_long_string(buf, &args.locales);
        }
        MethodFrameArgs::ConnectionStartOk(args) => {
            encode_field_table(buf, &args.properties)?;
            encode_short_string(buf, &args.mechanism)?;
            encode_long_string(buf, &args.response);
            encode_short_string(buf, &args.locale)?;
        }
        MethodFrameArgs::ConnectionTune(args) => {
            buf.put_u16(args.channel_max);
            buf.put_u32(args.frame_max);
            buf.put_u16(args.heartbeat);
        }
        MethodFrameArgs::ConnectionTuneOk(args) => {
            buf.put_u16(args.channel_max);
            buf.put_u32(args.frame_max);
            buf.put_u16(args.heartbeat);
        }
        MethodFrameArgs::ConnectionOpen(args) => {
            encode_short_string(buf, &args.virtual_host)?;
            encode_short_string(buf, "")?;
            buf.put_u8(if args.insist { 1 } else { 0 });
        }
        // reserved short string
        MethodFrameArgs::ConnectionOpenOk | MethodFrameArgs::ChannelOpen => buf.put_u8(0),
        MethodFrameArgs::ConnectionClose(args) => {
            buf.put_u16(args.code);
            encode_short_string(buf, &args.text)?;
            buf.put_u16(args.class_id);
            buf.put_u16(args.method_id);
        }
        MethodFrameArgs::ConnectionBlocked(args) => encode_short_string(buf, &args.reason)?,
        // reserved long string
        MethodFrameArgs::ChannelOpenOk => buf.put_u32(0),
        MethodFrameArgs::ChannelClose(args) => {
            buf.put_u16(args.code);
            encode_short_string(buf, &args.text)?;
            buf.put_u16(args.class_id);
            buf.put_u16(args.method_id);
        }
        MethodFrameArgs::ExchangeDeclare(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.exchange_name)?;
            encode_short_string(buf, &args.exchange_type)?;
            buf.put_u8(args.flags.bits());
            encode_field_table(buf, &args.args)?;
        }
        MethodFrameArgs::ExchangeDelete(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.exchange_name)?;
            buf.put_u8(args.flags.bits());
        }
        MethodFrameArgs::QueueDeclare(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.name)?;
            buf.put_u8(args.flags.bits());
            encode_field_table(buf, &args.args)?;
        }
        MethodFrameArgs::QueueDeclareOk(args) => {
            encode_short_string(buf, &args.name)?;
            buf.put_u32(args.message_count);
            buf.put_u32(args.consumer_count);
        }
        MethodFrameArgs::QueueBind(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.queue_name)?;
            encode_short_string(buf, &args.exchange_name)?;
            encode_short_string(buf, &args.routing_key)?;
            buf.put_u8(if args.no_wait { 1 } else { 0 });
            encode_field_table(buf, &args.args)?;
        }
        MethodFrameArgs::QueuePurge(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.queue_name)?;
            buf.put_u8(if args.no_wait { 1 } else { 0 });
        }
        MethodFrameArgs::QueuePurgeOk(args) => buf.put_u32(args.message_count),
        MethodFrameArgs::QueueDelete(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.queue_name)?;
            buf.put_u8(args.flags.bits());
        }
        MethodFrameArgs::QueueDeleteOk(args) => buf.put_u32(args.message_count),
        MethodFrameArgs::QueueUnbind(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.queue_name)?;
            encode_short_string(buf, &args.exchange_name)?;
            encode_short_string(buf, &args.routing_key)?;
            encode_field_table(buf, &args.args)?;
        }
        MethodFrameArgs::BasicConsume(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.queue)?;
            encode_short_string(buf, &args.consumer_tag)?;
            buf.put_u8(args.flags.bits());
            encode_field_table(buf, &args.args)?;
        }
        MethodFrameArgs::BasicConsumeOk(args) => encode_short_string(buf, &args.consumer_tag)?,
        MethodFrameArgs::BasicCancel(args) => {
            encode_short_string(buf, &args.consumer_tag)?;
            buf.put_u8(if args.no_wait { 1 } else { 0 });
        }
        MethodFrameArgs::BasicCancelOk(args) => encode_short_string(buf, &args.consumer_tag)?,
        MethodFrameArgs::BasicPublish(args) => {
            buf.put_u16(0);
            encode_short_string(buf, &args.exchange_name)?;
            encode_short_string(buf, &args.routing_key)?;
            buf.put_u8(args.flags.bits());
        }
        MethodFrameArgs::BasicReturn(args) => {
            buf.put_u16(args.reply_code);
            encode_short_string(buf, &args.reply_text)?;
            encode_short_string(buf, &args.exchange_name)?;
            encode_short_string(buf, &args.routing_key)?;
        }
        MethodFrameArgs::BasicDeliver(args) => {
            encode_short_string(buf, &args.consumer_tag)?;
            buf.put_u64(args.delivery_tag);
            buf.put_u8(if args.redelivered { 1 } else { 0 });
            encode_short_string(buf, &args.exchange_name)?;
            encode_short_string(buf, &args.routing_key)?;
        }
        MethodFrameArgs::BasicAck(args) => {
            buf.put_u64(args.delivery_tag);
            buf.put_u8(if args.multiple { 1 } else { 0 });
        }
        MethodFrameArgs::BasicReject(args) => {
            buf.put_u64(args.delivery_tag);
            buf.put_u8(if args.requeue { 1 } else { 0 });
        }
        MethodFrameArgs::BasicNack(args) => {
            buf.put_u64(args.delivery_tag);
            buf.put_u8(args.flags.bits());
        }
        MethodFrameArgs::ConfirmSelect(args) => buf.put_u8(if args.no_wait { 1 } else { 0 }),
        MethodFrameArgs::ConnectionCloseOk
        | MethodFrameArgs::ConnectionUnblocked
        | MethodFrameArgs::ChannelCloseOk
        | MethodFrameArgs::ExchangeDeclareOk
        | MethodFrameArgs::ExchangeDeleteOk
        | MethodFrameArgs::QueueBindOk
        | MethodFrameArgs::QueueUnbindOk
        | MethodFrameArgs::ConfirmSelectOk => (),
    }

    Ok(())
}

fn encode_content_header_frame(buf: &mut BytesMut, hf: &ContentHeaderFrame) -> Result<()> {
    buf.put_u16(hf.class_id);
    buf.put_u16(hf.weight);
    buf.put_u64(hf.body_size);
    buf.put_u16(hf.property_flags().bits());

    if let Some(s) = &hf.content_type {
        encode_short_string(buf, s)?;
    }
    if let Some(s) = &hf.content_encoding {
        encode_short_string(buf, s)?;
    }
    if let Some(headers) = &hf.headers {
        encode_field_table(buf, headers)?;
    }
    if let Some(v) = hf.delivery_mode {
        buf.put_u8(v);
    }
    if let Some(v) = hf.priority {
        buf.put_u8(v);
    }
    if let Some(s) = &hf.correlation_id {
        encode_short_string(buf, s)?;
    }
    if let Some(s) = &hf.reply_to {
        encode_short_string(buf, s)?;
    }
    if let Some(s) = &hf.expiration {
        encode_short_string(buf, s)?;
    }
    if let Some(s) = &hf.message_id {
        encode_short_string(buf, s)?;
    }
    if let Some(v) = hf.timestamp {
        buf.put_u64(v);
    }
    if let Some(s) = &hf.message_type {
        encode_short_string(buf, s)?;
    }
    if let Some(s) = &hf.user_id {
        encode_short_string(buf, s)?;
    }
    if let Some(s) = &hf.app_id {
        encode_short_string(buf, s)?;
    }
    if let Some(s) = &hf.cluster_id {
        encode_short_string(buf, s)?;
    }

    Ok(())
}

fn encode_short_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    let len = u8::try_from(s.len()).map_err(|_| FrameError::ShortStringTooLong)?;

    buf.put_u8(len);
    buf.put(s.as_bytes());

    Ok(())
}

fn encode_long_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put(s.as_bytes());
}

/// Write a `u32` length placeholder, run `body` and patch the length afterwards.
fn with_length_prefix<F>(buf: &mut BytesMut, body: F) -> Result<()>
where
    F: FnOnce(&mut BytesMut) -> Result<()>,
{
    let len_pos = buf.len();
    buf.put_u32(0);

    body(buf)?;

    let len = (buf.len() - len_pos - 4) as u32;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());

    Ok(())
}

fn encode_field_table(buf: &mut BytesMut, table: &FieldTable) -> Result<()> {
    with_length_prefix(buf, |buf| {
        for (name, value) in table {
            encode_short_string(buf, name)?;
            encode_field_value(buf, value)?;
        }

        Ok(())
    })
}

fn encode_field_value(buf: &mut BytesMut, value: &AMQPFieldValue) -> Result<()> {
    match value {
        AMQPFieldValue::Bool(v) => {
            buf.put_u8(b't');
            buf.put_u8(if *v { 1 } else { 0 });
        }
        AMQPFieldValue::I8(v) => {
            buf.put_u8(b'b');
            buf.put_i8(*v);
        }
        AMQPFieldValue::U8(v) => {
            buf.put_u8(b'B');
            buf.put_u8(*v);
        }
        AMQPFieldValue::I16(v) => {
            buf.put_u8(b's');
            buf.put_i16(*v);
        }
        AMQPFieldValue::U16(v) => {
            buf.put_u8(b'u');
            buf.put_u16(*v);
        }
        AMQPFieldValue::I32(v) => {
            buf.put_u8(b'I');
            buf.put_i32(*v);
        }
        AMQPFieldValue::U32(v) => {
            buf.put_u8(b'i');
            buf.put_u32(*v);
        }
        AMQPFieldValue::I64(v) => {
            buf.put_u8(b'l');
            buf.put_i64(*v);
        }
        AMQPFieldValue::F32(v) => {
            buf.put_u8(b'f');
            buf.put_f32(*v);
        }
        AMQPFieldValue::F64(v) => {
            buf.put_u8(b'd');
            buf.put_f64(*v);
        }
        AMQPFieldValue::Decimal(scale, v) => {
            buf.put_u8(b'D');
            buf.put_u8(*scale);
            buf.put_u32(*v);
        }
        AMQPFieldValue::LongString(v) => {
            buf.put_u8(b'S');
            encode_long_string(buf, v);
        }
        AMQPFieldValue::FieldArray(values) => {
            buf.put_u8(b'A');
            with_length_prefix(buf, |buf| {
                for v in values {
                    encode_field_value(buf, v)?;
                }

                Ok(())
            })?;
        }
        AMQPFieldValue::Timestamp(v) => {
            buf.put_u8(b'T');
            buf.put_u64(*v);
        }
        AMQPFieldValue::FieldTable(v) => {
            buf.put_u8(b'F');
            encode_field_table(buf, v)?;
        }
        AMQPFieldValue::Void => buf.put_u8(b'V'),
        AMQPFieldValue::ByteArray(v) => {
            buf.put_u8(b'x');
            buf.put_u32(v.len() as u32);
            buf.put(v.as_slice());
        }
    }

    Ok(())
}
