use super::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use codec::{decode_frame, encode_frame, AMQPCodec, Decoded, Frame};
use frame::{AMQPFieldValue, AMQPFrame, ContentBodyFrame, ContentHeaderFrame, FieldTable, MethodFrameArgs};
use tokio_util::codec::Encoder;

fn encoded(frame: &AMQPFrame) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1024);

    encode_frame(&mut buf, frame).unwrap();

    buf
}

fn decode_one(buf: &[u8]) -> AMQPFrame {
    match decode_frame(buf, 0).unwrap() {
        Decoded::Frame(frame, consumed) => {
            assert_eq!(consumed, buf.len());
            frame
        }
        Decoded::NeedMoreData => panic!("frame is not complete"),
    }
}

#[test]
fn encode_header_frame() {
    let mut encoder = AMQPCodec::default();
    let mut buf = BytesMut::with_capacity(1024);

    let res = encoder.encode(Frame::Frame(AMQPFrame::Header), &mut buf);

    assert!(res.is_ok());

    let expected = b"AMQP\x00\x00\x09\x01";
    let mut current = [0u8; 8];

    buf.copy_to_slice(&mut current[..]);

    assert_eq!(expected, &current);
}

#[test]
fn encode_method_frame() {
    let mut encoder = AMQPCodec::default();
    let mut buf = BytesMut::with_capacity(1024);

    let args = frame::QueueBindArgs {
        queue_name: "queue".into(),
        exchange_name: "exchg".into(),
        routing_key: "key".into(),
        no_wait: false,
        args: FieldTable::new(),
    };

    let res = encoder.encode(
        Frame::Frame(AMQPFrame::Method(
            0x0205,
            frame::QUEUE_BIND,
            MethodFrameArgs::QueueBind(args),
        )),
        &mut buf,
    );

    assert!(res.is_ok());

    let frame_header = b"\x01\x02\x05";
    let class_method = b"\x00\x32\x00\x14";

    let mut argbuf = BytesMut::with_capacity(256);
    argbuf.put(&class_method[..]);
    argbuf.put(&b"\x00\x00"[..]);
    argbuf.put(&b"\x05queue"[..]);
    argbuf.put(&b"\x05exchg"[..]);
    argbuf.put(&b"\x03key"[..]);
    argbuf.put(&b"\x00"[..]);
    argbuf.put(&b"\x00\x00\x00\x00"[..]);

    let mut expected = BytesMut::with_capacity(256);
    expected.put(&frame_header[..]);
    expected.put_u32(argbuf.len() as u32);
    expected.put(argbuf);
    expected.put_u8(0xCE);

    assert_eq!(expected, buf);
}

#[test]
fn encode_heartbeat_frame_has_type_octet() {
    let buf = encoded(&frame::heartbeat());

    assert_eq!(&buf[..], b"\x08\x00\x00\x00\x00\x00\x00\xCE");
}

#[test]
fn encode_publish_sequence() {
    let mut buf = BytesMut::new();
    let mut encoder = AMQPCodec::default();

    let frames = vec![
        frame::BasicPublishArgs::new("x-perf").routing_key("test").frame(3),
        ContentHeaderFrame {
            channel: 3,
            class_id: frame::BASIC_CLASS,
            body_size: 5,
            ..Default::default()
        }
        .frame(),
        ContentBodyFrame {
            channel: 3,
            body: Bytes::from_static(b"hello"),
        }
        .frame(),
    ];

    encoder.encode(Frame::Frames(frames), &mut buf).unwrap();

    let mut decoded = vec![];
    let mut pos = 0;

    while pos < buf.len() {
        match decode_frame(&buf[pos..], 0).unwrap() {
            Decoded::Frame(f, consumed) => {
                decoded.push(f);
                pos += consumed;
            }
            Decoded::NeedMoreData => panic!("incomplete frame at {}", pos),
        }
    }

    assert_eq!(decoded.len(), 3);
    assert!(matches!(&decoded[0], AMQPFrame::Method(3, frame::BASIC_PUBLISH, _)));
    assert!(matches!(&decoded[1], AMQPFrame::ContentHeader(h) if h.body_size == 5));
    assert!(matches!(&decoded[2], AMQPFrame::ContentBody(b) if &b.body[..] == b"hello"));
}

#[test]
fn decode_waits_for_the_whole_frame() {
    let buf = encoded(&frame::channel_open(1));

    for len in 0..buf.len() {
        assert_eq!(decode_frame(&buf[..len], 0).unwrap(), Decoded::NeedMoreData);
    }

    assert_eq!(
        decode_frame(&buf, 0).unwrap(),
        Decoded::Frame(frame::channel_open(1), buf.len())
    );
}

#[test]
fn decode_leaves_the_next_frame_in_the_buffer() {
    let mut buf = encoded(&frame::channel_open_ok(1));
    let first_len = buf.len();

    encode_frame(&mut buf, &frame::heartbeat()).unwrap();

    match decode_frame(&buf, 0).unwrap() {
        Decoded::Frame(f, consumed) => {
            assert_eq!(f, frame::channel_open_ok(1));
            assert_eq!(consumed, first_len);
        }
        Decoded::NeedMoreData => panic!("first frame is complete"),
    }
}

#[test]
fn decode_rejects_too_large_frame_from_its_header() {
    // header only, the payload has not arrived yet
    let buf = b"\x03\x00\x01\x00\x00\x10\x00";

    assert_eq!(
        decode_frame(buf, 4096),
        Err(FrameError::FrameTooLarge { size: 4104, max: 4096 })
    );

    assert_eq!(decode_frame(buf, 0).unwrap(), Decoded::NeedMoreData);
}

#[test]
fn decode_accepts_frame_of_exactly_frame_max() {
    let body = ContentBodyFrame {
        channel: 1,
        body: Bytes::from(vec![0u8; 4088]),
    };
    let buf = encoded(&body.frame());

    assert_eq!(buf.len(), 4096);
    assert!(matches!(decode_frame(&buf, 4096), Ok(Decoded::Frame(_, 4096))));
}

#[test]
fn decode_bad_frame_end() {
    let mut buf = encoded(&frame::heartbeat());
    let last = buf.len() - 1;

    buf[last] = 0x00;

    assert_eq!(decode_frame(&buf, 0), Err(FrameError::BadFrameEnd(0x00)));
}

#[test]
fn decode_unknown_frame_type() {
    let buf = b"\x05\x00\x00\x00\x00\x00\x00\xCE";

    assert_eq!(decode_frame(buf, 0), Err(FrameError::UnknownFrameType(5)));
}

#[test]
fn decode_unknown_method() {
    // basic.qos is not supported
    let buf = b"\x01\x00\x01\x00\x00\x00\x0B\x00\x3C\x00\x0A\x00\x00\x00\x00\x00\x00\x00\xCE";

    assert_eq!(decode_frame(buf, 0), Err(FrameError::UnknownMethod(0x003C000A)));
}

#[test]
fn decode_truncated_method_payload() {
    // basic.ack with a 4 byte delivery tag
    let buf = b"\x01\x00\x01\x00\x00\x00\x08\x00\x3C\x00\x50\x00\x00\x00\x01\xCE";

    assert_eq!(decode_frame(buf, 0), Err(FrameError::Truncated));
}

#[test]
fn decode_invalid_utf8_short_string() {
    // basic.consume-ok with a 0xFF in the consumer tag
    let buf = b"\x01\x00\x01\x00\x00\x00\x07\x00\x3C\x00\x15\x02a\xFF\xCE";

    assert_eq!(decode_frame(buf, 0), Err(FrameError::InvalidString));
}

#[test]
fn decode_unknown_field_type() {
    let mut buf = BytesMut::new();
    buf.put_u8(1);
    buf.put_u16(0);
    buf.put_u32(16);
    buf.put_u32(frame::CONNECTION_START);
    buf.put_u8(0);
    buf.put_u8(9);
    // table of 6 bytes: name "k" and value of type 'Z'
    buf.put_u32(6);
    buf.put(&b"\x01kZ\x00\x00\x00"[..]);
    buf.put_u8(0xCE);

    assert_eq!(decode_frame(&buf, 0), Err(FrameError::UnknownFieldType(b'Z')));
}

#[test]
fn encode_too_long_short_string_keeps_buffer() {
    let mut buf = encoded(&frame::heartbeat());
    let before = buf.clone();

    let fr = frame::BasicPublishArgs::new(&"x".repeat(256)).frame(1);

    assert_eq!(encode_frame(&mut buf, &fr), Err(FrameError::ShortStringTooLong));
    assert_eq!(buf, before);
}

#[test]
fn content_header_property_flags() {
    let header = ContentHeaderFrame {
        channel: 1,
        class_id: frame::BASIC_CLASS,
        body_size: 10,
        delivery_mode: Some(2),
        ..Default::default()
    }
    .with_content_type("application/json");

    let buf = encoded(&header.clone().frame());

    // class, weight, body size then the flags
    assert_eq!(&buf[7 + 12..7 + 14], &[0x90, 0x00]);
    assert_eq!(decode_one(&buf), AMQPFrame::ContentHeader(header));
}

#[test]
fn content_header_with_headers_table() {
    let mut headers = FieldTable::new();
    headers.insert("x-retries".into(), AMQPFieldValue::I32(-3));
    headers.insert("x-tags".into(), AMQPFieldValue::FieldArray(vec![
        AMQPFieldValue::LongString("a".into()),
        AMQPFieldValue::U8(7),
    ]));

    let header = ContentHeaderFrame {
        channel: 2,
        class_id: frame::BASIC_CLASS,
        body_size: 0,
        headers: Some(headers),
        timestamp: Some(1_700_000_000),
        app_id: Some("amqperf".into()),
        ..Default::default()
    };

    assert_eq!(decode_one(&encoded(&header.clone().frame())), AMQPFrame::ContentHeader(header));
}

#[test]
fn field_table_value_types() {
    let mut nested = FieldTable::new();
    nested.insert("deep".into(), AMQPFieldValue::Bool(false));

    let mut props = FieldTable::new();
    props.insert("t".into(), AMQPFieldValue::Bool(true));
    props.insert("b".into(), AMQPFieldValue::I8(-1));
    props.insert("s".into(), AMQPFieldValue::I16(-300));
    props.insert("u".into(), AMQPFieldValue::U16(300));
    props.insert("i".into(), AMQPFieldValue::U32(70_000));
    props.insert("l".into(), AMQPFieldValue::I64(-1 << 40));
    props.insert("f".into(), AMQPFieldValue::F32(1.5));
    props.insert("d".into(), AMQPFieldValue::F64(-2.25));
    props.insert("D".into(), AMQPFieldValue::Decimal(2, 12345));
    props.insert("T".into(), AMQPFieldValue::Timestamp(42));
    props.insert("F".into(), AMQPFieldValue::FieldTable(Box::new(nested)));
    props.insert("V".into(), AMQPFieldValue::Void);
    props.insert("x".into(), AMQPFieldValue::ByteArray(vec![0, 1, 2]));

    let start = frame::ConnectionStartArgs {
        version_major: 0,
        version_minor: 9,
        properties: props,
        mechanisms: "PLAIN".into(),
        locales: "en_US".into(),
    };

    assert_eq!(
        decode_one(&encoded(&start.clone().frame())),
        AMQPFrame::Method(0, frame::CONNECTION_START, MethodFrameArgs::ConnectionStart(start))
    );
}

#[test]
fn basic_nack_flags() {
    let fr = frame::basic_nack(4, 17, true, false);
    let buf = encoded(&fr);

    // delivery tag and the flag octet
    assert_eq!(&buf[11..20], b"\x00\x00\x00\x00\x00\x00\x00\x11\x01");

    match decode_one(&buf) {
        AMQPFrame::Method(4, frame::BASIC_NACK, MethodFrameArgs::BasicNack(args)) => {
            assert_eq!(args.delivery_tag, 17);
            assert!(args.is_multiple());
        }
        f => panic!("unexpected frame {:?}", f),
    }
}

#[test]
fn start_ok_plain_response() {
    let args = frame::ConnectionStartOkArgs::new("guest", "secret");

    assert_eq!(args.mechanism, "PLAIN");
    assert_eq!(args.response, "\u{0}guest\u{0}secret");
}

#[test]
fn split_and_unify_class_method() {
    assert_eq!(frame::split_class_method(frame::BASIC_PUBLISH), (60, 40));
    assert_eq!(frame::unify_class_method(20, 40), frame::CHANNEL_CLOSE);
}
