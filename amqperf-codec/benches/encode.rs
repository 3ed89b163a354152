use amqperf_codec::codec::{decode_frame, encode_frame, Decoded};
use amqperf_codec::frame::{self, ContentBodyFrame, ContentHeaderFrame};
use bencher::Bencher;
use bytes::{Bytes, BytesMut};

fn publish_frames(size: usize) -> Vec<frame::AMQPFrame> {
    vec![
        frame::BasicPublishArgs::new("x-perf").routing_key("test").frame(1),
        ContentHeaderFrame {
            channel: 1,
            class_id: frame::BASIC_CLASS,
            body_size: size as u64,
            ..Default::default()
        }
        .frame(),
        ContentBodyFrame {
            channel: 1,
            body: Bytes::from(vec![b'x'; size]),
        }
        .frame(),
    ]
}

fn encode_publish(b: &mut Bencher) {
    let frames = publish_frames(1024);
    let mut buf = BytesMut::with_capacity(4096);

    b.iter(move || {
        buf.clear();

        for f in &frames {
            encode_frame(&mut buf, f).unwrap();
        }
    });
}

fn decode_ack(b: &mut Bencher) {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, &frame::basic_ack(1, 1000, false)).unwrap();
    let bytes = buf.freeze();

    b.iter(move || match decode_frame(&bytes, 0).unwrap() {
        Decoded::Frame(f, _) => f,
        Decoded::NeedMoreData => unreachable!(),
    });
}

bencher::benchmark_group!(codec, encode_publish, decode_ack);

bencher::benchmark_main!(codec);
