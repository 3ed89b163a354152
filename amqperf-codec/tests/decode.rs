use amqperf_codec::codec::{self, AMQPCodec, CodecError};
use amqperf_codec::frame::{self, AMQPFrame, ContentBodyFrame};
use amqperf_codec::FrameError;
use bytes::{Bytes, BytesMut};
use futures::stream::StreamExt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::codec::{Encoder, Framed, FramedParts};

/// Hands out the bytes in small chunks, returning `Pending` before every other chunk.
#[derive(Debug)]
struct MockStream {
    index: usize,
    pending: bool,
    chunk_size: usize,
    bytes: Vec<u8>,
}

impl MockStream {
    fn new(bytes: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            index: 0,
            pending: false,
            chunk_size,
            bytes,
        }
    }
}

impl tokio::io::AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending {
            self.pending = false;
            cx.waker().wake_by_ref();

            return Poll::Pending;
        }

        if self.index == self.bytes.len() {
            return Poll::Ready(Ok(()));
        }

        let end = std::cmp::min(self.index + self.chunk_size, self.bytes.len());

        buf.put_slice(&self.bytes[self.index..end]);
        self.index = end;
        self.pending = true;

        Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncWrite for MockStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn encode_all(frames: Vec<AMQPFrame>) -> BytesMut {
    let mut cdc = AMQPCodec::default();
    let mut buffer = BytesMut::new();

    cdc.encode(codec::Frame::Frames(frames), &mut buffer).unwrap();

    buffer
}

#[tokio::test]
async fn can_read_from_existing_buf() {
    let buffer = encode_all(vec![frame::ConnectionStartArgs::new().frame()]);

    let stream = MockStream::new(vec![], 16);
    let mut parts = FramedParts::new::<codec::Frame>(stream, AMQPCodec::default());
    parts.read_buf = buffer;

    let mut framed = Framed::from_parts(parts);
    let res = framed.next().await;

    assert!(matches!(
        res,
        Some(Ok(AMQPFrame::Method(0, frame::CONNECTION_START, _)))
    ));
}

#[tokio::test]
async fn frames_split_into_small_chunks() {
    let body = Bytes::from(vec![b'x'; 100]);
    let buffer = encode_all(vec![
        frame::channel_open_ok(1),
        frame::basic_ack(1, 5, true),
        ContentBodyFrame {
            channel: 1,
            body: body.clone(),
        }
        .frame(),
        frame::heartbeat(),
    ]);

    let mut framed = Framed::new(MockStream::new(buffer.to_vec(), 3), AMQPCodec::new(4096));
    let mut frames = vec![];

    while let Some(f) = framed.next().await {
        frames.push(f.unwrap());
    }

    assert_eq!(
        frames,
        vec![
            frame::channel_open_ok(1),
            frame::basic_ack(1, 5, true),
            ContentBodyFrame { channel: 1, body }.frame(),
            frame::heartbeat(),
        ]
    );
}

#[tokio::test]
async fn oversized_frame_is_an_error() {
    let buffer = encode_all(vec![ContentBodyFrame {
        channel: 1,
        body: Bytes::from(vec![0u8; 200]),
    }
    .frame()]);

    let mut framed = Framed::new(MockStream::new(buffer.to_vec(), 64), AMQPCodec::new(128));

    match framed.next().await {
        Some(Err(CodecError::Frame(FrameError::FrameTooLarge { size, max }))) => {
            assert_eq!(size, 208);
            assert_eq!(max, 128);
        }
        other => panic!("expected frame too large, got {:?}", other),
    }
}
