use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use amqperf_client::ConnectionParameters;
use amqperf_codec::codec::{decode_frame, encode_frame, Decoded};
use amqperf_codec::frame::{
    self, AMQPFrame, BasicConsumeOkArgs, BasicDeliverArgs, BasicPublishArgs, BasicReturnArgs, ContentBodyFrame,
    ContentHeaderFrame, ConnectionStartArgs, ConnectionTuneArgs, MethodFrameArgs, QueueDeclareOkArgs,
};
use bytes::{Buf, Bytes, BytesMut};

use super::*;
use crate::cli::{AltPubConsArgs, Impl, PublishArgs};
use crate::metrics::Recorder;

/// Just enough broker for the harnesses: confirms every publish, routes the default exchange
/// to consumed queues and returns mandatory messages sent to the `unroutable` key. Publishes
/// to the `rejected` key are nacked.
#[derive(Default)]
struct Broker {
    confirm: HashMap<u16, u64>,
    publish: Option<(u16, BasicPublishArgs)>,
    body_size: u64,
    body: BytesMut,
    consumers: HashMap<String, (u16, String)>,
    delivery_tag: u64,
    client_acks: Vec<u64>,
    closed: bool,
}

impl Broker {
    fn reply(&mut self, f: &AMQPFrame) -> Vec<AMQPFrame> {
        match f {
            AMQPFrame::Header => vec![ConnectionStartArgs::new().frame()],
            AMQPFrame::Method(_, _, MethodFrameArgs::ConnectionStartOk(_)) => vec![ConnectionTuneArgs {
                channel_max: 2047,
                frame_max: 131_072,
                heartbeat: 0,
            }
            .frame()],
            AMQPFrame::Method(_, _, MethodFrameArgs::ConnectionOpen(_)) => vec![frame::connection_open_ok()],
            AMQPFrame::Method(ch, _, MethodFrameArgs::ChannelOpen) => vec![frame::channel_open_ok(*ch)],
            AMQPFrame::Method(ch, _, MethodFrameArgs::ConfirmSelect(_)) => {
                self.confirm.insert(*ch, 0);

                vec![frame::confirm_select_ok(*ch)]
            }
            AMQPFrame::Method(ch, _, MethodFrameArgs::QueueDeclare(_)) => {
                vec![QueueDeclareOkArgs::default().name("amq.gen-harness").frame(*ch)]
            }
            AMQPFrame::Method(ch, _, MethodFrameArgs::BasicConsume(args)) => {
                self.consumers
                    .insert(args.queue.clone(), (*ch, args.consumer_tag.clone()));

                vec![BasicConsumeOkArgs::new(&args.consumer_tag).frame(*ch)]
            }
            AMQPFrame::Method(ch, _, MethodFrameArgs::BasicCancel(args)) => {
                self.consumers.retain(|_, (_, tag)| *tag != args.consumer_tag);

                vec![frame::BasicCancelOkArgs::new(&args.consumer_tag).frame(*ch)]
            }
            AMQPFrame::Method(ch, _, MethodFrameArgs::BasicPublish(args)) => {
                self.publish = Some((*ch, args.clone()));
                self.body.clear();

                vec![]
            }
            AMQPFrame::ContentHeader(header) => {
                self.body_size = header.body_size;

                if header.body_size == 0 {
                    self.route()
                } else {
                    vec![]
                }
            }
            AMQPFrame::ContentBody(body) => {
                self.body.extend_from_slice(&body.body);

                if self.body.len() as u64 == self.body_size {
                    self.route()
                } else {
                    vec![]
                }
            }
            AMQPFrame::Method(_, _, MethodFrameArgs::BasicAck(args)) => {
                self.client_acks.push(args.delivery_tag);

                vec![]
            }
            AMQPFrame::Method(ch, _, MethodFrameArgs::ChannelClose(_)) => vec![frame::channel_close_ok(*ch)],
            AMQPFrame::Method(_, _, MethodFrameArgs::ConnectionClose(_)) => {
                self.closed = true;

                vec![frame::connection_close_ok()]
            }
            _ => vec![],
        }
    }

    fn route(&mut self) -> Vec<AMQPFrame> {
        let mut replies = vec![];
        let body = self.body.split().freeze();

        let (ch, args) = match self.publish.take() {
            Some(publish) => publish,
            None => return replies,
        };

        if args.exchange_name.is_empty() {
            if let Some((consumer_ch, tag)) = self.consumers.get(&args.routing_key) {
                self.delivery_tag += 1;

                replies.push(
                    BasicDeliverArgs::new(tag, self.delivery_tag, "")
                        .routing_key(&args.routing_key)
                        .frame(*consumer_ch),
                );
                replies.extend(content(*consumer_ch, body.clone()));
            }
        }

        if args.is_mandatory() && args.routing_key == "unroutable" {
            replies.push(
                BasicReturnArgs {
                    reply_code: 312,
                    reply_text: "NO_ROUTE".to_string(),
                    exchange_name: args.exchange_name.clone(),
                    routing_key: args.routing_key.clone(),
                }
                .frame(ch),
            );
            replies.extend(content(ch, body));
        }

        if let Some(seq) = self.confirm.get_mut(&ch) {
            *seq += 1;

            if args.routing_key == "rejected" {
                replies.push(frame::basic_nack(ch, *seq, false, false));
            } else {
                replies.push(frame::basic_ack(ch, *seq, false));
            }
        }

        replies
    }
}

fn content(channel: u16, body: Bytes) -> Vec<AMQPFrame> {
    vec![
        ContentHeaderFrame {
            channel,
            class_id: frame::BASIC_CLASS,
            body_size: body.len() as u64,
            ..Default::default()
        }
        .frame(),
        ContentBodyFrame { channel, body }.frame(),
    ]
}

fn serve(mut stream: TcpStream) -> Broker {
    let mut broker = Broker::default();
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 16 * 1024];

    while !broker.closed {
        let n = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        buf.extend_from_slice(&chunk[..n]);

        while let Decoded::Frame(f, consumed) = decode_frame(&buf[..], 0).unwrap() {
            buf.advance(consumed);

            let mut out = BytesMut::new();

            for reply in broker.reply(&f) {
                encode_frame(&mut out, &reply).unwrap();
            }

            stream.write_all(&out).unwrap();
        }
    }

    broker
}

fn start_broker() -> (ConnectionParameters, JoinHandle<Broker>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();

        serve(stream)
    });

    let params = ConnectionParameters {
        host: "127.0.0.1".to_string(),
        port,
        heartbeat: 0,
        ..Default::default()
    };

    (params, handle)
}

fn publish_args(implementation: Impl) -> PublishArgs {
    PublishArgs {
        implementation,
        exchange: "perf".to_string(),
        msgs: 20,
        size: 1024,
        pubacks: true,
        mandatory: false,
        routing_key: "test".to_string(),
        pipelined: false,
    }
}

fn run_publish(args: PublishArgs) -> (anyhow::Result<()>, Recorder) {
    let (params, broker) = start_broker();
    let recorder = Recorder::new().unwrap();
    let mut harness = create(args.implementation, params);

    let result = harness.publish(&args, &recorder);
    broker.join().unwrap();

    (result, recorder)
}

#[test]
fn blocking_publish_waits_for_each_confirm() {
    let (result, recorder) = run_publish(publish_args(Impl::Blocking));

    assert!(result.is_ok(), "{:?}", result);

    let report = recorder.report("publish", "blocking");

    assert_eq!(report.messages, 20);
    assert_eq!(report.bytes, 20 * 1024);
    assert_eq!(report.confirms, 20);
    assert_eq!(report.latency.unwrap().samples, 20);
}

#[test]
fn blocking_pipelined_publish() {
    let args = PublishArgs {
        pipelined: true,
        ..publish_args(Impl::Blocking)
    };

    let (result, recorder) = run_publish(args);

    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(recorder.confirms(), 20);
}

#[test]
fn blocking_publish_without_confirms() {
    let args = PublishArgs {
        pubacks: false,
        ..publish_args(Impl::Blocking)
    };

    let (result, recorder) = run_publish(args);

    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(recorder.confirms(), 0);
    assert_eq!(recorder.report("publish", "blocking").messages, 20);
}

#[test]
fn select_publish_completes_on_last_ack() {
    let (result, recorder) = run_publish(publish_args(Impl::Select));

    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(recorder.confirms(), 20);
    assert_eq!(recorder.nacks(), 0);
}

#[test]
fn returned_message_fails_the_run() {
    for implementation in [Impl::Blocking, Impl::Select] {
        let args = PublishArgs {
            msgs: 3,
            mandatory: true,
            routing_key: "unroutable".to_string(),
            ..publish_args(implementation)
        };

        let (result, recorder) = run_publish(args);

        assert!(result.is_err());
        assert!(recorder.returns() > 0);
    }
}

#[test]
fn nacked_messages_fail_the_run_after_every_publish() {
    for pipelined in [false, true] {
        let args = PublishArgs {
            msgs: 3,
            pipelined,
            routing_key: "rejected".to_string(),
            ..publish_args(Impl::Blocking)
        };

        let (result, recorder) = run_publish(args);

        assert!(result.is_err());
        assert_eq!(recorder.nacks(), 3);
        assert_eq!(recorder.report("publish", "blocking").messages, 3);
    }
}

fn run_alt_pub_cons(implementation: Impl) -> (Recorder, Broker) {
    let (params, broker) = start_broker();
    let recorder = Recorder::new().unwrap();
    let mut harness = create(implementation, params);
    let args = AltPubConsArgs {
        implementation,
        msgs: 5,
        size: 100,
    };

    harness.alt_pub_cons(&args, &recorder).unwrap();

    (recorder, broker.join().unwrap())
}

#[test]
fn blocking_alt_pub_cons_acks_every_delivery() {
    let (recorder, broker) = run_alt_pub_cons(Impl::Blocking);
    let report = recorder.report("altpubcons", "blocking");

    assert_eq!(report.messages, 5);
    assert_eq!(report.received, 5);
    assert_eq!(broker.client_acks, vec![1, 2, 3, 4, 5]);
}

#[test]
fn select_alt_pub_cons_acks_every_delivery() {
    let (recorder, broker) = run_alt_pub_cons(Impl::Select);

    assert_eq!(recorder.report("altpubcons", "select").received, 5);
    assert_eq!(broker.client_acks, vec![1, 2, 3, 4, 5]);
}
