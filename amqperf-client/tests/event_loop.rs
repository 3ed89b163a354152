mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use amqperf_client::{Client, ClientError, CloseInitiator, ConsumerSignal, Message, NackCause, QueueDeclareFlags};
use amqperf_codec::codec::{AMQPCodec, Frame};
use amqperf_codec::frame::{self, AMQPFrame, BasicDeliverArgs, ContentBodyFrame, ContentHeaderFrame, MethodFrameArgs};
use bytes::Bytes;
use common::{params, standard_reply};
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

/// Runs a broker on the other end of an in-memory stream. The responder returns `None` to drop
/// the connection.
fn start_broker<R>(mut responder: R) -> DuplexStream
where
    R: FnMut(&AMQPFrame) -> Option<Vec<AMQPFrame>> + Send + 'static,
{
    let (client, server) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let mut framed = Framed::new(server, AMQPCodec::default());

        while let Some(Ok(frame)) = framed.next().await {
            match responder(&frame) {
                Some(replies) if replies.is_empty() => {}
                Some(replies) => {
                    if framed.send(Frame::Frames(replies)).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    });

    client
}

async fn client_with<R>(responder: R) -> anyhow::Result<Client>
where
    R: FnMut(&AMQPFrame) -> Option<Vec<AMQPFrame>> + Send + 'static,
{
    let stream = start_broker(responder);

    Ok(Client::with_stream(stream, params()).await?)
}

#[tokio::test]
async fn publish_three_and_get_one_multiple_ack() -> anyhow::Result<()> {
    let mut bodies = 0;
    let client = client_with(move |f| match f {
        AMQPFrame::ContentBody(b) => {
            bodies += 1;

            if bodies == 3 {
                Some(vec![frame::basic_ack(b.channel, 3, true)])
            } else {
                Some(vec![])
            }
        }
        other => Some(standard_reply(other)),
    })
    .await?;

    let channel = client.channel().await?;
    let acked = Arc::new(Mutex::new(vec![]));
    let sink = acked.clone();

    channel
        .on_ack(move |e| sink.lock().unwrap().push((e.delivery_tag, e.multiple)))
        .await?;
    channel.enable_confirm().await?;

    for expected in 1..=3 {
        let seq = channel
            .publish(Message::new(vec![0u8; 1024]), "perf", "test", false)
            .await?;

        assert_eq!(seq, Some(expected));
    }

    channel.wait_for_confirms().await?;

    assert_eq!(*acked.lock().unwrap(), vec![(1, true), (2, true), (3, true)]);

    channel.close().await?;
    client.close().await?;

    Ok(())
}

#[tokio::test]
async fn closed_channel_number_is_reused() -> anyhow::Result<()> {
    let client = client_with(|f| Some(standard_reply(f))).await?;

    let first = client.channel().await?;
    let second = client.channel().await?;

    assert_eq!(first.channel, 1);
    assert_eq!(second.channel, 2);

    first.close().await?;

    let third = client.channel().await?;
    assert_eq!(third.channel, 1);

    client.close().await?;

    Ok(())
}

#[tokio::test]
async fn dropped_connection_fails_pending_confirms() -> anyhow::Result<()> {
    let mut bodies = 0;
    let client = client_with(move |f| match f {
        AMQPFrame::ContentBody(_) => {
            bodies += 1;

            if bodies == 2 {
                None
            } else {
                Some(vec![])
            }
        }
        other => Some(standard_reply(other)),
    })
    .await?;

    let channel = client.channel().await?;
    let nacked = Arc::new(Mutex::new(vec![]));
    let sink = nacked.clone();

    channel
        .on_nack(move |e| sink.lock().unwrap().push((e.delivery_tag, e.cause.clone())))
        .await?;
    channel.enable_confirm().await?;
    channel.publish(Message::from("one"), "perf", "test", false).await?;
    channel.publish(Message::from("two"), "perf", "test", false).await?;

    let result = channel.wait_for_confirms().await;
    assert!(matches!(result, Err(ClientError::ConnectionReset)));

    assert_eq!(
        *nacked.lock().unwrap(),
        vec![(1, NackCause::ConnectionReset), (2, NackCause::ConnectionReset)]
    );

    let result = channel.publish(Message::from("three"), "perf", "test", false).await;
    assert!(result.is_err());

    Ok(())
}

#[tokio::test]
async fn ack_of_unknown_tag_closes_the_channel() -> anyhow::Result<()> {
    let client = client_with(|f| match f {
        AMQPFrame::ContentBody(b) => Some(vec![frame::basic_ack(b.channel, 9, false)]),
        other => Some(standard_reply(other)),
    })
    .await?;

    let channel = client.channel().await?;
    let closes = Arc::new(Mutex::new(vec![]));
    let sink = closes.clone();

    channel.on_close(move |e| sink.lock().unwrap().push(e.clone())).await?;
    channel.enable_confirm().await?;
    channel.publish(Message::from("one"), "perf", "test", false).await?;

    let result = channel.wait_for_confirms().await;
    assert!(matches!(result, Err(ClientError::UnexpectedAck { delivery_tag: 9, .. })));

    // the close-ok of the broker completes the close
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let closes = closes.lock().unwrap();

        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].code, 406);
        assert_eq!(closes[0].class_method, frame::BASIC_ACK);
        assert_eq!(closes[0].initiator, CloseInitiator::Local);
    }

    // the connection survives
    let other = client.channel().await?;
    other.close().await?;
    client.close().await?;

    Ok(())
}

#[tokio::test]
async fn consume_exclusive_queue_and_ack() -> anyhow::Result<()> {
    let acks = Arc::new(Mutex::new(vec![]));
    let acks_seen = acks.clone();

    let client = client_with(move |f| match f {
        AMQPFrame::Method(ch, _, MethodFrameArgs::BasicConsume(args)) => Some(vec![
            frame::BasicConsumeOkArgs::new(&args.consumer_tag).frame(*ch),
            BasicDeliverArgs::new(&args.consumer_tag, 1, "")
                .routing_key(&args.queue)
                .frame(*ch),
            ContentHeaderFrame {
                channel: *ch,
                class_id: frame::BASIC_CLASS,
                body_size: 4,
                ..Default::default()
            }
            .frame(),
            ContentBodyFrame {
                channel: *ch,
                body: Bytes::from_static(b"ping"),
            }
            .frame(),
        ]),
        AMQPFrame::Method(_, _, MethodFrameArgs::BasicAck(args)) => {
            acks_seen.lock().unwrap().push(args.delivery_tag);

            Some(vec![])
        }
        other => Some(standard_reply(other)),
    })
    .await?;

    let channel = client.channel().await?;
    let queue = channel
        .queue_declare("", Some(QueueDeclareFlags::EXCLUSIVE | QueueDeclareFlags::AUTO_DELETE))
        .await?;

    let mut handler = channel.consume(&queue.name, false).await?;

    match handler.receive(Duration::from_secs(1)).await {
        Some(ConsumerSignal::Delivered(dm)) => {
            assert_eq!(dm.consumer_tag, handler.consumer_tag);
            assert_eq!(&dm.message.body[..], b"ping");

            handler.basic_ack(dm.delivery_tag).await?;
        }
        other => panic!("Unexpected signal {:?}", other),
    }

    // the ack is only queued, a round trip makes sure the broker has read it
    assert_eq!(channel.queue_purge(&queue.name).await?, 0);

    assert_eq!(*acks.lock().unwrap(), vec![1]);

    client.close().await?;

    Ok(())
}

#[tokio::test]
async fn closing_the_channel_fails_the_unanswered_declare() -> anyhow::Result<()> {
    let client = client_with(|f| match f {
        AMQPFrame::Method(_, _, MethodFrameArgs::QueueDeclare(_)) => Some(vec![]),
        other => Some(standard_reply(other)),
    })
    .await?;

    let channel = client.channel().await?;
    let declaring = channel.clone();
    let declare = tokio::spawn(async move { declaring.queue_declare("stuck", None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;

    channel.close().await?;

    let result = declare.await?;
    assert!(matches!(result, Err(ClientError::ChannelClosed { code: 200, .. })));

    client.close().await?;

    Ok(())
}
