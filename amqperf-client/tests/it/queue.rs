use std::time::Duration;

use anyhow::Result;
use amqperf_client::*;

use crate::helper;

#[tokio::test]
async fn consume_from_server_named_queue() -> Result<()> {
    let client = helper::connect().await?;
    let channel = client.channel().await?;

    let queue = channel
        .queue_declare("", Some(QueueDeclareFlags::EXCLUSIVE | QueueDeclareFlags::AUTO_DELETE))
        .await?;

    assert!(!queue.name.is_empty());

    let mut handler = channel.consume(&queue.name, false).await?;

    channel.publish(Message::from("hello"), "", &queue.name, false).await?;

    let signal = handler.receive(Duration::from_secs(1)).await.expect("No delivery");
    let message = crate::unwrap_delivered_message(signal);

    assert_eq!(&message.message.body[..], b"hello");
    assert_eq!(message.routing_key, queue.name);

    handler.basic_ack(message.delivery_tag).await?;
    handler.basic_cancel().await?;

    channel.close().await?;
    client.close().await?;

    Ok(())
}

#[test]
fn blocking_queue_lifecycle() -> Result<()> {
    let connection = helper::connect_blocking()?;
    let channel = connection.channel()?;

    channel.queue_declare("amqperf-lifecycle", None)?;
    channel.publish(Message::from("one"), "", "amqperf-lifecycle", false)?;

    assert_eq!(channel.queue_purge("amqperf-lifecycle")?, 1);
    assert_eq!(channel.queue_delete("amqperf-lifecycle", false, false)?, 0);

    channel.close()?;
    connection.close()?;

    Ok(())
}
