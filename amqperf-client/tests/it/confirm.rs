use std::sync::{Arc, Mutex};

use anyhow::Result;
use amqperf_client::*;

use crate::helper;

#[tokio::test]
async fn confirmed_publishes_are_all_acked() -> Result<()> {
    let client = helper::connect().await?;
    let channel = client.channel().await?;

    channel
        .exchange_declare("confirm-exchange", "direct", Some(ExchangeDeclareFlags::AUTO_DELETE))
        .await?;

    let acked = Arc::new(Mutex::new(0u64));
    let sink = acked.clone();

    channel
        .on_ack(move |e| {
            let mut acked = sink.lock().unwrap();

            // a multiple ack covers every publish up to the tag
            *acked = e.delivery_tag;
        })
        .await?;
    channel.enable_confirm().await?;

    for _ in 0..3 {
        channel
            .publish(Message::new(vec![0u8; 1024]), "confirm-exchange", "test", false)
            .await?;
    }

    channel.wait_for_confirms().await?;

    assert_eq!(*acked.lock().unwrap(), 3);

    channel.exchange_delete("confirm-exchange", false).await?;
    channel.close().await?;
    client.close().await?;

    Ok(())
}

#[test]
fn blocking_confirms_with_large_bodies() -> Result<()> {
    let connection = helper::connect_blocking()?;
    let channel = connection.channel()?;
    let acked = Arc::new(Mutex::new(vec![]));
    let sink = acked.clone();

    channel.on_ack(move |e| sink.lock().unwrap().push(e.delivery_tag))?;
    channel.enable_confirm()?;

    let size = connection.frame_max() as usize * 2;

    for _ in 0..5 {
        channel.publish(Message::new(vec![1u8; size]), "", "no-such-queue", false)?;
    }

    channel.wait_for_confirms()?;

    assert_eq!(acked.lock().unwrap().last(), Some(&5));
    assert_eq!(channel.pending_confirms(), 0);

    channel.close()?;
    connection.close()?;

    Ok(())
}
