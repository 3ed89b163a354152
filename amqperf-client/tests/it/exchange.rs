use std::sync::{Arc, Mutex};

use anyhow::Result;
use amqperf_client::*;

use crate::helper;

#[tokio::test]
async fn unroutable_mandatory_message_is_returned() -> Result<()> {
    let client = helper::connect().await?;
    let channel = client.channel().await?;

    channel
        .exchange_declare("return-exchange", "direct", Some(ExchangeDeclareFlags::AUTO_DELETE))
        .await?;

    let returned = Arc::new(Mutex::new(vec![]));
    let sink = returned.clone();

    channel
        .on_return(move |m| sink.lock().unwrap().push((m.reply_code, m.routing_key.clone())))
        .await?;
    channel.enable_confirm().await?;
    channel
        .publish(Message::from("lost"), "return-exchange", "nobody", true)
        .await?;
    channel.wait_for_confirms().await?;

    assert_eq!(*returned.lock().unwrap(), vec![(312, "nobody".to_string())]);

    channel.exchange_delete("return-exchange", false).await?;
    channel.close().await?;
    client.close().await?;

    Ok(())
}

#[tokio::test]
async fn publish_to_missing_exchange_closes_the_channel() -> Result<()> {
    let client = helper::connect().await?;
    let channel = client.channel().await?;

    channel.enable_confirm().await?;
    channel
        .publish(Message::from("x"), "amqperf-missing-exchange", "", false)
        .await?;

    let result = channel.wait_for_confirms().await;

    assert!(matches!(result, Err(ClientError::ChannelClosed { code: 404, .. })));

    client.close().await?;

    Ok(())
}
