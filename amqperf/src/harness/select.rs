use std::time::Instant;

use amqperf_client::{Channel, Client, ConnectionParameters, ConsumerSignal, Message, QueueDeclareFlags};
use anyhow::{bail, ensure, Context, Result};
use log::{error, info, warn};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use super::{check_outcome, payload, Harness, DELIVERY_TIMEOUT};
use crate::cli::{AltPubConsArgs, PublishArgs};
use crate::metrics::Recorder;

/// Runs the event loop on a current thread runtime, the listeners report the end of the run.
pub(crate) struct SelectHarness {
    params: ConnectionParameters,
}

/// Sent by the listeners to the publisher task.
#[derive(Debug)]
enum Completion {
    Confirmed,
    Failed(String),
    ChannelClosed(u16, String),
}

impl SelectHarness {
    pub(crate) fn new(params: ConnectionParameters) -> Self {
        Self { params }
    }

    fn runtime() -> Result<Runtime> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

        Ok(runtime)
    }
}

async fn connect(params: &ConnectionParameters) -> Result<Client> {
    let client = amqperf_client::connect(params)
        .await
        .with_context(|| format!("Cannot connect to {}", params.address()))?;

    client
        .on_close(|e| info!("Select connection closed ({}): {}", e.code, e.text))
        .await?;

    info!("Opened connection to {}", params.address());

    Ok(client)
}

async fn listen(channel: &Channel, msgs: u64, recorder: &Recorder) -> Result<mpsc::UnboundedReceiver<Completion>> {
    let (tx, rx) = mpsc::unbounded_channel();

    let acks = recorder.clone();
    let ack_tx = tx.clone();
    let mut confirmed = 0u64;
    channel
        .on_ack(move |e| {
            acks.confirmed(e.latency);
            confirmed += 1;

            if confirmed == msgs {
                let _ = ack_tx.send(Completion::Confirmed);
            }
        })
        .await?;

    let nacks = recorder.clone();
    let nack_tx = tx.clone();
    channel
        .on_nack(move |e| {
            nacks.nacked();

            let _ = nack_tx.send(Completion::Failed(format!(
                "Message {} is nacked: {:?}",
                e.delivery_tag, e.cause
            )));
        })
        .await?;

    let returns = recorder.clone();
    let return_tx = tx.clone();
    channel
        .on_return(move |m| {
            returns.returned();

            let _ = return_tx.send(Completion::Failed(format!(
                "Message is returned ({}): {}",
                m.reply_code, m.reply_text
            )));
        })
        .await?;

    channel
        .on_close(move |e| {
            info!("Select channel closed ({}): {}", e.code, e.text);

            let _ = tx.send(Completion::ChannelClosed(e.code, e.text.clone()));
        })
        .await?;

    Ok(rx)
}

async fn publish(params: &ConnectionParameters, args: &PublishArgs, recorder: &Recorder) -> Result<()> {
    let client = connect(params).await?;
    let channel = client.channel().await?;

    info!("Opened channel {}", channel.channel);

    let mut completion = listen(&channel, args.msgs, recorder).await?;

    if args.pubacks {
        channel.enable_confirm().await?;

        info!("Enabled delivery confirmation");
    }

    let body = payload(args.size);

    recorder.start();

    for _ in 0..args.msgs {
        channel
            .publish(
                Message::new(body.clone()),
                &args.exchange,
                &args.routing_key,
                args.mandatory,
            )
            .await?;
        recorder.published(args.size);
    }

    info!("Published {} messages of size={}", args.msgs, args.size);

    if args.pubacks && args.msgs > 0 {
        match completion.recv().await {
            Some(Completion::Confirmed) => info!("All messages confirmed"),
            Some(Completion::Failed(reason)) => {
                error!("{}", reason);
                bail!(reason);
            }
            Some(Completion::ChannelClosed(code, text)) => bail!("Channel closed ({}): {}", code, text),
            None => bail!("Listeners are gone before every message is confirmed"),
        }
    }

    recorder.finish();

    channel.close().await?;
    client.close().await?;

    check_outcome(args, recorder)
}

async fn alt_pub_cons(params: &ConnectionParameters, args: &AltPubConsArgs, recorder: &Recorder) -> Result<()> {
    let client = connect(params).await?;
    let channel = client.channel().await?;
    let queue = channel
        .queue_declare("", Some(QueueDeclareFlags::EXCLUSIVE | QueueDeclareFlags::AUTO_DELETE))
        .await?;

    info!("Declared queue {}", queue.name);

    let mut handler = channel.consume(&queue.name, false).await?;
    let body = payload(args.size);

    recorder.start();

    for _ in 0..args.msgs {
        let sent = Instant::now();

        channel
            .publish(Message::new(body.clone()), "", &queue.name, false)
            .await?;
        recorder.published(args.size);

        let delivered = match handler.receive(DELIVERY_TIMEOUT).await {
            Some(ConsumerSignal::Delivered(dm)) => dm,
            Some(other) => bail!("Consumer stopped with {:?}", other),
            None => bail!("No delivery in {:?}", DELIVERY_TIMEOUT),
        };

        ensure!(
            delivered.message.body.len() == args.size,
            "Received {} bytes instead of {}",
            delivered.message.body.len(),
            args.size
        );

        handler.basic_ack(delivered.delivery_tag).await?;
        recorder.received(sent.elapsed());

        if !handler.signal_stream.is_empty() {
            warn!("More than one message is in flight");
        }
    }

    recorder.finish();

    info!("Published and consumed {} messages of size={}", args.msgs, args.size);

    handler.basic_cancel().await?;
    channel.close().await?;
    client.close().await?;

    Ok(())
}

impl Harness for SelectHarness {
    fn name(&self) -> &'static str {
        "select"
    }

    fn publish(&mut self, args: &PublishArgs, recorder: &Recorder) -> Result<()> {
        info!(
            "Select publish: exchange={:?}, msgs={}, size={}, pubacks={}",
            args.exchange, args.msgs, args.size, args.pubacks
        );

        Self::runtime()?.block_on(publish(&self.params, args, recorder))
    }

    fn alt_pub_cons(&mut self, args: &AltPubConsArgs, recorder: &Recorder) -> Result<()> {
        info!("Select altpubcons: msgs={}, size={}", args.msgs, args.size);

        Self::runtime()?.block_on(alt_pub_cons(&self.params, args, recorder))
    }
}
