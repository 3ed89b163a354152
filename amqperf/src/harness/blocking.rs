use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use amqperf_client::blocking::{self, Channel};
use amqperf_client::{ClientError, ConnectionParameters, ConsumerSignal, Message, QueueDeclareFlags};
use anyhow::{bail, ensure, Context, Result};
use log::{error, info, warn};

use super::{check_outcome, payload, Harness, DELIVERY_TIMEOUT};
use crate::cli::{AltPubConsArgs, PublishArgs};
use crate::metrics::Recorder;

pub(crate) struct BlockingHarness {
    params: ConnectionParameters,
}

impl BlockingHarness {
    pub(crate) fn new(params: ConnectionParameters) -> Self {
        Self { params }
    }

    fn connect(&self) -> Result<blocking::Connection> {
        let connection = blocking::connect(&self.params)
            .with_context(|| format!("Cannot connect to {}", self.params.address()))?;

        connection.on_close(|e| info!("Connection closed ({}): {}", e.code, e.text))?;

        info!("Opened connection to {}", self.params.address());

        Ok(connection)
    }
}

fn listen(channel: &Channel, recorder: &Recorder) -> Result<()> {
    let acks = recorder.clone();
    channel.on_ack(move |e| acks.confirmed(e.latency))?;

    let nacks = recorder.clone();
    channel.on_nack(move |e| {
        error!("Message {} is nacked: {:?}", e.delivery_tag, e.cause);
        nacks.nacked();
    })?;

    let returns = recorder.clone();
    channel.on_return(move |m| {
        error!("Message is returned ({}): {}", m.reply_code, m.reply_text);
        returns.returned();
    })?;

    channel.on_close(|e| info!("Channel {} closed ({}): {}", e.channel, e.code, e.text))?;

    Ok(())
}

/// A broker nack is already counted by the nack listener, the run goes on and the outcome
/// check fails it.
fn wait_for_confirms(channel: &Channel) -> Result<()> {
    match channel.wait_for_confirms() {
        Ok(()) => Ok(()),
        Err(ClientError::Nacked { delivery_tag, .. }) => {
            warn!("Confirm wait ended with nacked message {}", delivery_tag);

            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl Harness for BlockingHarness {
    fn name(&self) -> &'static str {
        "blocking"
    }

    fn publish(&mut self, args: &PublishArgs, recorder: &Recorder) -> Result<()> {
        info!(
            "Blocking publish: exchange={:?}, msgs={}, size={}, pubacks={}, pipelined={}",
            args.exchange, args.msgs, args.size, args.pubacks, args.pipelined
        );

        let connection = self.connect()?;
        let channel = connection.channel()?;

        info!("Opened channel {}", channel.id());

        listen(&channel, recorder)?;

        if args.pubacks {
            channel.enable_confirm()?;

            info!("Enabled delivery confirmation");
        }

        let body = payload(args.size);

        recorder.start();

        for _ in 0..args.msgs {
            channel.publish(
                Message::new(body.clone()),
                &args.exchange,
                &args.routing_key,
                args.mandatory,
            )?;
            recorder.published(args.size);

            if args.pubacks && !args.pipelined {
                wait_for_confirms(&channel)?;
            }
        }

        if args.pubacks && args.pipelined {
            wait_for_confirms(&channel)?;
        }

        recorder.finish();

        info!("Published {} messages of size={}", args.msgs, args.size);

        channel.close()?;
        connection.close()?;

        check_outcome(args, recorder)
    }

    fn alt_pub_cons(&mut self, args: &AltPubConsArgs, recorder: &Recorder) -> Result<()> {
        info!("Blocking altpubcons: msgs={}, size={}", args.msgs, args.size);

        let connection = self.connect()?;
        let channel = connection.channel()?;
        let queue = channel.queue_declare("", Some(QueueDeclareFlags::EXCLUSIVE | QueueDeclareFlags::AUTO_DELETE))?;

        info!("Declared queue {}", queue.name);

        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let sink = inbox.clone();
        let consumer_tag = channel.consume(&queue.name, false, move |signal| {
            sink.lock().unwrap().push_back(signal);
        })?;

        let body = payload(args.size);

        recorder.start();

        for _ in 0..args.msgs {
            let sent = Instant::now();

            channel.publish(Message::new(body.clone()), "", &queue.name, false)?;
            recorder.published(args.size);

            let signal = loop {
                if let Some(signal) = inbox.lock().unwrap().pop_front() {
                    break signal;
                }

                if sent.elapsed() > DELIVERY_TIMEOUT {
                    bail!("No delivery in {:?}", DELIVERY_TIMEOUT);
                }

                connection.read_frames(Some(Duration::from_secs(1)))?;
            };

            let delivered = match signal {
                ConsumerSignal::Delivered(dm) => dm,
                other => bail!("Consumer stopped with {:?}", other),
            };

            ensure!(
                delivered.message.body.len() == args.size,
                "Received {} bytes instead of {}",
                delivered.message.body.len(),
                args.size
            );

            channel.ack(delivered.delivery_tag)?;
            recorder.received(sent.elapsed());

            if !inbox.lock().unwrap().is_empty() {
                warn!("More than one message is in flight");
            }
        }

        recorder.finish();

        info!("Published and consumed {} messages of size={}", args.msgs, args.size);

        channel.cancel(&consumer_tag)?;
        channel.close()?;
        connection.close()?;

        Ok(())
    }
}
