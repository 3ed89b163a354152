use amqperf_codec::frame::{
    BasicConsumeArgs, BasicPublishArgs, ExchangeDeclareArgs, ExchangeDeclareFlags, ExchangeDeleteArgs,
    QueueBindArgs, QueueDeclareArgs, QueueDeclareFlags, QueueDeleteArgs, QueuePurgeArgs, QueueUnbindArgs,
};
use log::debug;
use tokio::sync::mpsc;

use crate::consumer::ConsumerHandler;
use crate::error::Result;
use crate::event::{AckEvent, CloseEvent, ConsumerSignal, Listener, NackEvent};
use crate::message::{Message, ReturnedMessage};
use crate::model::{ChannelNumber, DeclaredQueue};
use crate::processor::{self, ClientRequestSink};
use crate::state::Command;

/// A channel of the event loop client.
///
/// Cloning the handle doesn't open a new channel, the clones talk to the same one.
#[derive(Clone)]
pub struct Channel {
    pub channel: ChannelNumber,
    sink: ClientRequestSink,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("channel", &self.channel).finish()
    }
}

impl Channel {
    pub(crate) fn new(channel: ChannelNumber, sink: ClientRequestSink) -> Channel {
        Channel { channel, sink }
    }

    /// Declare exchange.
    pub async fn exchange_declare(
        &self,
        exchange_name: &str,
        exchange_type: &str,
        flags: Option<ExchangeDeclareFlags>,
    ) -> Result<()> {
        let mut args = ExchangeDeclareArgs::default()
            .exchange_name(exchange_name)
            .exchange_type(exchange_type);
        args.flags = flags.unwrap_or_default();

        processor::call(&self.sink, Command::ExchangeDeclare(self.channel, args))
            .await?
            .into_done()
    }

    /// Delete exchange.
    pub async fn exchange_delete(&self, exchange_name: &str, if_unused: bool) -> Result<()> {
        let args = ExchangeDeleteArgs::default()
            .exchange_name(exchange_name)
            .if_unused(if_unused);

        processor::call(&self.sink, Command::ExchangeDelete(self.channel, args))
            .await?
            .into_done()
    }

    /// Declare queue, with empty name the broker generates one.
    pub async fn queue_declare(&self, queue_name: &str, flags: Option<QueueDeclareFlags>) -> Result<DeclaredQueue> {
        let mut args = QueueDeclareArgs::default().name(queue_name);
        args.flags = flags.unwrap_or_default();

        processor::call(&self.sink, Command::QueueDeclare(self.channel, args))
            .await?
            .into_queue()
    }

    /// Bind queue to exchange.
    pub async fn queue_bind(&self, queue_name: &str, exchange_name: &str, routing_key: &str) -> Result<()> {
        let args = QueueBindArgs::new(queue_name, exchange_name).routing_key(routing_key);

        processor::call(&self.sink, Command::QueueBind(self.channel, args))
            .await?
            .into_done()
    }

    pub async fn queue_unbind(&self, queue_name: &str, exchange_name: &str, routing_key: &str) -> Result<()> {
        let args = QueueUnbindArgs::new(queue_name, exchange_name).routing_key(routing_key);

        processor::call(&self.sink, Command::QueueUnbind(self.channel, args))
            .await?
            .into_done()
    }

    pub async fn queue_purge(&self, queue_name: &str) -> Result<u32> {
        let args = QueuePurgeArgs::default().queue_name(queue_name);

        processor::call(&self.sink, Command::QueuePurge(self.channel, args))
            .await?
            .into_message_count()
    }

    pub async fn queue_delete(&self, queue_name: &str, if_unused: bool, if_empty: bool) -> Result<u32> {
        let args = QueueDeleteArgs::default()
            .queue_name(queue_name)
            .if_unused(if_unused)
            .if_empty(if_empty);

        processor::call(&self.sink, Command::QueueDelete(self.channel, args))
            .await?
            .into_message_count()
    }

    pub async fn enable_confirm(&self) -> Result<()> {
        processor::call(&self.sink, Command::ConfirmSelect(self.channel))
            .await?
            .into_done()
    }

    /// Publish a message. Returns when the frames are queued to the socket, with the sequence
    /// number in confirm mode.
    pub async fn publish(
        &self,
        message: Message,
        exchange_name: &str,
        routing_key: &str,
        mandatory: bool,
    ) -> Result<Option<u64>> {
        let args = BasicPublishArgs::new(exchange_name)
            .routing_key(routing_key)
            .mandatory(mandatory);

        processor::call(&self.sink, Command::Publish(self.channel, message, args))
            .await?
            .into_sequence()
    }

    /// Start consuming a queue, the signals arrive in the returned handler.
    pub async fn consume(&self, queue_name: &str, no_ack: bool) -> Result<ConsumerHandler> {
        let (signal_sink, signal_stream) = mpsc::unbounded_channel::<ConsumerSignal>();
        let channel = self.channel;

        let handler = Box::new(move |signal: ConsumerSignal| {
            if signal_sink.send(signal).is_err() {
                debug!("Consumer on channel {} is dropped", channel);
            }
        });

        let args = BasicConsumeArgs::default().queue(queue_name).no_ack(no_ack);
        let consumer_tag = processor::call(&self.sink, Command::Consume(self.channel, args, handler))
            .await?
            .into_consumer_tag()?;

        Ok(ConsumerHandler {
            channel: self.channel,
            consumer_tag,
            client_sink: self.sink.clone(),
            signal_stream,
        })
    }

    pub async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        processor::call(&self.sink, Command::Cancel(self.channel, consumer_tag.to_string()))
            .await?
            .into_done()
    }

    pub async fn on_ack<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&AckEvent) + Send + 'static,
    {
        self.listen(Listener::Ack(Box::new(listener))).await
    }

    pub async fn on_nack<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&NackEvent) + Send + 'static,
    {
        self.listen(Listener::Nack(Box::new(listener))).await
    }

    pub async fn on_return<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&ReturnedMessage) + Send + 'static,
    {
        self.listen(Listener::Return(Box::new(listener))).await
    }

    pub async fn on_close<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&CloseEvent) + Send + 'static,
    {
        self.listen(Listener::Close(Box::new(listener))).await
    }

    async fn listen(&self, listener: Listener) -> Result<()> {
        processor::call(&self.sink, Command::Listen(self.channel, listener))
            .await?
            .into_done()
    }

    /// Wait until every publish is acked or nacked. Fails if the channel closes before.
    pub async fn wait_for_confirms(&self) -> Result<()> {
        processor::call(&self.sink, Command::WaitForConfirms(self.channel))
            .await?
            .into_done()
    }

    pub async fn close(&self) -> Result<()> {
        processor::call(&self.sink, Command::CloseChannel(self.channel))
            .await?
            .into_done()
    }
}
