use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::event::ConsumerSignal;
use crate::model::ChannelNumber;
use crate::processor::{self, ClientRequestSink};
use crate::state::Command;

/// Consumer API for `Basic.Consume`.
///
/// `ConsumerHandler` can be get by invoking [`crate::Channel::consume`].
pub struct ConsumerHandler {
    /// The channel number we are consuming messages.
    pub channel: ChannelNumber,
    /// Identifier of the consumer in server.
    pub consumer_tag: String,
    pub(crate) client_sink: ClientRequestSink,
    /// From this signal stream the consumer gets the messages as [`ConsumerSignal`] values and can
    /// handle them by acking messages or handling channel or connection close events.
    pub signal_stream: mpsc::UnboundedReceiver<ConsumerSignal>,
}

/// After consuming started with `ConsumerHandler` one can ack, nack or reject messages.
impl ConsumerHandler {
    /// Next signal, `None` if nothing arrived in `timeout` or the consumer is gone.
    pub async fn receive(&mut self, timeout: Duration) -> Option<ConsumerSignal> {
        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);

        tokio::select! {
            signal = self.signal_stream.recv() => {
                signal
            }
            _ = &mut sleep => {
                None
            }
        }
    }

    pub async fn basic_ack(&self, delivery_tag: u64) -> Result<()> {
        processor::call(&self.client_sink, Command::Ack(self.channel, delivery_tag, false))
            .await?
            .into_done()
    }

    pub async fn basic_nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        processor::call(
            &self.client_sink,
            Command::Nack(self.channel, delivery_tag, multiple, requeue),
        )
        .await?
        .into_done()
    }

    pub async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        processor::call(&self.client_sink, Command::Reject(self.channel, delivery_tag, requeue))
            .await?
            .into_done()
    }

    pub async fn basic_cancel(self) -> Result<()> {
        processor::call(
            &self.client_sink,
            Command::Cancel(self.channel, self.consumer_tag.clone()),
        )
        .await?
        .into_done()
    }
}
