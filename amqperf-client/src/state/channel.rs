use std::collections::HashMap;
use std::time::Instant;

use amqperf_codec::frame::{
    self, AMQPFrame, BasicDeliverArgs, BasicPublishArgs, BasicReturnArgs, ContentBodyFrame, ContentHeaderFrame,
    MethodFrameArgs,
};
use bytes::BytesMut;
use log::{debug, error, warn};

use crate::confirm::{ConfirmTracker, UnexpectedAck};
use crate::event::{
    AckEvent, AckListener, CloseEvent, CloseListener, ConsumerFn, ConsumerSignal, Listener, NackCause, NackEvent,
    NackListener, ReturnListener,
};
use crate::message::{self, DeliveredMessage, Message, MessageProperties, ReturnedMessage};
use crate::model::ChannelNumber;

use super::CloseReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChannelPhase {
    Opening,
    Open,
    /// Close is sent, waiting for close-ok. Every frame but close and close-ok is dropped.
    Closing,
}

/// Content frames must follow a deliver or a return, the header first.
#[derive(Debug)]
pub(crate) struct ContentError(pub(crate) &'static str);

enum Incoming {
    Deliver(BasicDeliverArgs),
    Return(BasicReturnArgs),
}

struct Assembly {
    incoming: Incoming,
    header: Option<ContentHeaderFrame>,
    body: BytesMut,
}

/// State of one channel, owned by the connection.
pub(crate) struct ChannelState {
    pub(crate) id: ChannelNumber,
    pub(crate) phase: ChannelPhase,
    pub(crate) confirm: bool,
    pub(crate) tracker: ConfirmTracker,
    /// Set when the channel started closing, the reason the close listener gets.
    pub(crate) closing: Option<CloseReason>,
    /// First publish the broker nacked since the last confirm wait finished.
    pub(crate) nacked: Option<u64>,
    consumers: HashMap<String, ConsumerFn>,
    ack_listener: Option<AckListener>,
    nack_listener: Option<NackListener>,
    return_listener: Option<ReturnListener>,
    close_listener: Option<CloseListener>,
    content: Option<Assembly>,
}

impl std::fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelState")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("confirm", &self.confirm)
            .field("pending", &self.tracker.len())
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

impl ChannelState {
    pub(crate) fn new(id: ChannelNumber) -> Self {
        Self {
            id,
            phase: ChannelPhase::Opening,
            confirm: false,
            tracker: ConfirmTracker::new(),
            closing: None,
            nacked: None,
            consumers: HashMap::new(),
            ack_listener: None,
            nack_listener: None,
            return_listener: None,
            close_listener: None,
            content: None,
        }
    }

    pub(crate) fn listen(&mut self, listener: Listener) {
        match listener {
            Listener::Ack(l) => self.ack_listener = Some(l),
            Listener::Nack(l) => self.nack_listener = Some(l),
            Listener::Return(l) => self.return_listener = Some(l),
            Listener::Close(l) => self.close_listener = Some(l),
        }
    }

    pub(crate) fn enable_confirms(&mut self) {
        if !self.confirm {
            self.confirm = true;
            self.tracker = ConfirmTracker::new();
        }
    }

    /// Queue the publish frames. In confirm mode the publish is recorded before the frames go
    /// out, so an ack can never precede its pending entry.
    pub(crate) fn publish(
        &mut self,
        message: &Message,
        args: BasicPublishArgs,
        frame_max: u32,
        out: &mut Vec<AMQPFrame>,
    ) -> Option<u64> {
        let seq = if self.confirm {
            Some(self.tracker.record(Instant::now()))
        } else {
            None
        };

        out.push(args.frame(self.id));
        out.extend(message::to_content_frames(self.id, message, frame_max));

        seq
    }

    pub(crate) fn add_consumer(&mut self, consumer_tag: &str, handler: ConsumerFn) {
        self.consumers.insert(consumer_tag.to_string(), handler);
    }

    pub(crate) fn cancel_consumer(&mut self, consumer_tag: &str) {
        match self.consumers.remove(consumer_tag) {
            Some(mut handler) => handler(ConsumerSignal::Cancelled),
            None => warn!("Channel {} has no consumer {}", self.id, consumer_tag),
        }
    }

    /// Broker confirms of publishes, acks with `nack == false`.
    pub(crate) fn handle_confirm(&mut self, delivery_tag: u64, multiple: bool, nack: bool) -> Result<(), UnexpectedAck> {
        if !self.confirm {
            return Err(UnexpectedAck(delivery_tag));
        }

        let resolved = self.tracker.resolve(delivery_tag, multiple)?;
        let now = Instant::now();

        for p in resolved {
            let latency = now.saturating_duration_since(p.enqueued_at);

            if nack {
                let event = NackEvent {
                    channel: self.id,
                    delivery_tag: p.seq,
                    multiple,
                    latency,
                    cause: NackCause::Broker,
                };

                if self.nacked.is_none() {
                    self.nacked = Some(p.seq);
                }

                match self.nack_listener.as_mut() {
                    Some(l) => l(&event),
                    None => error!("Broker nacked publish {} on channel {} without nack listener", p.seq, self.id),
                }
            } else {
                let event = AckEvent {
                    channel: self.id,
                    delivery_tag: p.seq,
                    multiple,
                    latency,
                };

                if let Some(l) = self.ack_listener.as_mut() {
                    l(&event);
                }
            }
        }

        Ok(())
    }

    /// Every unresolved publish is nacked with the cause.
    pub(crate) fn nack_pending(&mut self, cause: NackCause) {
        let now = Instant::now();

        for p in self.tracker.drain() {
            let event = NackEvent {
                channel: self.id,
                delivery_tag: p.seq,
                multiple: false,
                latency: now.saturating_duration_since(p.enqueued_at),
                cause: cause.clone(),
            };

            match self.nack_listener.as_mut() {
                Some(l) => l(&event),
                None => error!(
                    "Publish {} on channel {} is nacked without nack listener: {:?}",
                    p.seq, self.id, event.cause
                ),
            }
        }
    }

    /// Consumers are told the channel or the connection is gone, and they are dropped.
    pub(crate) fn signal_consumers<F>(&mut self, signal: F)
    where
        F: Fn() -> ConsumerSignal,
    {
        for (_, mut handler) in self.consumers.drain() {
            handler(signal());
        }
    }

    pub(crate) fn fire_close(&mut self, event: &CloseEvent) {
        if let Some(l) = self.close_listener.as_mut() {
            l(event);
        }
    }

    pub(crate) fn start_content(&mut self, frame: MethodFrameArgs) -> Result<(), ContentError> {
        if self.content.is_some() {
            return Err(ContentError("method frame arrived in the middle of a content"));
        }

        let incoming = match frame {
            MethodFrameArgs::BasicDeliver(args) => Incoming::Deliver(args),
            MethodFrameArgs::BasicReturn(args) => Incoming::Return(args),
            _ => return Err(ContentError("only deliver and return carry content")),
        };

        self.content = Some(Assembly {
            incoming,
            header: None,
            body: BytesMut::new(),
        });

        Ok(())
    }

    pub(crate) fn content_header(&mut self, header: ContentHeaderFrame) -> Result<(), ContentError> {
        let complete = match self.content.as_mut() {
            Some(assembly) if assembly.header.is_none() => {
                let complete = header.body_size == 0;

                assembly.body.reserve(header.body_size as usize);
                assembly.header = Some(header);

                complete
            }
            Some(_) => return Err(ContentError("second content header")),
            None => return Err(ContentError("content header without deliver or return")),
        };

        if complete {
            self.finish_content();
        }

        Ok(())
    }

    pub(crate) fn content_body(&mut self, body: ContentBodyFrame) -> Result<(), ContentError> {
        let complete = match self.content.as_mut() {
            Some(Assembly {
                header: Some(header),
                body: buf,
                ..
            }) => {
                buf.extend_from_slice(&body.body);

                let size = buf.len() as u64;
                if size > header.body_size {
                    return Err(ContentError("content body is longer than the header says"));
                }

                size == header.body_size
            }
            Some(_) => return Err(ContentError("content body before content header")),
            None => return Err(ContentError("content body without deliver or return")),
        };

        if complete {
            self.finish_content();
        }

        Ok(())
    }

    fn finish_content(&mut self) {
        let Some(assembly) = self.content.take() else {
            return;
        };

        let properties = assembly.header.map(MessageProperties::from).unwrap_or_default();
        let message = Message {
            body: assembly.body.freeze(),
            properties,
        };

        match assembly.incoming {
            Incoming::Deliver(args) => {
                let dm = DeliveredMessage {
                    message,
                    channel: self.id,
                    consumer_tag: args.consumer_tag,
                    delivery_tag: args.delivery_tag,
                    redelivered: args.redelivered,
                    exchange: args.exchange_name,
                    routing_key: args.routing_key,
                };

                match self.consumers.get_mut(&dm.consumer_tag) {
                    Some(handler) => handler(ConsumerSignal::Delivered(Box::new(dm))),
                    None => warn!(
                        "Delivery {} for unknown consumer {} on channel {}",
                        dm.delivery_tag, dm.consumer_tag, self.id
                    ),
                }
            }
            Incoming::Return(args) => {
                let rm = ReturnedMessage {
                    message,
                    channel: self.id,
                    reply_code: args.reply_code,
                    reply_text: args.reply_text,
                    exchange: args.exchange_name,
                    routing_key: args.routing_key,
                };

                debug!("Message returned {} {} on channel {}", rm.reply_code, rm.reply_text, self.id);

                match self.return_listener.as_mut() {
                    Some(l) => l(&rm),
                    None => warn!("Returned message on channel {} without return listener", self.id),
                }
            }
        }
    }

    pub(crate) fn close_frame(&self, reason: &CloseReason) -> AMQPFrame {
        frame::channel_close(self.id, reason.code, &reason.text, reason.class_method)
    }
}
