use super::{AMQPFrame, Channel, FieldTable, MethodFrameArgs};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BasicConsumeFlags: u8 {
        const NO_LOCAL = 0b00000001;
        const NO_ACK = 0b00000010;
        const EXCLUSIVE = 0b00000100;
        const NO_WAIT = 0b00001000;
    }
}

impl Default for BasicConsumeFlags {
    fn default() -> Self {
        BasicConsumeFlags::empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicConsumeArgs {
    pub queue: String,
    pub consumer_tag: String,
    pub flags: BasicConsumeFlags,
    pub args: FieldTable,
}

impl BasicConsumeArgs {
    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    pub fn consumer_tag(mut self, consumer_tag: &str) -> Self {
        self.consumer_tag = consumer_tag.to_string();
        self
    }

    pub fn exclusive(mut self, mode: bool) -> Self {
        self.flags.set(BasicConsumeFlags::EXCLUSIVE, mode);
        self
    }

    pub fn no_ack(mut self, mode: bool) -> Self {
        self.flags.set(BasicConsumeFlags::NO_ACK, mode);
        self
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_CONSUME, MethodFrameArgs::BasicConsume(self))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicConsumeOkArgs {
    pub consumer_tag: String,
}

impl BasicConsumeOkArgs {
    pub fn new(consumer_tag: &str) -> Self {
        Self {
            consumer_tag: consumer_tag.to_string(),
        }
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_CONSUME_OK, MethodFrameArgs::BasicConsumeOk(self))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicCancelArgs {
    pub consumer_tag: String,
    pub no_wait: bool,
}

impl BasicCancelArgs {
    pub fn new(consumer_tag: &str) -> Self {
        Self {
            consumer_tag: consumer_tag.to_string(),
            no_wait: false,
        }
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_CANCEL, MethodFrameArgs::BasicCancel(self))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicCancelOkArgs {
    pub consumer_tag: String,
}

impl BasicCancelOkArgs {
    pub fn new(consumer_tag: &str) -> Self {
        Self {
            consumer_tag: consumer_tag.to_string(),
        }
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_CANCEL_OK, MethodFrameArgs::BasicCancelOk(self))
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BasicPublishFlags: u8 {
        const MANDATORY = 0b00000001;
        const IMMEDIATE = 0b00000010;
    }
}

impl Default for BasicPublishFlags {
    fn default() -> Self {
        BasicPublishFlags::empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicPublishArgs {
    pub exchange_name: String,
    pub routing_key: String,
    pub flags: BasicPublishFlags,
}

impl BasicPublishArgs {
    pub fn new(exchange_name: &str) -> Self {
        Self {
            exchange_name: exchange_name.to_string(),
            ..Default::default()
        }
    }

    pub fn routing_key(mut self, routing_key: &str) -> Self {
        self.routing_key = routing_key.to_string();
        self
    }

    pub fn mandatory(mut self, mode: bool) -> Self {
        self.flags.set(BasicPublishFlags::MANDATORY, mode);
        self
    }

    pub fn is_mandatory(&self) -> bool {
        self.flags.contains(BasicPublishFlags::MANDATORY)
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_PUBLISH, MethodFrameArgs::BasicPublish(self))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicReturnArgs {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange_name: String,
    pub routing_key: String,
}

impl BasicReturnArgs {
    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_RETURN, MethodFrameArgs::BasicReturn(self))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicDeliverArgs {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange_name: String,
    pub routing_key: String,
}

impl BasicDeliverArgs {
    pub fn new(consumer_tag: &str, delivery_tag: u64, exchange_name: &str) -> Self {
        Self {
            consumer_tag: consumer_tag.to_string(),
            delivery_tag,
            exchange_name: exchange_name.to_string(),
            ..Default::default()
        }
    }

    pub fn routing_key(mut self, routing_key: &str) -> Self {
        self.routing_key = routing_key.to_string();
        self
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_DELIVER, MethodFrameArgs::BasicDeliver(self))
    }
}

/// Ack travels both ways: the client acks deliveries, the broker acks publishes in confirm
/// mode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicAckArgs {
    pub delivery_tag: u64,
    pub multiple: bool,
}

impl BasicAckArgs {
    pub fn delivery_tag(mut self, delivery_tag: u64) -> Self {
        self.delivery_tag = delivery_tag;
        self
    }

    pub fn multiple(mut self, mode: bool) -> Self {
        self.multiple = mode;
        self
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_ACK, MethodFrameArgs::BasicAck(self))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicRejectArgs {
    pub delivery_tag: u64,
    pub requeue: bool,
}

impl BasicRejectArgs {
    pub fn delivery_tag(mut self, delivery_tag: u64) -> Self {
        self.delivery_tag = delivery_tag;
        self
    }

    pub fn requeue(mut self, mode: bool) -> Self {
        self.requeue = mode;
        self
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_REJECT, MethodFrameArgs::BasicReject(self))
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BasicNackFlags: u8 {
        const MULTIPLE = 0b00000001;
        const REQUEUE = 0b00000010;
    }
}

impl Default for BasicNackFlags {
    fn default() -> Self {
        BasicNackFlags::empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicNackArgs {
    pub delivery_tag: u64,
    pub flags: BasicNackFlags,
}

impl BasicNackArgs {
    pub fn delivery_tag(mut self, value: u64) -> Self {
        self.delivery_tag = value;
        self
    }

    pub fn multiple(mut self, value: bool) -> Self {
        self.flags.set(BasicNackFlags::MULTIPLE, value);
        self
    }

    pub fn requeue(mut self, value: bool) -> Self {
        self.flags.set(BasicNackFlags::REQUEUE, value);
        self
    }

    pub fn is_multiple(&self) -> bool {
        self.flags.contains(BasicNackFlags::MULTIPLE)
    }

    pub fn frame(self, channel: Channel) -> AMQPFrame {
        AMQPFrame::Method(channel, super::BASIC_NACK, MethodFrameArgs::BasicNack(self))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfirmSelectArgs {
    pub no_wait: bool,
}

pub fn basic_ack(channel: Channel, delivery_tag: u64, multiple: bool) -> AMQPFrame {
    BasicAckArgs::default()
        .delivery_tag(delivery_tag)
        .multiple(multiple)
        .frame(channel)
}

pub fn basic_nack(channel: Channel, delivery_tag: u64, multiple: bool, requeue: bool) -> AMQPFrame {
    BasicNackArgs::default()
        .delivery_tag(delivery_tag)
        .multiple(multiple)
        .requeue(requeue)
        .frame(channel)
}

pub fn confirm_select(channel: Channel) -> AMQPFrame {
    AMQPFrame::Method(
        channel,
        super::CONFIRM_SELECT,
        MethodFrameArgs::ConfirmSelect(ConfirmSelectArgs { no_wait: false }),
    )
}

pub fn confirm_select_ok(channel: Channel) -> AMQPFrame {
    AMQPFrame::Method(channel, super::CONFIRM_SELECT_OK, MethodFrameArgs::ConfirmSelectOk)
}
