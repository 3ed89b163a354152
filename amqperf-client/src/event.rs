//! Events the channels report to the application.
//!
//! Listeners are called synchronously from the frame dispatch, in the blocking model from
//! `read_frames`, in the event loop model from the socket task. A listener must not block.

use std::time::Duration;

use crate::message::{DeliveredMessage, ReturnedMessage};
use crate::model::{ChannelNumber, ClassMethod};

/// A publish confirmed by the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct AckEvent {
    pub channel: ChannelNumber,
    pub delivery_tag: u64,
    /// The broker acked with `multiple` set, sibling events come from the same frame.
    pub multiple: bool,
    /// Time between the publish and the confirm.
    pub latency: Duration,
}

/// Why a publish won't be confirmed.
#[derive(Clone, Debug, PartialEq)]
pub enum NackCause {
    /// The broker sent `basic.nack`.
    Broker,
    ChannelClosed { code: u16, text: String },
    ConnectionReset,
    ConnectionClosed { code: u16, text: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct NackEvent {
    pub channel: ChannelNumber,
    pub delivery_tag: u64,
    pub multiple: bool,
    pub latency: Duration,
    pub cause: NackCause,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseInitiator {
    Local,
    Remote,
}

/// Closing of a channel or of the connection (channel 0).
#[derive(Clone, Debug, PartialEq)]
pub struct CloseEvent {
    pub channel: ChannelNumber,
    pub code: u16,
    pub text: String,
    pub class_method: ClassMethod,
    pub initiator: CloseInitiator,
}

/// A signal arriving from the server during consuming a queue.
#[derive(Debug)]
pub enum ConsumerSignal {
    Delivered(Box<DeliveredMessage>),
    Cancelled,
    ChannelClosed {
        reply_code: u16,
        reply_text: String,
        class_method: u32,
    },
    ConnectionClosed {
        reply_code: u16,
        reply_text: String,
        class_method: u32,
    },
}

pub type AckListener = Box<dyn FnMut(&AckEvent) + Send>;
pub type NackListener = Box<dyn FnMut(&NackEvent) + Send>;
pub type ReturnListener = Box<dyn FnMut(&ReturnedMessage) + Send>;
pub type CloseListener = Box<dyn FnMut(&CloseEvent) + Send>;
pub type ConsumerFn = Box<dyn FnMut(ConsumerSignal) + Send>;

/// Registering a listener replaces the previous one of the same kind.
pub enum Listener {
    Ack(AckListener),
    Nack(NackListener),
    Return(ReturnListener),
    Close(CloseListener),
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Listener::Ack(_) => write!(f, "Listener::Ack"),
            Listener::Nack(_) => write!(f, "Listener::Nack"),
            Listener::Return(_) => write!(f, "Listener::Return"),
            Listener::Close(_) => write!(f, "Listener::Close"),
        }
    }
}
