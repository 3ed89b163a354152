//! AMQP 0-9-1 publishing client.
//!
//! The connection and channel state machines don't do any i/o, they are driven either by the
//! blocking client in [`blocking`] or by a tokio task ([`connect`], [`Client`], [`Channel`]).
//! Publisher confirms are tracked per channel, acks and nacks are reported to listeners with
//! the latency of the publish.

pub mod blocking;

mod channel_api;
pub use channel_api::Channel;

mod client_api;
pub use client_api::{connect, Client};

pub mod config;
pub use config::ConnectionParameters;

pub mod confirm;

mod consumer;
pub use consumer::ConsumerHandler;

mod error;
pub use error::{ClientError, Result};

pub mod event;
pub use event::{AckEvent, CloseEvent, CloseInitiator, ConsumerSignal, NackCause, NackEvent};

mod message;
pub use message::{DeliveredMessage, Message, MessageProperties, ReturnedMessage};

pub mod model;
pub use model::{ChannelNumber, DeclaredQueue};

mod processor;

pub mod state;

pub mod transport;

pub use amqperf_codec::frame::{ExchangeDeclareFlags, QueueDeclareFlags};
