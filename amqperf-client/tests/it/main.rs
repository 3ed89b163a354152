//! Tests against a running broker, enabled with the `integration-tests` feature.
#![cfg(feature = "integration-tests")]

mod confirm;
mod exchange;
mod helper;
mod queue;

use amqperf_client::*;

pub fn unwrap_delivered_message(signal: ConsumerSignal) -> DeliveredMessage {
    match signal {
        ConsumerSignal::Delivered(msg) => *msg,
        other => panic!("{other:?} is not a Deliver signal"),
    }
}
