//! One harness per concurrency model of the client, chosen with `--impl`.

mod blocking;
mod select;

#[cfg(test)]
mod tests;

use std::time::Duration;

use amqperf_client::ConnectionParameters;
use anyhow::{bail, Result};
use bytes::Bytes;

use crate::cli::{AltPubConsArgs, Impl, PublishArgs};
use crate::metrics::Recorder;

/// How long altpubcons waits for the message it has just published.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) trait Harness {
    fn name(&self) -> &'static str;

    /// Publish `msgs` messages, with pubacks every message must be acked.
    fn publish(&mut self, args: &PublishArgs, recorder: &Recorder) -> Result<()>;

    /// Publish one message to an exclusive queue, consume and ack it, then the next one.
    fn alt_pub_cons(&mut self, args: &AltPubConsArgs, recorder: &Recorder) -> Result<()>;
}

pub(crate) fn create(implementation: Impl, params: ConnectionParameters) -> Box<dyn Harness> {
    match implementation {
        Impl::Blocking => Box::new(blocking::BlockingHarness::new(params)),
        Impl::Select => Box::new(select::SelectHarness::new(params)),
    }
}

fn payload(size: usize) -> Bytes {
    Bytes::from(vec![b'a'; size])
}

/// A nack or a returned message fails the run.
fn check_outcome(args: &PublishArgs, recorder: &Recorder) -> Result<()> {
    if recorder.nacks() > 0 {
        bail!("{} messages were nacked by the broker", recorder.nacks());
    }

    if recorder.returns() > 0 {
        bail!("{} messages were returned by the broker", recorder.returns());
    }

    if args.pubacks && recorder.confirms() != args.msgs {
        bail!("{} messages are confirmed out of {}", recorder.confirms(), args.msgs);
    }

    Ok(())
}
