//! The socket task of the event loop client.
//!
//! One task owns the socket and the connection state. API handles send `ClientRequest`s to
//! it and wait for the reply on a oneshot channel. Replies of synchronous methods and of
//! confirm waits are sent when the frame completing them is dispatched.

use std::collections::HashMap;
use std::time::Duration;

use amqperf_codec::codec::{AMQPCodec, CodecError, Frame};
use amqperf_codec::frame;
use futures::{SinkExt, StreamExt};
use log::{debug, error, trace};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Framed;

use crate::config::ConnectionParameters;
use crate::error::{ClientError, Result};
use crate::model::ChannelNumber;
use crate::state::{Command, ConnectionState, Outcome, Phase, Reply};

pub(crate) type Response = oneshot::Sender<Result<Reply>>;
pub(crate) type ClientRequestSink = mpsc::Sender<ClientRequest>;

pub(crate) struct ClientRequest {
    pub(crate) param: Command,
    pub(crate) response: Response,
}

impl std::fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request{{Command={:?}}}", self.param)
    }
}

/// Send a command to the socket task and wait for its reply.
pub(crate) async fn call(sink: &ClientRequestSink, command: Command) -> Result<Reply> {
    let (tx, rx) = oneshot::channel();

    sink.send(ClientRequest {
        param: command,
        response: tx,
    })
    .await
    .map_err(|_| ClientError::ConnectionReset)?;

    rx.await.map_err(|_| ClientError::ConnectionReset)?
}

struct Waiters {
    rpc: HashMap<ChannelNumber, Response>,
    confirms: HashMap<ChannelNumber, Response>,
}

pub(crate) async fn socket_loop<S>(
    socket: S,
    params: ConnectionParameters,
    mut requests: mpsc::Receiver<ClientRequest>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, AMQPCodec::new(params.frame_max));
    let mut state = ConnectionState::new(params);
    let mut waiters = Waiters {
        rpc: HashMap::new(),
        confirms: HashMap::new(),
    };
    let mut heartbeat: Option<Interval> = None;
    let mut last_sent = Instant::now();
    let mut requests_open = true;

    loop {
        tokio::select! {
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(frame)) => {
                        if let Err(e) = state.handle_frame(frame) {
                            debug!("Frame handling failed {:?}", e);
                        }
                    }
                    Some(Err(CodecError::Frame(e))) => {
                        state.frame_error(e);
                    }
                    Some(Err(CodecError::Io(e))) => {
                        error!("Socket error {:?}", e);

                        state.connection_lost();
                    }
                    None => {
                        state.connection_lost();
                    }
                }
            }
            req = requests.recv(), if requests_open => {
                match req {
                    Some(request) => {
                        trace!("Incoming client request {:?}", request);

                        handle_request(request, &mut state, &mut waiters);
                    }
                    None => {
                        requests_open = false;

                        if state.phase() == Phase::Open {
                            debug!("Every handle is dropped, closing the connection");

                            if let Err(e) = state.execute(Command::Close) {
                                debug!("Close failed {:?}", e);
                            }
                        } else {
                            state.fail(ClientError::ConnectionReset);
                        }
                    }
                }
            }
            _ = heartbeat_tick(&mut heartbeat) => {
                let half = Duration::from_millis(state.heartbeat() as u64 * 500);

                if last_sent.elapsed() >= half {
                    trace!("Sending heartbeat");

                    state_send(&mut framed, &mut state, vec![frame::heartbeat()]).await;
                    last_sent = Instant::now();
                }
            }
        }

        if state.has_outgoing() {
            let frames = state.take_outgoing();

            state_send(&mut framed, &mut state, frames).await;
            last_sent = Instant::now();
        }

        if state.phase() == Phase::Open {
            framed.codec_mut().frame_max = state.frame_max();

            if heartbeat.is_none() && state.heartbeat() > 0 {
                let mut interval = tokio::time::interval(Duration::from_millis(state.heartbeat() as u64 * 500));
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                heartbeat = Some(interval);
            }
        }

        notify_waiters(&mut state, &mut waiters);

        if state.is_closed() {
            break;
        }
    }

    let err = state.error().cloned().unwrap_or(ClientError::ConnectionReset);

    for (_, w) in waiters.rpc.drain().chain(waiters.confirms.drain()) {
        let _ = w.send(Err(err.clone()));
    }

    if let Err(e) = framed.get_mut().shutdown().await {
        debug!("Socket shutdown {:?}", e);
    }

    match err {
        ClientError::ConnectionClosed { code: 200, .. } => Ok(()),
        err => Err(err),
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}

async fn state_send<S>(framed: &mut Framed<S, AMQPCodec>, state: &mut ConnectionState, frames: Vec<frame::AMQPFrame>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = framed.send(Frame::Frames(frames)).await {
        match e {
            CodecError::Frame(e) => state.fail(ClientError::Frame(e)),
            CodecError::Io(e) => {
                error!("Socket write error {:?}", e);

                state.connection_lost();
            }
        }
    }
}

fn handle_request(request: ClientRequest, state: &mut ConnectionState, waiters: &mut Waiters) {
    let ClientRequest { param, response } = request;

    match state.execute(param) {
        Ok(Outcome::Done(reply)) => {
            let _ = response.send(Ok(reply));
        }
        Ok(Outcome::Rpc(ch)) => {
            if let Some(outcome) = state.take_cancelled_rpc(ch) {
                if let Some(w) = waiters.rpc.remove(&ch) {
                    if w.send(outcome).is_err() {
                        debug!("Caller on channel {} is gone", ch);
                    }
                }
            }

            trace!("Register waiter on channel {}", ch);

            waiters.rpc.insert(ch, response);
        }
        Ok(Outcome::Confirms(ch)) => {
            waiters.confirms.insert(ch, response);
        }
        Err(e) => {
            let _ = response.send(Err(e));
        }
    }
}

/// Unblock the calls whose reply arrived.
fn notify_waiters(state: &mut ConnectionState, waiters: &mut Waiters) {
    let channels: Vec<ChannelNumber> = waiters.rpc.keys().copied().collect();

    for ch in channels {
        if let Some(outcome) = state.take_rpc_outcome(ch) {
            if let Some(w) = waiters.rpc.remove(&ch) {
                if w.send(outcome).is_err() {
                    debug!("Caller on channel {} is gone", ch);
                }
            }
        }
    }

    let channels: Vec<ChannelNumber> = waiters.confirms.keys().copied().collect();

    for ch in channels {
        if let Some(outcome) = state.take_confirms_outcome(ch) {
            if let Some(w) = waiters.confirms.remove(&ch) {
                if w.send(outcome.map(|_| Reply::Done)).is_err() {
                    debug!("Confirm waiter on channel {} is gone", ch);
                }
            }
        }
    }
}
