//! Connection and channel state machines.
//!
//! `ConnectionState` doesn't do any i/o. Drivers feed it with decoded frames and commands, and
//! send the frames it collects in its outgoing buffer. Synchronous requests don't block here,
//! their replies are parked in a slot per channel until the driver takes them. The blocking
//! driver and the tokio event loop share this code.

mod channel;

use std::collections::{BTreeMap, HashMap};

use amqperf_codec::frame::{
    self, AMQPFrame, BasicCancelArgs, BasicConsumeArgs, BasicPublishArgs, ConnectionCloseArgs, ConnectionOpenArgs,
    ConnectionStartArgs, ConnectionStartOkArgs, ConnectionTuneArgs, ConnectionTuneOkArgs, ExchangeDeclareArgs,
    ExchangeDeleteArgs, MethodFrameArgs, QueueBindArgs, QueueDeclareArgs, QueueDeleteArgs, QueuePurgeArgs,
    QueueUnbindArgs,
};
use amqperf_codec::FrameError;
use log::{debug, error, info, warn};

use crate::config::ConnectionParameters;
use crate::error::{ClientError, Result};
use crate::event::{CloseEvent, CloseInitiator, CloseListener, ConsumerFn, ConsumerSignal, Listener, NackCause};
use crate::message::Message;
use crate::model::{ChannelError, ChannelNumber, ClassMethod, ConnectionError, DeclaredQueue};

use self::channel::{ChannelPhase, ChannelState};

/// Close code and text with the method which caused it.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CloseReason {
    pub(crate) code: u16,
    pub(crate) text: String,
    pub(crate) class_method: ClassMethod,
}

impl CloseReason {
    fn new(code: u16, text: &str, class_method: ClassMethod) -> Self {
        Self {
            code,
            text: text.to_string(),
            class_method,
        }
    }

    fn event(&self, channel: ChannelNumber, initiator: CloseInitiator) -> CloseEvent {
        CloseEvent {
            channel,
            code: self.code,
            text: self.text.clone(),
            class_method: self.class_method,
            initiator,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Negotiating,
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Handshake {
    Start,
    Tune,
    OpenOk,
}

/// Operations the application asks for.
pub enum Command {
    Start,
    Close,
    OpenChannel,
    CloseChannel(ChannelNumber),
    ExchangeDeclare(ChannelNumber, ExchangeDeclareArgs),
    ExchangeDelete(ChannelNumber, ExchangeDeleteArgs),
    QueueDeclare(ChannelNumber, QueueDeclareArgs),
    QueueBind(ChannelNumber, QueueBindArgs),
    QueueUnbind(ChannelNumber, QueueUnbindArgs),
    QueuePurge(ChannelNumber, QueuePurgeArgs),
    QueueDelete(ChannelNumber, QueueDeleteArgs),
    ConfirmSelect(ChannelNumber),
    /// An empty consumer tag is replaced by a generated one.
    Consume(ChannelNumber, BasicConsumeArgs, ConsumerFn),
    Cancel(ChannelNumber, String),
    Publish(ChannelNumber, Message, BasicPublishArgs),
    Ack(ChannelNumber, u64, bool),
    Nack(ChannelNumber, u64, bool, bool),
    Reject(ChannelNumber, u64, bool),
    /// Listener of channel 0 is the connection close listener.
    Listen(ChannelNumber, Listener),
    WaitForConfirms(ChannelNumber),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Start => write!(f, "Start"),
            Command::Close => write!(f, "Close"),
            Command::OpenChannel => write!(f, "OpenChannel"),
            Command::CloseChannel(ch) => write!(f, "CloseChannel({})", ch),
            Command::ExchangeDeclare(ch, args) => write!(f, "ExchangeDeclare({}, {:?})", ch, args),
            Command::ExchangeDelete(ch, args) => write!(f, "ExchangeDelete({}, {:?})", ch, args),
            Command::QueueDeclare(ch, args) => write!(f, "QueueDeclare({}, {:?})", ch, args),
            Command::QueueBind(ch, args) => write!(f, "QueueBind({}, {:?})", ch, args),
            Command::QueueUnbind(ch, args) => write!(f, "QueueUnbind({}, {:?})", ch, args),
            Command::QueuePurge(ch, args) => write!(f, "QueuePurge({}, {:?})", ch, args),
            Command::QueueDelete(ch, args) => write!(f, "QueueDelete({}, {:?})", ch, args),
            Command::ConfirmSelect(ch) => write!(f, "ConfirmSelect({})", ch),
            Command::Consume(ch, args, _) => write!(f, "Consume({}, {:?})", ch, args),
            Command::Cancel(ch, tag) => write!(f, "Cancel({}, {})", ch, tag),
            Command::Publish(ch, msg, args) => write!(f, "Publish({}, {:?}, size={})", ch, args, msg.body.len()),
            Command::Ack(ch, tag, multiple) => write!(f, "Ack({}, {}, {})", ch, tag, multiple),
            Command::Nack(ch, tag, multiple, requeue) => write!(f, "Nack({}, {}, {}, {})", ch, tag, multiple, requeue),
            Command::Reject(ch, tag, requeue) => write!(f, "Reject({}, {}, {})", ch, tag, requeue),
            Command::Listen(ch, l) => write!(f, "Listen({}, {:?})", ch, l),
            Command::WaitForConfirms(ch) => write!(f, "WaitForConfirms({})", ch),
        }
    }
}

/// Result of a finished command.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Done,
    Channel(ChannelNumber),
    Queue {
        name: String,
        message_count: u32,
        consumer_count: u32,
    },
    MessageCount(u32),
    ConsumerTag(String),
    /// Publish sequence number in confirm mode.
    Sequence(Option<u64>),
}

fn unexpected_reply(reply: Reply) -> ClientError {
    ClientError::Channel {
        channel: 0,
        code: ConnectionError::InternalError.code(),
        text: format!("unexpected reply {:?}", reply),
    }
}

impl Reply {
    pub fn into_channel(self) -> Result<ChannelNumber> {
        match self {
            Reply::Channel(ch) => Ok(ch),
            other => Err(unexpected_reply(other)),
        }
    }

    pub fn into_queue(self) -> Result<DeclaredQueue> {
        match self {
            Reply::Queue {
                name,
                message_count,
                consumer_count,
            } => Ok(DeclaredQueue {
                name,
                message_count,
                consumer_count,
            }),
            other => Err(unexpected_reply(other)),
        }
    }

    pub fn into_message_count(self) -> Result<u32> {
        match self {
            Reply::MessageCount(n) => Ok(n),
            other => Err(unexpected_reply(other)),
        }
    }

    pub fn into_consumer_tag(self) -> Result<String> {
        match self {
            Reply::ConsumerTag(tag) => Ok(tag),
            other => Err(unexpected_reply(other)),
        }
    }

    pub fn into_sequence(self) -> Result<Option<u64>> {
        match self {
            Reply::Sequence(seq) => Ok(seq),
            other => Err(unexpected_reply(other)),
        }
    }

    pub fn into_done(self) -> Result<()> {
        match self {
            Reply::Done => Ok(()),
            other => Err(unexpected_reply(other)),
        }
    }
}

/// What the driver needs to do after a command.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Done(Reply),
    /// Read frames until `take_rpc_outcome` of the channel gives the reply.
    Rpc(ChannelNumber),
    /// Read frames until `take_confirms_outcome` of the channel gives the result.
    Confirms(ChannelNumber),
}

struct RpcSlot {
    expect: ClassMethod,
    outcome: Option<Result<Reply>>,
}

/// State of an AMQP connection with its channels.
pub struct ConnectionState {
    params: ConnectionParameters,
    phase: Phase,
    handshake: Handshake,
    channel_max: u16,
    frame_max: u32,
    heartbeat: u16,
    channels: BTreeMap<ChannelNumber, ChannelState>,
    outgoing: Vec<AMQPFrame>,
    rpcs: HashMap<ChannelNumber, RpcSlot>,
    /// Results of requests a channel close cut short.
    cancelled: HashMap<ChannelNumber, Result<Reply>>,
    confirm_waits: HashMap<ChannelNumber, Option<Result<()>>>,
    /// Reason of refusing every further command.
    error: Option<ClientError>,
    closing: Option<CloseReason>,
    close_listener: Option<CloseListener>,
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("phase", &self.phase)
            .field("channel_max", &self.channel_max)
            .field("frame_max", &self.frame_max)
            .field("heartbeat", &self.heartbeat)
            .field("channels", &self.channels)
            .field("error", &self.error)
            .finish()
    }
}

/// Tune negotiation, 0 means no limit from that side.
fn negotiate<T: Ord + Default + Copy>(client: T, server: T) -> T {
    if client == T::default() {
        server
    } else if server == T::default() {
        client
    } else {
        std::cmp::min(client, server)
    }
}

fn nack_cause(code: u16, text: &str) -> NackCause {
    if code == 0 {
        NackCause::ConnectionReset
    } else {
        NackCause::ConnectionClosed {
            code,
            text: text.to_string(),
        }
    }
}

fn open_in(channels: &mut BTreeMap<ChannelNumber, ChannelState>, ch: ChannelNumber) -> Result<&mut ChannelState> {
    match channels.get_mut(&ch) {
        Some(channel) if channel.phase == ChannelPhase::Open => Ok(channel),
        Some(ChannelState {
            closing: Some(reason), ..
        }) => Err(ClientError::ChannelClosed {
            channel: ch,
            code: reason.code,
            text: reason.text.clone(),
        }),
        _ => Err(not_open(ch)),
    }
}

fn not_open(channel: ChannelNumber) -> ClientError {
    ClientError::Channel {
        channel,
        code: ConnectionError::ChannelError.code(),
        text: "channel is not open".to_string(),
    }
}

impl ConnectionState {
    pub fn new(params: ConnectionParameters) -> Self {
        Self {
            channel_max: params.channel_max,
            frame_max: params.frame_max,
            heartbeat: params.heartbeat,
            params,
            phase: Phase::Disconnected,
            handshake: Handshake::Start,
            channels: BTreeMap::new(),
            outgoing: vec![],
            rpcs: HashMap::new(),
            cancelled: HashMap::new(),
            confirm_waits: HashMap::new(),
            error: None,
            closing: None,
            close_listener: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Negotiated frame size limit, the requested one before tune.
    pub fn frame_max(&self) -> u32 {
        self.frame_max
    }

    /// Negotiated heartbeat interval in seconds, 0 is disabled.
    pub fn heartbeat(&self) -> u16 {
        self.heartbeat
    }

    pub fn channel_max(&self) -> u16 {
        self.channel_max
    }

    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }

    /// Frames to be written to the socket, in order.
    pub fn take_outgoing(&mut self) -> Vec<AMQPFrame> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// The reply of the synchronous request of the channel, if it arrived.
    pub fn take_rpc_outcome(&mut self, channel: ChannelNumber) -> Option<Result<Reply>> {
        match self.rpcs.get(&channel) {
            Some(RpcSlot { outcome: Some(_), .. }) => self.rpcs.remove(&channel).and_then(|slot| slot.outcome),
            _ => None,
        }
    }

    /// The failed reply of the request which was waiting when the channel was closed.
    ///
    /// The close itself waits in the channel's slot, so drivers take this before registering
    /// the close.
    pub fn take_cancelled_rpc(&mut self, channel: ChannelNumber) -> Option<Result<Reply>> {
        self.cancelled.remove(&channel)
    }

    /// Whether all the publishes of the channel are confirmed, if it is decided.
    pub fn take_confirms_outcome(&mut self, channel: ChannelNumber) -> Option<Result<()>> {
        self.settle_confirm_waits();

        match self.confirm_waits.get(&channel) {
            Some(Some(_)) => self.confirm_waits.remove(&channel).flatten(),
            _ => None,
        }
    }

    pub fn pending_confirms(&self, channel: ChannelNumber) -> usize {
        self.channels.get(&channel).map(|ch| ch.tracker.len()).unwrap_or(0)
    }

    pub fn execute(&mut self, command: Command) -> Result<Outcome> {
        debug!("Command {:?}", command);

        if !matches!(command, Command::Start) {
            if let Some(err) = &self.error {
                return Err(err.clone());
            }

            if self.phase != Phase::Open {
                return Err(ClientError::ConnectionClosed {
                    code: 0,
                    text: format!("connection is {:?}", self.phase),
                });
            }
        }

        match command {
            Command::Start => self.start(),
            Command::Close => self.close(),
            Command::OpenChannel => self.open_channel(),
            Command::CloseChannel(ch) => self.close_channel(ch),
            Command::ExchangeDeclare(ch, args) => self.rpc(ch, args.frame(ch), frame::EXCHANGE_DECLARE_OK),
            Command::ExchangeDelete(ch, args) => self.rpc(ch, args.frame(ch), frame::EXCHANGE_DELETE_OK),
            Command::QueueDeclare(ch, args) => self.rpc(ch, args.frame(ch), frame::QUEUE_DECLARE_OK),
            Command::QueueBind(ch, args) => self.rpc(ch, args.frame(ch), frame::QUEUE_BIND_OK),
            Command::QueueUnbind(ch, args) => self.rpc(ch, args.frame(ch), frame::QUEUE_UNBIND_OK),
            Command::QueuePurge(ch, args) => self.rpc(ch, args.frame(ch), frame::QUEUE_PURGE_OK),
            Command::QueueDelete(ch, args) => self.rpc(ch, args.frame(ch), frame::QUEUE_DELETE_OK),
            Command::ConfirmSelect(ch) => self.rpc(ch, frame::confirm_select(ch), frame::CONFIRM_SELECT_OK),
            Command::Consume(ch, args, handler) => self.consume(ch, args, handler),
            Command::Cancel(ch, tag) => self.rpc(ch, BasicCancelArgs::new(&tag).frame(ch), frame::BASIC_CANCEL_OK),
            Command::Publish(ch, message, args) => {
                let frame_max = self.frame_max;
                let channel = open_in(&mut self.channels, ch)?;
                let seq = channel.publish(&message, args, frame_max, &mut self.outgoing);

                Ok(Outcome::Done(Reply::Sequence(seq)))
            }
            Command::Ack(ch, tag, multiple) => {
                self.open_channel_mut(ch)?;
                self.outgoing.push(frame::basic_ack(ch, tag, multiple));

                Ok(Outcome::Done(Reply::Done))
            }
            Command::Nack(ch, tag, multiple, requeue) => {
                self.open_channel_mut(ch)?;
                self.outgoing.push(frame::basic_nack(ch, tag, multiple, requeue));

                Ok(Outcome::Done(Reply::Done))
            }
            Command::Reject(ch, tag, requeue) => {
                self.open_channel_mut(ch)?;
                self.outgoing.push(
                    frame::BasicRejectArgs::default()
                        .delivery_tag(tag)
                        .requeue(requeue)
                        .frame(ch),
                );

                Ok(Outcome::Done(Reply::Done))
            }
            Command::Listen(0, Listener::Close(l)) => {
                self.close_listener = Some(l);

                Ok(Outcome::Done(Reply::Done))
            }
            Command::Listen(ch, listener) => {
                self.open_channel_mut(ch)?.listen(listener);

                Ok(Outcome::Done(Reply::Done))
            }
            Command::WaitForConfirms(ch) => {
                let channel = self.open_channel_mut(ch)?;

                if channel.tracker.is_empty() {
                    return match channel.nacked.take() {
                        Some(delivery_tag) => Err(ClientError::Nacked {
                            channel: ch,
                            delivery_tag,
                        }),
                        None => Ok(Outcome::Done(Reply::Done)),
                    };
                }

                if self.confirm_waits.contains_key(&ch) {
                    return Err(ClientError::ChannelBusy(ch));
                }

                self.confirm_waits.insert(ch, None);

                Ok(Outcome::Confirms(ch))
            }
        }
    }

    fn start(&mut self) -> Result<Outcome> {
        if self.phase != Phase::Disconnected {
            return Err(ClientError::Handshake(format!("connection is {:?}", self.phase)));
        }

        self.phase = Phase::Negotiating;
        self.handshake = Handshake::Start;
        self.outgoing.push(AMQPFrame::Header);
        self.rpcs.insert(
            0,
            RpcSlot {
                expect: frame::CONNECTION_OPEN_OK,
                outcome: None,
            },
        );

        Ok(Outcome::Rpc(0))
    }

    fn close(&mut self) -> Result<Outcome> {
        let reason = CloseReason::new(ChannelError::Success.code(), "Normal shutdown", 0);

        info!("Closing connection");

        self.outgoing
            .push(frame::connection_close(reason.code, &reason.text, reason.class_method));
        self.begin_close(
            reason,
            ClientError::ConnectionClosed {
                code: ChannelError::Success.code(),
                text: "connection is closed by the client".to_string(),
            },
        );
        self.rpcs.insert(
            0,
            RpcSlot {
                expect: frame::CONNECTION_CLOSE_OK,
                outcome: None,
            },
        );

        Ok(Outcome::Rpc(0))
    }

    fn open_channel(&mut self) -> Result<Outcome> {
        let max = if self.channel_max == 0 {
            u16::MAX
        } else {
            self.channel_max
        };

        let id = (1..=max)
            .find(|id| !self.channels.contains_key(id) && !self.rpcs.contains_key(id))
            .ok_or_else(|| ClientError::Channel {
                channel: 0,
                code: ConnectionError::ResourceError.code(),
                text: format!("all {} channels are in use", max),
            })?;

        debug!("Opening channel {}", id);

        self.channels.insert(id, ChannelState::new(id));
        self.outgoing.push(frame::channel_open(id));
        self.rpcs.insert(
            id,
            RpcSlot {
                expect: frame::CHANNEL_OPEN_OK,
                outcome: None,
            },
        );

        Ok(Outcome::Rpc(id))
    }

    /// Closing fails the request and the confirm wait in flight on the channel.
    fn close_channel(&mut self, ch: ChannelNumber) -> Result<Outcome> {
        self.open_channel_mut(ch)?;

        let reason = CloseReason::new(ChannelError::Success.code(), "Normal close", 0);

        self.begin_channel_close(ch, reason, None);

        if let Some(RpcSlot {
            outcome: Some(outcome), ..
        }) = self.rpcs.remove(&ch)
        {
            debug!("Request on channel {} is cancelled by the close", ch);

            self.cancelled.insert(ch, outcome);
        }

        self.rpcs.insert(
            ch,
            RpcSlot {
                expect: frame::CHANNEL_CLOSE_OK,
                outcome: None,
            },
        );

        Ok(Outcome::Rpc(ch))
    }

    fn consume(&mut self, ch: ChannelNumber, mut args: BasicConsumeArgs, handler: ConsumerFn) -> Result<Outcome> {
        if self.rpcs.contains_key(&ch) {
            return Err(ClientError::ChannelBusy(ch));
        }

        if args.consumer_tag.is_empty() {
            args.consumer_tag = format!("amqperf-{}", uuid::Uuid::new_v4());
        }

        self.open_channel_mut(ch)?.add_consumer(&args.consumer_tag, handler);

        self.rpc(ch, args.frame(ch), frame::BASIC_CONSUME_OK)
    }

    fn rpc(&mut self, ch: ChannelNumber, frame: AMQPFrame, expect: ClassMethod) -> Result<Outcome> {
        if self.rpcs.contains_key(&ch) {
            return Err(ClientError::ChannelBusy(ch));
        }

        self.open_channel_mut(ch)?;
        self.outgoing.push(frame);
        self.rpcs.insert(ch, RpcSlot { expect, outcome: None });

        Ok(Outcome::Rpc(ch))
    }

    fn open_channel_mut(&mut self, ch: ChannelNumber) -> Result<&mut ChannelState> {
        open_in(&mut self.channels, ch)
    }

    fn complete_rpc(&mut self, ch: ChannelNumber, outcome: Result<Reply>) {
        match self.rpcs.get_mut(&ch) {
            Some(slot) if slot.outcome.is_none() => slot.outcome = Some(outcome),
            _ => {}
        }
    }

    fn fail_confirm_wait(&mut self, ch: ChannelNumber, err: ClientError) {
        if let Some(wait @ None) = self.confirm_waits.get_mut(&ch) {
            *wait = Some(Err(err));
        }
    }

    /// A wait is over when every publish is confirmed, it fails if any of them was nacked.
    fn settle_confirm_waits(&mut self) {
        for (ch, wait) in self.confirm_waits.iter_mut() {
            if wait.is_none() {
                match self.channels.get_mut(ch) {
                    Some(channel) if channel.tracker.is_empty() => {
                        *wait = Some(match channel.nacked.take() {
                            Some(delivery_tag) => Err(ClientError::Nacked {
                                channel: *ch,
                                delivery_tag,
                            }),
                            None => Ok(()),
                        })
                    }
                    Some(_) => {}
                    None => *wait = Some(Err(not_open(*ch))),
                }
            }
        }
    }

    /// Feed a frame read from the socket.
    ///
    /// An error means the frame made the connection fail or close. Channel level problems are
    /// reported through the waiting requests and the listeners of the channel.
    pub fn handle_frame(&mut self, frame: AMQPFrame) -> Result<()> {
        debug!("Incoming frame {:?}", frame);

        match self.phase {
            Phase::Negotiating => self.handle_handshake(frame),
            Phase::Open => self.handle_open(frame),
            Phase::Closing => self.handle_closing(frame),
            Phase::Disconnected | Phase::Closed => {
                warn!("Dropping frame, connection is {:?}", self.phase);

                Ok(())
            }
        }
    }

    fn handle_handshake(&mut self, frame: AMQPFrame) -> Result<()> {
        match (self.handshake, frame) {
            (_, AMQPFrame::Header) => self.fail_with(ClientError::Handshake(
                "server doesn't support AMQP 0-9-1".to_string(),
            )),
            (Handshake::Start, AMQPFrame::Method(0, _, MethodFrameArgs::ConnectionStart(args))) => self.on_start(args),
            (Handshake::Tune, AMQPFrame::Method(0, _, MethodFrameArgs::ConnectionTune(args))) => self.on_tune(args),
            (Handshake::OpenOk, AMQPFrame::Method(0, _, MethodFrameArgs::ConnectionOpenOk)) => {
                info!(
                    "Connection is open, channel_max={} frame_max={} heartbeat={}",
                    self.channel_max, self.frame_max, self.heartbeat
                );

                self.phase = Phase::Open;
                self.complete_rpc(0, Ok(Reply::Done));

                Ok(())
            }
            (_, AMQPFrame::Method(0, _, MethodFrameArgs::ConnectionClose(args))) => {
                self.outgoing.push(frame::connection_close_ok());

                self.fail_with(ClientError::Handshake(format!("{} {}", args.code, args.text)))
            }
            (_, AMQPFrame::Heartbeat(_)) => Ok(()),
            (step, f) => self.fail_with(ClientError::Handshake(format!(
                "unexpected frame {:?} while waiting for {:?}",
                f, step
            ))),
        }
    }

    fn on_start(&mut self, args: ConnectionStartArgs) -> Result<()> {
        if (args.version_major, args.version_minor) != (0, 9) {
            return self.fail_with(ClientError::Handshake(format!(
                "server protocol version is {}-{}",
                args.version_major, args.version_minor
            )));
        }

        if !args.mechanisms.split_whitespace().any(|m| m == "PLAIN") {
            return self.fail_with(ClientError::Handshake(format!(
                "server doesn't support PLAIN authentication, only {}",
                args.mechanisms
            )));
        }

        self.outgoing
            .push(ConnectionStartOkArgs::new(&self.params.username, &self.params.password).frame());
        self.handshake = Handshake::Tune;

        Ok(())
    }

    fn on_tune(&mut self, args: ConnectionTuneArgs) -> Result<()> {
        self.channel_max = negotiate(self.params.channel_max, args.channel_max);
        self.frame_max = negotiate(self.params.frame_max, args.frame_max);
        self.heartbeat = negotiate(self.params.heartbeat, args.heartbeat);

        self.outgoing.push(
            ConnectionTuneOkArgs {
                channel_max: self.channel_max,
                frame_max: self.frame_max,
                heartbeat: self.heartbeat,
            }
            .frame(),
        );
        self.outgoing
            .push(ConnectionOpenArgs::default().virtual_host(&self.params.virtual_host).frame());
        self.handshake = Handshake::OpenOk;

        Ok(())
    }

    fn handle_open(&mut self, frame: AMQPFrame) -> Result<()> {
        match frame {
            AMQPFrame::Heartbeat(_) => Ok(()),
            AMQPFrame::Header => {
                warn!("Protocol header on an open connection");

                Ok(())
            }
            AMQPFrame::Method(0, cm, args) => self.handle_connection_method(cm, args),
            AMQPFrame::ContentHeader(ref h) if h.channel == 0 => self.connection_exception(
                ConnectionError::UnexpectedFrame,
                "content header on channel 0",
                0,
            ),
            AMQPFrame::ContentBody(ref b) if b.channel == 0 => self.connection_exception(
                ConnectionError::UnexpectedFrame,
                "content body on channel 0",
                0,
            ),
            f => {
                let ch = f.channel();

                if !self.channels.contains_key(&ch) {
                    let class_method = match &f {
                        AMQPFrame::Method(_, cm, _) => *cm,
                        _ => 0,
                    };

                    return self.connection_exception(
                        ConnectionError::ChannelError,
                        &format!("unknown channel {}", ch),
                        class_method,
                    );
                }

                self.handle_channel_frame(ch, f)
            }
        }
    }

    fn handle_connection_method(&mut self, cm: ClassMethod, args: MethodFrameArgs) -> Result<()> {
        match args {
            MethodFrameArgs::ConnectionClose(args) => self.on_remote_close(args),
            MethodFrameArgs::ConnectionBlocked(args) => {
                warn!("Connection is blocked by the broker: {}", args.reason);

                Ok(())
            }
            MethodFrameArgs::ConnectionUnblocked => {
                info!("Connection is unblocked");

                Ok(())
            }
            _ => self.connection_exception(
                ConnectionError::CommandInvalid,
                &format!("unexpected method {:08X} on channel 0", cm),
                cm,
            ),
        }
    }

    fn on_remote_close(&mut self, args: ConnectionCloseArgs) -> Result<()> {
        let reason = CloseReason::new(args.code, &args.text, args.class_method());

        error!("Connection is closed by the broker {} {}", args.code, args.text);

        self.outgoing.push(frame::connection_close_ok());

        let err = ClientError::ConnectionClosed {
            code: args.code,
            text: args.text,
        };

        self.shutdown(&reason, err.clone());
        self.phase = Phase::Closed;
        self.error = Some(err.clone());
        self.fire_connection_close(&reason, CloseInitiator::Remote);

        Err(err)
    }

    /// Protocol violation of the broker, the client closes the connection.
    fn connection_exception(&mut self, code: ConnectionError, text: &str, class_method: ClassMethod) -> Result<()> {
        let text = format!("{} - {}", code.text(), text);
        let reason = CloseReason::new(code.code(), &text, class_method);

        error!("Closing connection: {} {}", reason.code, reason.text);

        let err = ClientError::Channel {
            channel: 0,
            code: reason.code,
            text: reason.text.clone(),
        };

        self.outgoing.push(frame::connection_close(reason.code, &reason.text, class_method));
        self.begin_close(reason, err.clone());

        Err(err)
    }

    fn begin_close(&mut self, reason: CloseReason, err: ClientError) {
        self.shutdown(&reason, err.clone());
        self.phase = Phase::Closing;
        self.closing = Some(reason);
        self.error = Some(err);
    }

    fn handle_closing(&mut self, frame: AMQPFrame) -> Result<()> {
        match frame {
            AMQPFrame::Method(0, _, MethodFrameArgs::ConnectionCloseOk) => {
                self.finish_local_close();

                Ok(())
            }
            AMQPFrame::Method(0, _, MethodFrameArgs::ConnectionClose(args)) => {
                debug!("Both sides closed the connection, {} {}", args.code, args.text);

                self.outgoing.push(frame::connection_close_ok());
                self.finish_local_close();

                Ok(())
            }
            f => {
                debug!("Connection is closing, dropping {:?}", f);

                Ok(())
            }
        }
    }

    fn finish_local_close(&mut self) {
        self.phase = Phase::Closed;
        self.complete_rpc(0, Ok(Reply::Done));

        if let Some(reason) = self.closing.take() {
            info!("Connection is closed {} {}", reason.code, reason.text);

            self.fire_connection_close(&reason, CloseInitiator::Local);
        }
    }

    fn fire_connection_close(&mut self, reason: &CloseReason, initiator: CloseInitiator) {
        if let Some(l) = self.close_listener.as_mut() {
            l(&reason.event(0, initiator));
        }
    }

    /// Every channel goes away, their publishes are nacked, every waiting request fails.
    fn shutdown(&mut self, reason: &CloseReason, err: ClientError) {
        let cause = nack_cause(reason.code, &reason.text);

        for (_, mut channel) in std::mem::take(&mut self.channels) {
            channel.nack_pending(cause.clone());
            channel.signal_consumers(|| ConsumerSignal::ConnectionClosed {
                reply_code: reason.code,
                reply_text: reason.text.clone(),
                class_method: reason.class_method,
            });
        }

        for slot in self.rpcs.values_mut() {
            if slot.outcome.is_none() {
                slot.outcome = Some(Err(err.clone()));
            }
        }

        for wait in self.confirm_waits.values_mut() {
            if wait.is_none() {
                *wait = Some(Err(err.clone()));
            }
        }
    }

    fn fail_with(&mut self, err: ClientError) -> Result<()> {
        self.fail(err.clone());

        Err(err)
    }

    /// The connection is unusable, without closing handshake.
    pub fn fail(&mut self, err: ClientError) {
        if self.phase == Phase::Closed && self.error.is_some() {
            return;
        }

        error!("Connection failed: {}", err);

        let reason = match &err {
            ClientError::ConnectionClosed { code, text } => CloseReason::new(*code, text, 0),
            ClientError::Frame(e) => CloseReason::new(ConnectionError::FrameError.code(), &e.to_string(), 0),
            _ => CloseReason::new(0, "connection reset", 0),
        };

        self.shutdown(&reason, err.clone());
        self.phase = Phase::Closed;
        self.closing = None;
        self.error = Some(err);
    }

    /// The socket is closed by the peer or by an i/o error.
    pub fn connection_lost(&mut self) -> ClientError {
        let err = match self.phase {
            Phase::Negotiating => ClientError::Handshake("connection is closed during the handshake".to_string()),
            Phase::Closed => return self.error.clone().unwrap_or(ClientError::ConnectionReset),
            _ => ClientError::ConnectionReset,
        };

        self.fail(err.clone());

        err
    }

    /// A malformed frame arrived, the client closes the connection with 501.
    pub fn frame_error(&mut self, err: FrameError) -> ClientError {
        let text = format!("{} - {}", ConnectionError::FrameError.text(), err);
        let reason = CloseReason::new(ConnectionError::FrameError.code(), &text, 0);

        self.outgoing.push(frame::connection_close(reason.code, &reason.text, 0));

        let err = ClientError::Frame(err);

        self.fail(err.clone());
        self.fire_connection_close(&reason, CloseInitiator::Local);

        err
    }

    fn handle_channel_frame(&mut self, ch: ChannelNumber, frame: AMQPFrame) -> Result<()> {
        let phase = match self.channels.get(&ch) {
            Some(channel) => channel.phase,
            None => return Ok(()),
        };

        if phase == ChannelPhase::Closing {
            return self.handle_closing_channel(ch, frame);
        }

        match frame {
            AMQPFrame::Method(_, cm, args) => {
                let expected = matches!(self.rpcs.get(&ch), Some(RpcSlot { expect, outcome: None }) if *expect == cm);

                if expected {
                    self.handle_rpc_reply(ch, args);

                    return Ok(());
                }

                self.handle_channel_method(ch, cm, args)
            }
            AMQPFrame::ContentHeader(header) => {
                let result = self.channel_mut(ch).map(|c| c.content_header(header));

                self.content_result(result)
            }
            AMQPFrame::ContentBody(body) => {
                let result = self.channel_mut(ch).map(|c| c.content_body(body));

                self.content_result(result)
            }
            AMQPFrame::Header | AMQPFrame::Heartbeat(_) => Ok(()),
        }
    }

    fn channel_mut(&mut self, ch: ChannelNumber) -> Option<&mut ChannelState> {
        self.channels.get_mut(&ch)
    }

    fn content_result(&mut self, result: Option<std::result::Result<(), channel::ContentError>>) -> Result<()> {
        match result {
            Some(Err(e)) => self.connection_exception(ConnectionError::UnexpectedFrame, e.0, 0),
            _ => Ok(()),
        }
    }

    fn handle_rpc_reply(&mut self, ch: ChannelNumber, args: MethodFrameArgs) {
        let reply = match args {
            MethodFrameArgs::ChannelOpenOk => {
                if let Some(channel) = self.channel_mut(ch) {
                    channel.phase = ChannelPhase::Open;
                }

                info!("Channel {} is open", ch);

                Reply::Channel(ch)
            }
            MethodFrameArgs::ConfirmSelectOk => {
                if let Some(channel) = self.channel_mut(ch) {
                    channel.enable_confirms();
                }

                debug!("Confirm mode on channel {}", ch);

                Reply::Done
            }
            MethodFrameArgs::QueueDeclareOk(args) => Reply::Queue {
                name: args.name,
                message_count: args.message_count,
                consumer_count: args.consumer_count,
            },
            MethodFrameArgs::QueuePurgeOk(args) => Reply::MessageCount(args.message_count),
            MethodFrameArgs::QueueDeleteOk(args) => Reply::MessageCount(args.message_count),
            MethodFrameArgs::BasicConsumeOk(args) => Reply::ConsumerTag(args.consumer_tag),
            MethodFrameArgs::BasicCancelOk(args) => {
                if let Some(channel) = self.channel_mut(ch) {
                    channel.cancel_consumer(&args.consumer_tag);
                }

                Reply::Done
            }
            _ => Reply::Done,
        };

        self.complete_rpc(ch, Ok(reply));
    }

    fn handle_channel_method(&mut self, ch: ChannelNumber, cm: ClassMethod, args: MethodFrameArgs) -> Result<()> {
        match args {
            MethodFrameArgs::BasicAck(args) => {
                self.confirm(ch, cm, args.delivery_tag, args.multiple, false);

                Ok(())
            }
            MethodFrameArgs::BasicNack(args) => {
                let multiple = args.is_multiple();

                self.confirm(ch, cm, args.delivery_tag, multiple, true);

                Ok(())
            }
            MethodFrameArgs::ChannelClose(args) => {
                self.on_remote_channel_close(ch, args);

                Ok(())
            }
            MethodFrameArgs::BasicCancel(args) => {
                info!("Broker cancelled consumer {} on channel {}", args.consumer_tag, ch);

                if let Some(channel) = self.channel_mut(ch) {
                    channel.cancel_consumer(&args.consumer_tag);
                }

                Ok(())
            }
            args @ (MethodFrameArgs::BasicDeliver(_) | MethodFrameArgs::BasicReturn(_)) => {
                let result = self.channel_mut(ch).map(|c| c.start_content(args));

                self.content_result(result)
            }
            _ => self.connection_exception(
                ConnectionError::CommandInvalid,
                &format!("unexpected method {:08X} on channel {}", cm, ch),
                cm,
            ),
        }
    }

    fn confirm(&mut self, ch: ChannelNumber, cm: ClassMethod, delivery_tag: u64, multiple: bool, nack: bool) {
        let result = match self.channel_mut(ch) {
            Some(channel) => channel.handle_confirm(delivery_tag, multiple, nack),
            None => return,
        };

        if result.is_err() {
            let text = format!(
                "{} - unknown delivery tag {}",
                ChannelError::PreconditionFailed.text(),
                delivery_tag
            );

            error!("Channel {}: {}", ch, text);

            let reason = CloseReason::new(ChannelError::PreconditionFailed.code(), &text, cm);

            self.begin_channel_close(
                ch,
                reason,
                Some(ClientError::UnexpectedAck {
                    channel: ch,
                    delivery_tag,
                }),
            );
        }
    }

    /// Client side close, publishes are nacked right away, the channel goes away at close-ok.
    fn begin_channel_close(&mut self, ch: ChannelNumber, reason: CloseReason, err: Option<ClientError>) {
        let err = err.unwrap_or_else(|| ClientError::ChannelClosed {
            channel: ch,
            code: reason.code,
            text: reason.text.clone(),
        });

        if let Some(channel) = self.channels.get_mut(&ch) {
            self.outgoing.push(channel.close_frame(&reason));

            channel.phase = ChannelPhase::Closing;
            channel.nack_pending(NackCause::ChannelClosed {
                code: reason.code,
                text: reason.text.clone(),
            });
            channel.closing = Some(reason);
        }

        self.complete_rpc(ch, Err(err.clone()));
        self.fail_confirm_wait(ch, err);
    }

    fn handle_closing_channel(&mut self, ch: ChannelNumber, frame: AMQPFrame) -> Result<()> {
        match frame {
            AMQPFrame::Method(_, _, MethodFrameArgs::ChannelCloseOk) => {
                if let Some(mut channel) = self.channels.remove(&ch) {
                    let reason = channel.closing.take().unwrap_or_else(|| CloseReason::new(0, "", 0));

                    info!("Channel {} is closed {} {}", ch, reason.code, reason.text);

                    channel.signal_consumers(|| ConsumerSignal::ChannelClosed {
                        reply_code: reason.code,
                        reply_text: reason.text.clone(),
                        class_method: reason.class_method,
                    });
                    channel.fire_close(&reason.event(ch, CloseInitiator::Local));
                }

                self.complete_rpc(ch, Ok(Reply::Done));

                Ok(())
            }
            AMQPFrame::Method(_, _, MethodFrameArgs::ChannelClose(args)) => {
                debug!("Both sides closed channel {}, {} {}", ch, args.code, args.text);

                self.outgoing.push(frame::channel_close_ok(ch));

                Ok(())
            }
            f => {
                debug!("Channel {} is closing, dropping {:?}", ch, f);

                Ok(())
            }
        }
    }

    fn on_remote_channel_close(&mut self, ch: ChannelNumber, args: frame::ChannelCloseArgs) {
        let reason = CloseReason::new(args.code, &args.text, args.class_method());

        error!("Channel {} is closed by the broker {} {}", ch, args.code, args.text);

        self.outgoing.push(frame::channel_close_ok(ch));

        if let Some(mut channel) = self.channels.remove(&ch) {
            channel.nack_pending(NackCause::ChannelClosed {
                code: reason.code,
                text: reason.text.clone(),
            });
            channel.signal_consumers(|| ConsumerSignal::ChannelClosed {
                reply_code: reason.code,
                reply_text: reason.text.clone(),
                class_method: reason.class_method,
            });
            channel.fire_close(&reason.event(ch, CloseInitiator::Remote));
        }

        let err = ClientError::ChannelClosed {
            channel: ch,
            code: args.code,
            text: args.text,
        };

        self.complete_rpc(ch, Err(err.clone()));
        self.fail_confirm_wait(ch, err);
    }
}
