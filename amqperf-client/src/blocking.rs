//! Blocking client, the caller's thread drives the socket.
//!
//! There are no background threads. Frames are read while a call waits for its reply, and in
//! [`Connection::read_frames`]. Listeners run during those reads, so they must not call back
//! into the connection.

use std::cell::RefCell;
use std::net::{TcpStream, ToSocketAddrs};
use std::rc::Rc;
use std::time::Duration;

use amqperf_codec::frame::{
    self, AMQPFrame, BasicConsumeArgs, BasicPublishArgs, ExchangeDeclareArgs, ExchangeDeclareFlags,
    ExchangeDeleteArgs, QueueBindArgs, QueueDeclareArgs, QueueDeclareFlags, QueueDeleteArgs, QueuePurgeArgs,
    QueueUnbindArgs,
};
use log::{debug, info};

use crate::config::ConnectionParameters;
use crate::error::{ClientError, Result};
use crate::event::{AckEvent, CloseEvent, ConsumerSignal, Listener, NackEvent};
use crate::message::{Message, ReturnedMessage};
use crate::model::{ChannelNumber, DeclaredQueue};
use crate::state::{Command, ConnectionState, Outcome, Phase, Reply};
use crate::transport::{Socket, Transport};

struct Inner<S: Socket> {
    state: ConnectionState,
    transport: Transport<S>,
}

impl<S: Socket> Inner<S> {
    fn execute(&mut self, command: Command) -> Result<Reply> {
        let outcome = self.state.execute(command);

        self.flush()?;

        match outcome? {
            Outcome::Done(reply) => Ok(reply),
            Outcome::Rpc(ch) => loop {
                if let Some(reply) = self.state.take_rpc_outcome(ch) {
                    return reply;
                }

                self.pump(self.poll_interval())?;
            },
            Outcome::Confirms(ch) => loop {
                if let Some(result) = self.state.take_confirms_outcome(ch) {
                    return result.map(|_| Reply::Done);
                }

                self.pump(self.poll_interval())?;
            },
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.state.has_outgoing() {
            let frames = self.state.take_outgoing();

            if let Err(e) = self.transport.send(&frames) {
                return Err(self.transport_failed(e));
            }
        }

        Ok(())
    }

    /// Reads are paced by the heartbeat, without heartbeat they block.
    fn poll_interval(&self) -> Option<Duration> {
        match self.state.heartbeat() {
            0 => None,
            hb => Some(Duration::from_millis(hb as u64 * 500)),
        }
    }

    fn heartbeat_if_due(&mut self) -> Result<()> {
        if self.state.phase() != Phase::Open {
            return Ok(());
        }

        if let Some(half) = self.poll_interval() {
            if self.transport.last_sent().elapsed() >= half {
                debug!("Sending heartbeat");

                if let Err(e) = self.transport.send(&[frame::heartbeat()]) {
                    return Err(self.transport_failed(e));
                }
            }
        }

        Ok(())
    }

    /// Read once and dispatch every complete frame, returns the number of frames.
    fn pump(&mut self, timeout: Option<Duration>) -> Result<usize> {
        self.heartbeat_if_due()?;

        let mut next = match self.transport.receive(timeout) {
            Ok(frame) => frame,
            Err(e) => return Err(self.transport_failed(e)),
        };

        let mut count = 0;

        while let Some(frame) = next {
            self.dispatch(frame)?;
            count += 1;

            next = match self.transport.try_decode() {
                Ok(frame) => frame,
                Err(e) => return Err(self.transport_failed(e)),
            };
        }

        Ok(count)
    }

    fn dispatch(&mut self, frame: AMQPFrame) -> Result<()> {
        let result = self.state.handle_frame(frame);

        self.flush()?;

        if self.state.is_closed() {
            self.transport.close();
        }

        result
    }

    fn transport_failed(&mut self, err: ClientError) -> ClientError {
        let err = match err {
            ClientError::Frame(e) => {
                let err = self.state.frame_error(e);
                let frames = self.state.take_outgoing();

                // best effort, the stream is already out of sync
                let _ = self.transport.send(&frames);

                err
            }
            ClientError::ConnectionReset => self.state.connection_lost(),
            other => {
                self.state.fail(other.clone());

                other
            }
        };

        self.transport.close();

        err
    }
}

/// Open a TCP connection and do the AMQP handshake.
pub fn connect(params: &ConnectionParameters) -> Result<Connection<TcpStream>> {
    let address = params.address();

    info!("Connecting to {}", address);

    let stream = match params.connect_timeout {
        Some(timeout) => connect_with_timeout(&address, timeout)?,
        None => TcpStream::connect(&address)?,
    };

    stream.set_nodelay(params.tcp_nodelay)?;

    Connection::with_socket(stream, params.clone())
}

fn connect_with_timeout(address: &str, timeout: Duration) -> Result<TcpStream> {
    let mut last_error = None;

    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error
        .map(ClientError::from)
        .unwrap_or_else(|| ClientError::InvalidUrl(format!("{} doesn't resolve", address))))
}

/// Blocking AMQP connection.
pub struct Connection<S: Socket = TcpStream> {
    inner: Rc<RefCell<Inner<S>>>,
}

impl<S: Socket> Connection<S> {
    /// Do the handshake on an already connected socket.
    pub fn with_socket(socket: S, params: ConnectionParameters) -> Result<Self> {
        let frame_max = params.frame_max;
        let mut inner = Inner {
            state: ConnectionState::new(params),
            transport: Transport::new(socket, frame_max),
        };

        inner.execute(Command::Start)?;

        let negotiated = inner.state.frame_max();
        inner.transport.set_frame_max(negotiated);

        Ok(Connection {
            inner: Rc::new(RefCell::new(inner)),
        })
    }

    /// Open a channel on the smallest free channel number.
    pub fn channel(&self) -> Result<Channel<S>> {
        let id = self.inner.borrow_mut().execute(Command::OpenChannel)?.into_channel()?;

        Ok(Channel {
            id,
            inner: self.inner.clone(),
        })
    }

    /// Dispatch the frames arriving in `timeout`, `None` blocks until at least one arrives.
    pub fn read_frames(&self, timeout: Option<Duration>) -> Result<usize> {
        self.inner.borrow_mut().pump(timeout)
    }

    pub fn on_close<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&CloseEvent) + Send + 'static,
    {
        self.inner
            .borrow_mut()
            .execute(Command::Listen(0, Listener::Close(Box::new(listener))))
            .map(|_| ())
    }

    pub fn is_open(&self) -> bool {
        self.inner.borrow().state.phase() == Phase::Open
    }

    pub fn frame_max(&self) -> u32 {
        self.inner.borrow().state.frame_max()
    }

    /// Close handshake, then the socket is closed.
    pub fn close(self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();

        let result = if inner.state.phase() == Phase::Open {
            inner.execute(Command::Close).map(|_| ())
        } else {
            Ok(())
        };

        inner.transport.close();

        result
    }
}

/// Channel of a blocking connection.
pub struct Channel<S: Socket = TcpStream> {
    id: ChannelNumber,
    inner: Rc<RefCell<Inner<S>>>,
}

impl<S: Socket> Channel<S> {
    fn execute(&self, command: Command) -> Result<Reply> {
        self.inner.borrow_mut().execute(command)
    }

    pub fn id(&self) -> ChannelNumber {
        self.id
    }

    pub fn exchange_declare(
        &self,
        exchange_name: &str,
        exchange_type: &str,
        flags: Option<ExchangeDeclareFlags>,
    ) -> Result<()> {
        let mut args = ExchangeDeclareArgs::default()
            .exchange_name(exchange_name)
            .exchange_type(exchange_type);
        args.flags = flags.unwrap_or_default();

        self.execute(Command::ExchangeDeclare(self.id, args))?.into_done()
    }

    pub fn exchange_delete(&self, exchange_name: &str, if_unused: bool) -> Result<()> {
        let args = ExchangeDeleteArgs::default()
            .exchange_name(exchange_name)
            .if_unused(if_unused);

        self.execute(Command::ExchangeDelete(self.id, args))?.into_done()
    }

    /// Declare a queue, empty name lets the broker generate one.
    pub fn queue_declare(&self, queue_name: &str, flags: Option<QueueDeclareFlags>) -> Result<DeclaredQueue> {
        let mut args = QueueDeclareArgs::default().name(queue_name);
        args.flags = flags.unwrap_or_default();

        self.execute(Command::QueueDeclare(self.id, args))?.into_queue()
    }

    pub fn queue_bind(&self, queue_name: &str, exchange_name: &str, routing_key: &str) -> Result<()> {
        let args = QueueBindArgs::new(queue_name, exchange_name).routing_key(routing_key);

        self.execute(Command::QueueBind(self.id, args))?.into_done()
    }

    pub fn queue_unbind(&self, queue_name: &str, exchange_name: &str, routing_key: &str) -> Result<()> {
        let args = QueueUnbindArgs::new(queue_name, exchange_name).routing_key(routing_key);

        self.execute(Command::QueueUnbind(self.id, args))?.into_done()
    }

    /// Returns the number of purged messages.
    pub fn queue_purge(&self, queue_name: &str) -> Result<u32> {
        let args = QueuePurgeArgs::default().queue_name(queue_name);

        self.execute(Command::QueuePurge(self.id, args))?.into_message_count()
    }

    pub fn queue_delete(&self, queue_name: &str, if_unused: bool, if_empty: bool) -> Result<u32> {
        let args = QueueDeleteArgs::default()
            .queue_name(queue_name)
            .if_unused(if_unused)
            .if_empty(if_empty);

        self.execute(Command::QueueDelete(self.id, args))?.into_message_count()
    }

    /// Switch the channel to publisher confirm mode.
    pub fn enable_confirm(&self) -> Result<()> {
        self.execute(Command::ConfirmSelect(self.id))?.into_done()
    }

    /// Publish a message, in confirm mode the sequence number of it is returned.
    ///
    /// The frames are written before returning, the confirm arrives during later reads.
    pub fn publish(
        &self,
        message: Message,
        exchange_name: &str,
        routing_key: &str,
        mandatory: bool,
    ) -> Result<Option<u64>> {
        let args = BasicPublishArgs::new(exchange_name)
            .routing_key(routing_key)
            .mandatory(mandatory);

        self.execute(Command::Publish(self.id, message, args))?.into_sequence()
    }

    /// Start consuming, the handler gets the signals during reads. Returns the consumer tag.
    pub fn consume<F>(&self, queue_name: &str, no_ack: bool, handler: F) -> Result<String>
    where
        F: FnMut(ConsumerSignal) + Send + 'static,
    {
        let args = BasicConsumeArgs::default().queue(queue_name).no_ack(no_ack);

        self.execute(Command::Consume(self.id, args, Box::new(handler)))?
            .into_consumer_tag()
    }

    pub fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.execute(Command::Cancel(self.id, consumer_tag.to_string()))?
            .into_done()
    }

    pub fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.execute(Command::Ack(self.id, delivery_tag, false))?.into_done()
    }

    pub fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        self.execute(Command::Nack(self.id, delivery_tag, multiple, requeue))?
            .into_done()
    }

    pub fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.execute(Command::Reject(self.id, delivery_tag, requeue))?
            .into_done()
    }

    pub fn on_ack<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&AckEvent) + Send + 'static,
    {
        self.execute(Command::Listen(self.id, Listener::Ack(Box::new(listener))))?
            .into_done()
    }

    pub fn on_nack<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&NackEvent) + Send + 'static,
    {
        self.execute(Command::Listen(self.id, Listener::Nack(Box::new(listener))))?
            .into_done()
    }

    pub fn on_return<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&ReturnedMessage) + Send + 'static,
    {
        self.execute(Command::Listen(self.id, Listener::Return(Box::new(listener))))?
            .into_done()
    }

    pub fn on_close<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&CloseEvent) + Send + 'static,
    {
        self.execute(Command::Listen(self.id, Listener::Close(Box::new(listener))))?
            .into_done()
    }

    pub fn pending_confirms(&self) -> usize {
        self.inner.borrow().state.pending_confirms(self.id)
    }

    /// Read frames until every publish is acked or nacked. Fails if the channel closes before.
    pub fn wait_for_confirms(&self) -> Result<()> {
        self.execute(Command::WaitForConfirms(self.id))?.into_done()
    }

    pub fn close(self) -> Result<()> {
        self.execute(Command::CloseChannel(self.id))?.into_done()
    }
}
