//! The event loop owning the broker connection.
//!
//! `AsyncClient` handles submit commands over a channel; the loop turns them
//! into requests, drives the connection state machine, reads and writes the
//! channel and surfaces everything that happened as [`Event`]s from
//! [`EventLoop::poll`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use mqline_core::{
    decode_packet, Connect, ConnectProperties, Packet, ProtocolError, Publish, Subscribe,
    Unsubscribe,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::auth::AuthHandler;
use crate::client::DisconnectOptions;
use crate::config::ClientConfig;
use crate::connection::{Backoff, ConnectionState, StateManager};
use crate::delivery::QosDelivery;
use crate::error::{ClientError, Result};
use crate::events::{
    ConnectionInfo, Event, Message, PublishOutcome, SubscriptionResult, UnsubscriptionResult,
};
use crate::keep_alive::KeepAlive;
use crate::outbox::Outbox;
use crate::request::{
    AuthRequest, ConnectRequest, Operation, PingRequest, PipelineEvent, PublishRequest, Request,
    RequestContext, RequestPipeline, SubscribeRequest, UnsubscribeRequest,
};
use crate::topic::topic_matches_filter;
use crate::transport::{Channel, Dialer};
use crate::will::Will;

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Commands sent from `AsyncClient` to the `EventLoop`.
pub(crate) enum Command {
    Connect {
        resp: oneshot::Sender<Result<ConnectionInfo>>,
    },
    Publish {
        publish: Publish,
        resp: oneshot::Sender<Result<PublishOutcome>>,
    },
    Subscribe {
        subscribe: Subscribe,
        stream: Option<mpsc::Sender<Message>>,
        resp: oneshot::Sender<Result<Vec<SubscriptionResult>>>,
    },
    Unsubscribe {
        unsubscribe: Unsubscribe,
        resp: oneshot::Sender<Result<Vec<UnsubscriptionResult>>>,
    },
    ReAuthenticate {
        handler: Arc<dyn AuthHandler>,
        timeout: Duration,
        resp: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        options: DisconnectOptions,
        resp: oneshot::Sender<Result<()>>,
    },
}

/// Registered subscription stream.
struct StreamSubscription {
    filter: String,
    tx: mpsc::Sender<Message>,
}

enum Action {
    Read(std::io::Result<usize>),
    Command(Option<Command>),
    Timer,
}

/// Build a `RequestContext` from disjoint fields of the loop.
macro_rules! request_ctx {
    ($self:ident) => {
        RequestContext {
            now: Instant::now(),
            request_timeout: $self.config.request_timeout,
            outbox: &mut $self.outbox,
            events: &mut $self.pipeline_events,
        }
    };
}

/// Drives the connection. Must be polled for any client call to make
/// progress.
///
/// ```ignore
/// let (client, mut eventloop) = AsyncClient::new(config, 10);
/// tokio::spawn(async move {
///     while let Ok(event) = eventloop.poll().await {
///         log::debug!("{:?}", event);
///     }
/// });
/// client.connect().await?;
/// ```
pub struct EventLoop {
    config: ClientConfig,
    rx: mpsc::Receiver<Command>,
    rx_closed: bool,
    dialer: Dialer,
    channel: Option<Channel>,
    read_buf: BytesMut,
    outbox: Outbox,
    state: StateManager,
    pipeline: RequestPipeline,
    pipeline_events: Vec<PipelineEvent>,
    delivery: QosDelivery,
    keep_alive: KeepAlive,
    backoff: Backoff,
    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    connect_waiters: Vec<oneshot::Sender<Result<ConnectionInfo>>>,
    connection: Option<ConnectionInfo>,
    /// Configured id, replaced by the broker-assigned one after CONNACK.
    client_id: String,
    /// Reported once from `poll` when the connection is permanently gone.
    closed: Option<ClientError>,
    streams: Vec<StreamSubscription>,
    events: VecDeque<Event>,
    inbox: VecDeque<Message>,
}

impl EventLoop {
    pub(crate) fn new(config: ClientConfig, rx: mpsc::Receiver<Command>, dialer: Dialer) -> Self {
        Self {
            rx,
            rx_closed: false,
            dialer,
            channel: None,
            read_buf: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            outbox: Outbox::new(config.protocol_version),
            state: StateManager::new(),
            pipeline: RequestPipeline::new(config.max_in_flight),
            pipeline_events: Vec::new(),
            delivery: QosDelivery::new(),
            keep_alive: KeepAlive::default(),
            backoff: Backoff::new(&config.reconnect),
            reconnect_attempt: 0,
            reconnect_at: None,
            connect_waiters: Vec::new(),
            connection: None,
            client_id: config.client_id.clone(),
            closed: None,
            streams: Vec::new(),
            events: VecDeque::new(),
            inbox: VecDeque::new(),
            config,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Check if connected to broker.
    pub fn is_connected(&self) -> bool {
        self.state.is(ConnectionState::Ready)
    }

    /// Wait for the next event.
    ///
    /// Messages matching a `subscribe_stream()` filter are delivered to
    /// their streams and won't appear as `Event::Message`.
    ///
    /// Returns an error once when the connection is lost for good (reconnect
    /// disabled) and `ClientError::Shutdown` forever after `disconnect()`.
    pub async fn poll(&mut self) -> Result<Event> {
        loop {
            if !self.outbox.is_empty() && self.channel.is_some() {
                self.flush().await;
            }

            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }

            if let Some(message) = self.inbox.pop_front() {
                match self.route(message).await {
                    Some(event) => return Ok(event),
                    None => continue,
                }
            }

            if let Some(err) = self.closed.take() {
                return Err(err);
            }

            match self.state.state() {
                ConnectionState::Shutdown => return Err(ClientError::Shutdown),
                ConnectionState::Idle => self.connect().await,
                ConnectionState::TransientFailure => self.wait_for_retry().await,
                ConnectionState::Connecting | ConnectionState::Ready => self.drive().await,
            }
        }
    }

    async fn drive(&mut self) {
        let wake_at = match (self.pipeline.next_deadline(), self.keep_alive.next_ping()) {
            (Some(deadline), Some(ping)) => Some(deadline.min(ping)),
            (deadline, ping) => deadline.or(ping),
        };

        if self.channel.is_none() {
            self.connection_lost(ClientError::ConnectionClosed, None, None);
            return;
        }
        let Some(channel) = self.channel.as_mut() else {
            return;
        };

        let action = tokio::select! {
            result = channel.read_buf(&mut self.read_buf) => Action::Read(result),
            cmd = self.rx.recv(), if !self.rx_closed => Action::Command(cmd),
            _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {
                Action::Timer
            }
        };

        match action {
            Action::Read(Ok(0)) => {
                log::info!("Broker closed the connection");
                self.connection_lost(ClientError::ConnectionClosed, None, None);
            }
            Action::Read(Ok(_)) => self.process_incoming().await,
            Action::Read(Err(e)) => {
                log::warn!("Read failed: {}", e);
                self.connection_lost(e.into(), None, None);
            }
            Action::Command(Some(cmd)) => self.handle_command(cmd).await,
            Action::Command(None) => self.handles_dropped().await,
            Action::Timer => self.on_timer(),
        }
    }

    async fn wait_for_retry(&mut self) {
        let retry_at = self.reconnect_at;
        if retry_at.is_none() && self.rx_closed {
            self.set_state(ConnectionState::Shutdown);
            return;
        }

        let action = tokio::select! {
            _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                Action::Timer
            }
            cmd = self.rx.recv(), if !self.rx_closed => Action::Command(cmd),
        };

        match action {
            Action::Timer => self.connect().await,
            Action::Command(Some(cmd)) => self.handle_command(cmd).await,
            Action::Command(None) => self.handles_dropped().await,
            Action::Read(_) => {}
        }
    }

    async fn handles_dropped(&mut self) {
        log::debug!("All client handles dropped, disconnecting");
        self.rx_closed = true;
        self.shutdown(DisconnectOptions::default()).await;
    }

    async fn flush(&mut self) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let result = match channel.write_all(self.outbox.as_slice()).await {
            Ok(()) => channel.flush().await,
            Err(e) => Err(e),
        };
        self.outbox.clear();
        match result {
            Ok(()) => self.keep_alive.on_send(Instant::now()),
            Err(e) => {
                log::warn!("Write failed: {}", e);
                self.connection_lost(e.into(), None, None);
            }
        }
    }

    async fn connect(&mut self) {
        self.reconnect_at = None;
        self.set_state(ConnectionState::Connecting);

        match self.dialer.dial(&self.config).await {
            Ok(channel) => {
                log::debug!("Channel to {} open", self.config.address);
                self.channel = Some(channel);
                self.read_buf.clear();
                let request = ConnectRequest::new(
                    self.connect_packet(),
                    self.config.auth.clone(),
                    self.config.connect_timeout,
                );
                self.pipeline.enqueue(Request::Connect(request));
                self.drain();
            }
            Err(e) => self.connect_failed(e),
        }
    }

    fn connect_packet(&self) -> Connect {
        let version = self.config.protocol_version;
        let mut properties = if version.is_v5() {
            self.config.connect_properties.clone()
        } else {
            ConnectProperties::default()
        };
        if let Some(auth) = &self.config.auth {
            properties.authentication_method = Some(auth.method().to_string());
            properties.authentication_data = auth.initial_data();
        }

        Connect {
            protocol_version: version,
            clean_start: self.config.clean_session,
            keep_alive: self.config.keep_alive,
            client_id: self.client_id.clone(),
            will: self.config.will.as_ref().map(Will::to_packet),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            properties,
        }
    }

    async fn process_incoming(&mut self) {
        let max_packet_size = if self.outbox.version().is_v5() {
            self.config.connect_properties.maximum_packet_size.unwrap_or(0)
        } else {
            0
        };

        while self.channel.is_some() {
            let (packet, used) =
                match decode_packet(&self.read_buf, self.outbox.version(), max_packet_size) {
                    Ok(Some(decoded)) => decoded,
                    Ok(None) => break,
                    Err(e) => {
                        self.protocol_error(e).await;
                        break;
                    }
                };
            self.read_buf.advance(used);

            match self.handle_packet(packet) {
                Ok(()) => {}
                Err(ClientError::Protocol(e)) => {
                    self.protocol_error(e).await;
                    break;
                }
                Err(e) => {
                    self.connection_lost(e, None, None);
                    break;
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        log::trace!("Received {}", packet.packet_type().name());

        if self.state.is(ConnectionState::Connecting)
            && !matches!(
                packet,
                Packet::Connack(_) | Packet::Auth(_) | Packet::Disconnect(_)
            )
        {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} before CONNACK",
                packet.packet_type().name()
            ))
            .into());
        }

        match packet {
            Packet::Publish(publish) => {
                if let Some(message) = self.delivery.handle_publish(publish, &mut self.outbox)? {
                    self.inbox.push_back(message);
                }
            }
            Packet::Pubrel(ack) => {
                if let Some(message) = self.delivery.handle_pubrel(&ack, &mut self.outbox)? {
                    self.inbox.push_back(message);
                }
            }
            Packet::Disconnect(disconnect) => {
                log::warn!(
                    "Broker sent DISCONNECT (reason {:#04x})",
                    disconnect.reason_code
                );
                let reason_code = self
                    .outbox
                    .version()
                    .is_v5()
                    .then_some(disconnect.reason_code);
                self.connection_lost(
                    ClientError::ConnectionClosed,
                    reason_code,
                    disconnect.properties.reason_string,
                );
            }
            Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::Pingreq => {
                return Err(ProtocolError::InvalidPacketType(packet.packet_type() as u8).into());
            }
            other => {
                if matches!(other, Packet::Pingresp) {
                    self.keep_alive.on_pong();
                }
                let claimed = self.pipeline.handle_packet(&other, &mut request_ctx!(self));
                if !claimed {
                    match &other {
                        Packet::Pubrec(ack) => self.delivery.reject_pubrec(ack, &mut self.outbox)?,
                        Packet::Puback(ack) | Packet::Pubcomp(ack) => log::debug!(
                            "Ignoring {} for unknown packet {}",
                            other.packet_type().name(),
                            ack.packet_id
                        ),
                        _ => log::warn!("Ignoring unexpected {}", other.packet_type().name()),
                    }
                }
                self.after_pipeline();
            }
        }
        Ok(())
    }

    async fn protocol_error(&mut self, err: ProtocolError) {
        log::warn!("Protocol error, closing connection: {}", err);
        let mut reason_code = None;
        if self.outbox.version().is_v5() {
            let code = err.disconnect_reason();
            let disconnect = mqline_core::Disconnect::new(code);
            if self.outbox.send(&Packet::Disconnect(disconnect)).is_ok() {
                reason_code = Some(code);
                self.flush().await;
            }
        }
        self.connection_lost(ClientError::Protocol(err), reason_code, None);
    }

    fn on_timer(&mut self) {
        self.pipeline.handle_timeouts(&mut request_ctx!(self));
        if self.state.is(ConnectionState::Ready) && self.keep_alive.poll_due(Instant::now()) {
            log::trace!("Keep-alive due, sending PINGREQ");
            self.pipeline.enqueue(Request::Ping(PingRequest::default()));
        }
        self.after_pipeline();
    }

    /// Apply what the pipeline reported, then start whatever became
    /// eligible.
    fn after_pipeline(&mut self) {
        for event in std::mem::take(&mut self.pipeline_events) {
            match event {
                PipelineEvent::Connected(info) => self.on_connected(info),
                PipelineEvent::ConnectFailed(err) => self.connect_failed(err),
                PipelineEvent::KeepAliveTimeout => {
                    self.connection_lost(ClientError::Timeout("PINGRESP"), None, None)
                }
            }
        }
        self.drain();
    }

    fn drain(&mut self) {
        if self.channel.is_none() {
            return;
        }
        let active = self.state.is(ConnectionState::Ready);
        self.pipeline.drain(active, &mut request_ctx!(self));
        if !self.pipeline_events.is_empty() {
            self.after_pipeline();
        }
    }

    fn on_connected(&mut self, info: ConnectionInfo) {
        log::info!(
            "Connected as {:?} (session present: {})",
            info.client_id,
            info.session_present
        );
        self.backoff.reset();
        self.reconnect_attempt = 0;
        self.client_id = info.client_id.clone();
        self.outbox
            .set_max_packet_size(info.capabilities.maximum_packet_size);
        self.keep_alive.start(info.keep_alive, Instant::now());

        let alias_max = if self.outbox.version().is_v5() {
            self.config.connect_properties.topic_alias_maximum.unwrap_or(0)
        } else {
            0
        };
        self.delivery.on_connected(info.session_present, alias_max);

        self.set_state(ConnectionState::Ready);
        self.pipeline
            .resume_all(info.session_present, &mut request_ctx!(self));

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(info.clone()));
        }
        self.connection = Some(info.clone());
        self.events.push_back(Event::Connected(info));
    }

    fn connect_failed(&mut self, err: ClientError) {
        log::warn!("Connect attempt failed: {}", err);
        self.drop_channel();
        self.pipeline.pause_all();
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        self.set_state(ConnectionState::TransientFailure);
        let delay = self.backoff.next_delay();
        self.schedule_retry(err, delay);
    }

    fn connection_lost(
        &mut self,
        cause: ClientError,
        reason_code: Option<u8>,
        reason_string: Option<String>,
    ) {
        if self.state.is(ConnectionState::Connecting) {
            self.connect_failed(cause);
            return;
        }
        if !self.state.is(ConnectionState::Ready) {
            return;
        }

        log::warn!("Connection lost: {}", cause);
        self.drop_channel();
        self.pipeline.pause_all();
        self.connection = None;
        self.events.push_back(Event::Disconnected {
            reason_code,
            reason_string,
        });
        self.set_state(ConnectionState::TransientFailure);
        // A drop after Ready is not a dial failure: retry at the minimum
        // delay and leave the sequence at its start
        self.backoff.reset();
        let delay = self.backoff.min();
        self.schedule_retry(cause, delay);
    }

    fn schedule_retry(&mut self, err: ClientError, delay: Duration) {
        if !self.config.reconnect.enabled {
            self.pipeline.fail_all(err.clone());
            self.closed = Some(err);
            return;
        }

        self.reconnect_attempt += 1;
        self.reconnect_at = Some(Instant::now() + delay);
        log::info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            self.reconnect_attempt
        );
        self.events.push_back(Event::Reconnecting {
            attempt: self.reconnect_attempt,
            delay,
        });
    }

    fn drop_channel(&mut self) {
        self.channel = None;
        self.read_buf.clear();
        self.outbox.clear();
        self.outbox.set_max_packet_size(None);
        self.keep_alive.stop();
    }

    fn set_state(&mut self, to: ConnectionState) {
        if let Some(state) = self.state.transition(to) {
            self.events.push_back(Event::StateChanged(state));
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { resp } => match self.state.state() {
                ConnectionState::Ready => {
                    let _ = resp.send(self.connection.clone().ok_or(ClientError::NotConnected));
                }
                ConnectionState::Connecting => self.connect_waiters.push(resp),
                ConnectionState::Idle | ConnectionState::TransientFailure => {
                    self.connect_waiters.push(resp);
                    self.connect().await;
                }
                ConnectionState::Shutdown => {
                    let _ = resp.send(Err(ClientError::Shutdown));
                }
            },
            Command::Publish { publish, resp } => {
                self.submit(Request::Publish(PublishRequest::new(publish, resp)));
            }
            Command::Subscribe {
                subscribe,
                stream,
                resp,
            } => {
                if let Some(tx) = stream {
                    for subscription in &subscribe.subscriptions {
                        self.streams.push(StreamSubscription {
                            filter: subscription.filter.clone(),
                            tx: tx.clone(),
                        });
                    }
                }
                self.submit(Request::Subscribe(SubscribeRequest::new(subscribe, resp)));
            }
            Command::Unsubscribe { unsubscribe, resp } => {
                self.streams
                    .retain(|s| !unsubscribe.filters.contains(&s.filter));
                self.submit(Request::Unsubscribe(UnsubscribeRequest::new(
                    unsubscribe,
                    resp,
                )));
            }
            Command::ReAuthenticate {
                handler,
                timeout,
                resp,
            } => {
                self.submit(Request::Auth(AuthRequest::new(handler, timeout, resp)));
            }
            Command::Disconnect { options, resp } => {
                self.shutdown(options).await;
                let _ = resp.send(Ok(()));
            }
        }
    }

    fn submit(&mut self, mut request: Request) {
        let admitted = match self.state.state() {
            ConnectionState::Shutdown => Err(ClientError::Shutdown),
            ConnectionState::TransientFailure if !self.config.reconnect.enabled => {
                Err(ClientError::NotConnected)
            }
            _ => Ok(()),
        };
        match admitted {
            Ok(()) => {
                self.pipeline.enqueue(request);
                self.drain();
            }
            Err(e) => request.fail(e),
        }
    }

    async fn shutdown(&mut self, options: DisconnectOptions) {
        if self.state.is(ConnectionState::Shutdown) {
            return;
        }

        let mut reason_code = None;
        let was_ready = self.state.is(ConnectionState::Ready);
        if was_ready {
            let disconnect = options.to_packet();
            if self.outbox.send(&Packet::Disconnect(disconnect.clone())).is_ok()
                && self.outbox.version().is_v5()
            {
                reason_code = Some(disconnect.reason_code);
            }
            if let Some(channel) = self.channel.as_mut() {
                if let Err(e) = channel.write_all(self.outbox.as_slice()).await {
                    log::debug!("Failed to send DISCONNECT: {}", e);
                }
                let _ = channel.shutdown().await;
            }
        }

        self.drop_channel();
        self.reconnect_at = None;
        self.connection = None;
        self.pipeline.fail_all(ClientError::Shutdown);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::Shutdown));
        }
        // Dropping the senders ends every MessageStream
        self.streams.clear();

        if was_ready {
            self.events.push_back(Event::Disconnected {
                reason_code,
                reason_string: None,
            });
        }
        self.set_state(ConnectionState::Shutdown);
        log::info!("Client shut down");
    }

    /// Route an inbound message to the first matching stream, or hand it
    /// back as an event.
    async fn route(&mut self, message: Message) -> Option<Event> {
        self.streams.retain(|s| !s.tx.is_closed());
        let Some(sub) = self
            .streams
            .iter()
            .find(|s| topic_matches_filter(&message.topic, &s.filter))
        else {
            return Some(Event::Message(message));
        };
        // Ignore if the receiver dropped in the meantime
        let _ = sub.tx.send(message).await;
        None
    }
}
