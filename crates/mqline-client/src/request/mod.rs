//! Request pipeline: a FIFO queue plus a bounded in-flight set of
//! client-initiated operations.
//!
//! Each [`Request`] is a small state machine. The pipeline starts queued
//! requests while the in-flight cap and connection state allow, hands every
//! inbound reply to the in-flight set until one request claims it, and fires
//! request deadlines. It is sans-IO: packets go to an [`Outbox`] and
//! connection-level outcomes are reported as [`PipelineEvent`]s for the
//! event loop to act on.

mod auth;
mod connect;
mod ping;
mod publish;
mod subscribe;

use std::collections::VecDeque;
use std::time::Duration;

use mqline_core::Packet;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ClientError, Result};
use crate::events::ConnectionInfo;
use crate::outbox::Outbox;
use crate::packet_id::PacketIdAllocator;

pub(crate) use auth::AuthRequest;
pub(crate) use connect::ConnectRequest;
pub(crate) use ping::PingRequest;
pub(crate) use publish::PublishRequest;
pub(crate) use subscribe::{SubscribeRequest, UnsubscribeRequest};

/// Completion channel for a request's caller.
pub(crate) type Responder<T> = Option<oneshot::Sender<Result<T>>>;

/// Resolve a responder once; later calls are no-ops.
pub(crate) fn respond<T>(responder: &mut Responder<T>, result: Result<T>) {
    if let Some(tx) = responder.take() {
        // Caller may have stopped waiting
        let _ = tx.send(result);
    }
}

/// Connection-level outcomes produced while driving requests.
#[derive(Debug)]
pub(crate) enum PipelineEvent {
    Connected(ConnectionInfo),
    ConnectFailed(ClientError),
    KeepAliveTimeout,
}

/// Whether a request is still waiting after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Pending,
    Done,
}

/// Everything a request may touch while it runs one step.
pub(crate) struct RequestContext<'a> {
    pub now: Instant,
    pub request_timeout: Duration,
    pub outbox: &'a mut Outbox,
    pub events: &'a mut Vec<PipelineEvent>,
}

impl RequestContext<'_> {
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        self.outbox.send(packet)
    }

    pub fn emit(&mut self, event: PipelineEvent) {
        self.events.push(event);
    }

    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.now + timeout
    }
}

/// Behaviour shared by every request kind.
pub(crate) trait Operation {
    fn name(&self) -> &'static str;

    fn needs_packet_id(&self) -> bool {
        false
    }

    /// May start before the connection is ready.
    fn tolerates_inactive(&self) -> bool {
        false
    }

    /// Not counted against the in-flight cap and jumps the queue.
    fn privileged(&self) -> bool {
        false
    }

    /// Send the first packet(s). `Done` means resolved synchronously.
    fn start(&mut self, packet_id: Option<u16>, ctx: &mut RequestContext<'_>) -> Progress;

    /// Offer an inbound packet. `None` when this request does not own it.
    fn process(&mut self, packet: &Packet, ctx: &mut RequestContext<'_>) -> Option<Progress>;

    fn deadline(&self) -> Option<Instant> {
        None
    }

    /// The deadline passed.
    fn on_timeout(&mut self, _ctx: &mut RequestContext<'_>) -> Progress {
        Progress::Pending
    }

    /// The connection went away. `Pending` keeps the request for `resume`.
    fn pause(&mut self) -> Progress;

    /// A new connection is ready.
    fn resume(&mut self, session_present: bool, ctx: &mut RequestContext<'_>) -> Progress;

    /// Resolve with `err`; the request is dropped afterwards.
    fn fail(&mut self, err: ClientError);
}

/// The closed set of operations the pipeline runs.
pub(crate) enum Request {
    Connect(ConnectRequest),
    Publish(PublishRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Ping(PingRequest),
    Auth(AuthRequest),
}

macro_rules! dispatch {
    ($self:expr, $r:ident => $body:expr) => {
        match $self {
            Request::Connect($r) => $body,
            Request::Publish($r) => $body,
            Request::Subscribe($r) => $body,
            Request::Unsubscribe($r) => $body,
            Request::Ping($r) => $body,
            Request::Auth($r) => $body,
        }
    };
}

impl Operation for Request {
    fn name(&self) -> &'static str {
        dispatch!(self, r => r.name())
    }

    fn needs_packet_id(&self) -> bool {
        dispatch!(self, r => r.needs_packet_id())
    }

    fn tolerates_inactive(&self) -> bool {
        dispatch!(self, r => r.tolerates_inactive())
    }

    fn privileged(&self) -> bool {
        dispatch!(self, r => r.privileged())
    }

    fn start(&mut self, packet_id: Option<u16>, ctx: &mut RequestContext<'_>) -> Progress {
        dispatch!(self, r => r.start(packet_id, ctx))
    }

    fn process(&mut self, packet: &Packet, ctx: &mut RequestContext<'_>) -> Option<Progress> {
        dispatch!(self, r => r.process(packet, ctx))
    }

    fn deadline(&self) -> Option<Instant> {
        dispatch!(self, r => r.deadline())
    }

    fn on_timeout(&mut self, ctx: &mut RequestContext<'_>) -> Progress {
        dispatch!(self, r => r.on_timeout(ctx))
    }

    fn pause(&mut self) -> Progress {
        dispatch!(self, r => r.pause())
    }

    fn resume(&mut self, session_present: bool, ctx: &mut RequestContext<'_>) -> Progress {
        dispatch!(self, r => r.resume(session_present, ctx))
    }

    fn fail(&mut self, err: ClientError) {
        dispatch!(self, r => r.fail(err))
    }
}

struct InFlight {
    request: Request,
    packet_id: Option<u16>,
}

/// Queue and in-flight set for one client.
///
/// Survives reconnects: paused requests stay in flight and are resumed on
/// the next connection.
pub(crate) struct RequestPipeline {
    queue: VecDeque<Request>,
    in_flight: Vec<InFlight>,
    cap: usize,
    packet_ids: PacketIdAllocator,
}

impl RequestPipeline {
    pub fn new(cap: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            cap: cap.max(1),
            packet_ids: PacketIdAllocator::new(),
        }
    }

    pub fn enqueue(&mut self, request: Request) {
        log::debug!("Queued {} request", request.name());
        if request.privileged() {
            self.queue.push_front(request);
        } else {
            self.queue.push_back(request);
        }
    }

    /// Requests counted against the cap.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .iter()
            .filter(|entry| !entry.request.privileged())
            .count()
    }

    #[cfg(test)]
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Start queued requests while the cap and connection state allow.
    pub fn drain(&mut self, active: bool, ctx: &mut RequestContext<'_>) {
        while let Some(next) = self.queue.front() {
            if !active && !next.tolerates_inactive() {
                break;
            }
            if !next.privileged() && self.in_flight_count() >= self.cap {
                break;
            }
            let Some(mut request) = self.queue.pop_front() else {
                break;
            };

            let packet_id = if request.needs_packet_id() {
                match self.packet_ids.allocate() {
                    Some(id) => Some(id),
                    None => {
                        request.fail(ClientError::PacketIdsExhausted);
                        continue;
                    }
                }
            } else {
                None
            };

            log::debug!("Starting {} request (id {:?})", request.name(), packet_id);
            match request.start(packet_id, ctx) {
                Progress::Pending => self.in_flight.push(InFlight { request, packet_id }),
                Progress::Done => self.release(packet_id),
            }
        }
    }

    /// Offer an inbound packet to the in-flight set. Returns whether a
    /// request claimed it.
    pub fn handle_packet(&mut self, packet: &Packet, ctx: &mut RequestContext<'_>) -> bool {
        for index in 0..self.in_flight.len() {
            let Some(progress) = self.in_flight[index].request.process(packet, ctx) else {
                continue;
            };
            if progress == Progress::Done {
                let entry = self.in_flight.remove(index);
                log::debug!("{} request resolved", entry.request.name());
                self.release(entry.packet_id);
            }
            return true;
        }
        false
    }

    /// Fire every deadline at or before `ctx.now`.
    pub fn handle_timeouts(&mut self, ctx: &mut RequestContext<'_>) {
        let now = ctx.now;
        let packet_ids = &mut self.packet_ids;
        self.in_flight.retain_mut(|entry| {
            match entry.request.deadline() {
                Some(deadline) if deadline <= now => {}
                _ => return true,
            }
            log::debug!("{} request timed out", entry.request.name());
            match entry.request.on_timeout(ctx) {
                Progress::Pending => true,
                Progress::Done => {
                    if let Some(id) = entry.packet_id {
                        packet_ids.release(id);
                    }
                    false
                }
            }
        });
    }

    /// Earliest in-flight deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight
            .iter()
            .filter_map(|entry| entry.request.deadline())
            .min()
    }

    /// The connection became inactive.
    pub fn pause_all(&mut self) {
        let packet_ids = &mut self.packet_ids;
        self.in_flight.retain_mut(|entry| match entry.request.pause() {
            Progress::Pending => {
                log::debug!("Paused {} request", entry.request.name());
                true
            }
            Progress::Done => {
                if let Some(id) = entry.packet_id {
                    packet_ids.release(id);
                }
                false
            }
        });
    }

    /// A new connection is ready; paused requests resend what they need.
    pub fn resume_all(&mut self, session_present: bool, ctx: &mut RequestContext<'_>) {
        let packet_ids = &mut self.packet_ids;
        self.in_flight.retain_mut(|entry| {
            log::debug!("Resuming {} request", entry.request.name());
            match entry.request.resume(session_present, ctx) {
                Progress::Pending => true,
                Progress::Done => {
                    if let Some(id) = entry.packet_id {
                        packet_ids.release(id);
                    }
                    false
                }
            }
        });
    }

    /// The connection is permanently closed: resolve everything with `err`.
    pub fn fail_all(&mut self, err: ClientError) {
        for mut entry in self.in_flight.drain(..) {
            entry.request.fail(err.clone());
        }
        for mut request in self.queue.drain(..) {
            request.fail(err.clone());
        }
        self.packet_ids.clear();
    }

    fn release(&mut self, packet_id: Option<u16>) {
        if let Some(id) = packet_id {
            self.packet_ids.release(id);
        }
    }
}
