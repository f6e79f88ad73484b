// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::{SessionParameters, SessionSettings};
use crate::connection::{establish, BgpConnection, Connector};
use crate::error::{Error, ErrorKind};
use crate::log::session_log;
use crate::messages::{Message, OpenMessage};
use crate::queue::{EventQueue, EventSender};
use slog::Logger;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const UNIT_SESSION: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    /// Initial state. No resources allocated to the peer.
    ///
    /// Basic Transitions:
    /// - ManualStart -> Connect
    Idle,

    /// Waiting for the TCP connection to be completed.
    ///
    /// Basic Transitions:
    /// - TcpConnectionConfirmed | TcpCrAcked -> OpenSent
    Connect,

    /// Waiting for open message from peer.
    ///
    /// Basic Transitions:
    /// - BgpOpenReceived -> OpenConfirm
    OpenSent,

    /// Waiting for keepaliave or notification from peer.
    ///
    /// Basic Transitions:
    /// - KeepAliveReceived -> Established
    OpenConfirm,

    /// Able to exchange update, notification and keepliave messages with peers.
    Established,
}

impl Display for FsmState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FsmState::Idle => write!(f, "idle"),
            FsmState::Connect => write!(f, "connect"),
            FsmState::OpenSent => write!(f, "open sent"),
            FsmState::OpenConfirm => write!(f, "open confirm"),
            FsmState::Established => write!(f, "established"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsmEvent {
    /// Local system administrator manually starts the peer connection.
    ManualStart,

    /// Local system administrator manually stops the peer connection. The
    /// session goes back to idle and releases its connection.
    ManualStop,

    /// Fires when the local system has accepted an inbound TCP connection
    /// from the peer.
    TcpConnectionConfirmed,

    /// Fires when the local system's outbound TCP connection request has been
    /// acknowledged by the peer.
    TcpCrAcked,

    /// Fires when a valid BGP open message has been received.
    BgpOpenReceived(OpenMessage),

    /// Fires after our own open message has been written to the peer.
    BgpOpenSent,

    /// Fires when a keepalive message is received.
    KeepAliveReceived,

    /// Fires when the hold timer expires.
    HoldTimerExpired,

    /// Fires when the connection fails or the peer sends something that
    /// cannot be decoded.
    Error(String),
}

impl Display for FsmEvent {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::ManualStart => write!(f, "manual start"),
            Self::ManualStop => write!(f, "manual stop"),
            Self::TcpConnectionConfirmed => {
                write!(f, "tcp connection confirmed")
            }
            Self::TcpCrAcked => write!(f, "tcp cr acked"),
            Self::BgpOpenReceived(_) => write!(f, "bgp open received"),
            Self::BgpOpenSent => write!(f, "bgp open sent"),
            Self::KeepAliveReceived => write!(f, "keepalive received"),
            Self::HoldTimerExpired => write!(f, "hold timer expired"),
            Self::Error(e) => write!(f, "error: {e}"),
        }
    }
}

impl FsmEvent {
    /// Whether this event is produced by a connection, as opposed to the
    /// administrator or a timer.
    pub fn from_connection(&self) -> bool {
        matches!(
            self,
            Self::TcpConnectionConfirmed
                | Self::TcpCrAcked
                | Self::BgpOpenReceived(_)
                | Self::BgpOpenSent
                | Self::KeepAliveReceived
                | Self::Error(_)
        )
    }
}

/// Stops a running session from any thread. Stopping wakes a blocked
/// [`Session::step`], cancels an in progress dial or accept, and ends the
/// inbound reader of the session's connection.
#[derive(Clone)]
pub struct StopHandle {
    shutdown: Arc<AtomicBool>,
    events: EventSender,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // If the session is already gone there is nothing left to wake.
        let _ = self.events.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// A BGP session with a single peer. All state changes happen in
/// [`Session::handle`], which is only ever reached from the thread that owns
/// the session.
pub struct Session<C: Connector> {
    params: SessionParameters,
    settings: SessionSettings,
    state: FsmState,
    queue: EventQueue,
    connector: C,
    conn: Option<C::Connection>,
    peer_open: Option<OpenMessage>,
    shutdown: Arc<AtomicBool>,
    log: Logger,
}

impl<C: Connector> Session<C> {
    pub fn new(
        params: SessionParameters,
        settings: SessionSettings,
        connector: C,
        log: Logger,
    ) -> Self {
        Self {
            params,
            settings,
            state: FsmState::Idle,
            queue: EventQueue::new(),
            connector,
            conn: None,
            peer_open: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            log,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn parameters(&self) -> &SessionParameters {
        &self.params
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn connection(&self) -> Option<&C::Connection> {
        self.conn.as_ref()
    }

    /// The open message received from the peer, once in open confirm or
    /// later.
    pub fn peer_open(&self) -> Option<&OpenMessage> {
        self.peer_open.as_ref()
    }

    pub fn event_sender(&self) -> EventSender {
        self.queue.sender()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown: self.shutdown.clone(),
            events: self.queue.sender(),
        }
    }

    /// Queue a manual start.
    pub fn start(&self) {
        self.queue.enqueue(FsmEvent::ManualStart);
    }

    /// Take the next event off the queue, blocking until there is one, and
    /// apply it.
    pub fn step(&mut self) -> Result<FsmState, Error> {
        let event = self.queue.dequeue()?;
        session_log!(self, debug, "received fsm event";
            "event" => event.to_string()
        );
        self.handle(event)
    }

    /// Like [`Session::step`], but gives up with [`Error::Timeout`] if no
    /// event arrives within `timeout`.
    pub fn step_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<FsmState, Error> {
        let event = self.queue.dequeue_timeout(timeout)?;
        session_log!(self, debug, "received fsm event";
            "event" => event.to_string()
        );
        self.handle(event)
    }

    /// Process events until the session is stopped, or until establishing
    /// the transport fails. In the latter case the session is back in idle
    /// and the transport error is returned; the caller may queue another
    /// start and run again. Other step failures are logged and processing
    /// continues.
    pub fn run(&mut self) -> Result<(), Error> {
        session_log!(self, info, "starting peer state machine");
        let result = loop {
            match self.step() {
                Ok(_) => {}
                Err(Error::Stopped) | Err(Error::Cancelled) => break Ok(()),
                Err(e)
                    if e.kind() == ErrorKind::Transport
                        && self.state == FsmState::Idle =>
                {
                    break Err(e);
                }
                Err(e) => {
                    session_log!(self, warn, "fsm step failed: {e}";
                        "error" => format!("{e}")
                    );
                    if self.shutdown.load(Ordering::Relaxed) {
                        break Ok(());
                    }
                }
            }
        };
        self.reset();
        session_log!(self, info, "peer state machine stopped");
        result
    }

    /// Apply a single event to the state machine.
    pub fn handle(&mut self, event: FsmEvent) -> Result<FsmState, Error> {
        let current = self.state;
        let next = match (current, event) {
            (_, FsmEvent::ManualStop) => {
                self.reset();
                FsmState::Idle
            }

            (FsmState::Idle, FsmEvent::ManualStart) => {
                self.connect()?;
                FsmState::Connect
            }

            (
                FsmState::Connect,
                FsmEvent::TcpConnectionConfirmed | FsmEvent::TcpCrAcked,
            ) => {
                self.send_open()?;
                FsmState::OpenSent
            }

            (FsmState::OpenSent, FsmEvent::BgpOpenReceived(om)) => {
                session_log!(self, info, "open received";
                    "asn" => om.asn,
                    "hold_time" => om.hold_time,
                    "id" => om.id.to_string()
                );
                // TODO: validate the peer asn and negotiate the hold time
                // once keepalive and hold timers exist.
                self.peer_open = Some(om);
                FsmState::OpenConfirm
            }

            (FsmState::OpenConfirm, FsmEvent::KeepAliveReceived) => {
                FsmState::Established
            }

            // The state is left alone, but a connection whose reader failed
            // is of no further use.
            (state, FsmEvent::Error(e)) => {
                if let Some(conn) = self.conn.take() {
                    session_log!(self, warn, "releasing failed connection";
                        "peer_sockaddr" => conn.peer(),
                        "error" => e
                    );
                }
                state
            }

            (state, event) => {
                session_log!(self, debug, "event {event} ignored in {state}");
                state
            }
        };

        if current != next {
            session_log!(self, info, "{current} -> {next}");
            self.state = next;
        }
        Ok(next)
    }

    /// Return to idle from any state, releasing the connection. Events the
    /// released connection already queued are discarded; administrative
    /// events and a pending stop are kept in order.
    pub fn reset(&mut self) {
        if let Some(conn) = self.conn.take() {
            session_log!(self, info, "releasing connection";
                "peer_sockaddr" => conn.peer()
            );
        }
        self.peer_open = None;
        self.state = FsmState::Idle;
        self.discard_connection_events();
    }

    fn discard_connection_events(&self) {
        // `None` stands in for a stop signal.
        let mut kept = Vec::new();
        loop {
            match self.queue.try_dequeue() {
                Ok(Some(event)) if event.from_connection() => {
                    session_log!(self, debug, "discarding {event}");
                }
                Ok(Some(event)) => kept.push(Some(event)),
                Err(Error::Stopped) => kept.push(None),
                Ok(None) | Err(_) => break,
            }
        }
        let tx = self.queue.sender();
        for event in kept {
            // The queue owns its receiver, so these cannot fail.
            let _ = match event {
                Some(event) => tx.enqueue(event),
                None => tx.stop(),
            };
        }
    }

    fn connect(&mut self) -> Result<(), Error> {
        let conn = establish(
            &self.connector,
            &self.params,
            &self.settings,
            &self.queue.sender(),
            &self.shutdown,
            &self.log,
        )
        .inspect_err(|e| {
            session_log!(self, warn, "transport establishment failed: {e}";
                "error" => format!("{e}")
            );
        })?;
        self.conn = Some(conn);
        Ok(())
    }

    fn send_open(&self) -> Result<(), Error> {
        let conn = self.conn.as_ref().ok_or(Error::NotConnected)?;
        let om = OpenMessage::new(
            self.params.local_as(),
            self.settings.hold_time,
            self.settings.bgp_identifier(&self.params),
        );
        conn.send(Message::from(om))?;
        self.queue.enqueue(FsmEvent::BgpOpenSent);
        Ok(())
    }
}
