// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::{Role, SessionParameters, SessionSettings};
use crate::error::Error;
use crate::log::connection_log_lite;
use crate::messages::Message;
use crate::queue::EventSender;
use crate::session::FsmEvent;
use slog::Logger;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

const UNIT_CONNECTION: &str = "connector";

/// An established transport to a BGP peer, owned by exactly one session.
pub trait BgpConnection: Send {
    /// Frame and send a message to the peer.
    fn send(&self, msg: Message) -> Result<(), Error>;

    /// Start delivering messages received from the peer to `events`. Reading
    /// stops when `shutdown` is set or the connection is dropped.
    fn start_recv(
        &self,
        events: EventSender,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), Error>;

    fn peer(&self) -> SocketAddr;
    fn local(&self) -> Option<SocketAddr>;
}

/// Produces connections for a session. Both operations may block for a long
/// time, and must return [`Error::Cancelled`] shortly after `shutdown` is set.
pub trait Connector: Send {
    type Connection: BgpConnection;

    /// Open an outbound connection to `peer` from `source`, giving up after
    /// `timeout`.
    fn dial(
        &self,
        source: SocketAddr,
        peer: SocketAddr,
        timeout: Duration,
        resolution: Duration,
        shutdown: &AtomicBool,
    ) -> Result<Self::Connection, Error>;

    /// Listen on `listen` and accept exactly one connection originating from
    /// `remote`. The listening socket is released before returning.
    fn accept(
        &self,
        listen: SocketAddr,
        remote: IpAddr,
        resolution: Duration,
        shutdown: &AtomicBool,
    ) -> Result<Self::Connection, Error>;
}

/// Establish the transport for a session according to its role. On success
/// the matching transport confirmation event has been enqueued, and only then
/// is the inbound reader started, so that the confirmation is always
/// delivered before anything received from the peer.
pub fn establish<C: Connector>(
    connector: &C,
    params: &SessionParameters,
    settings: &SessionSettings,
    events: &EventSender,
    shutdown: &Arc<AtomicBool>,
    log: &Logger,
) -> Result<C::Connection, Error> {
    let (conn, confirmation) = match params.role() {
        Role::Active => {
            let source = SocketAddr::new(params.local_address(), 0);
            let peer = settings.remote_sockaddr(params);
            connection_log_lite!(log, debug, "dialing {peer}";
                "source" => source
            );
            let conn = connector.dial(
                source,
                peer,
                settings.connect_timeout,
                settings.resolution,
                shutdown,
            )?;
            (conn, FsmEvent::TcpCrAcked)
        }
        Role::Passive => {
            let listen = settings.local_sockaddr(params);
            connection_log_lite!(log, debug, "listening on {listen}");
            let conn = connector.accept(
                listen,
                params.remote_address(),
                settings.resolution,
                shutdown,
            )?;
            (conn, FsmEvent::TcpConnectionConfirmed)
        }
    };

    connection_log_lite!(log, info, "connection established";
        "peer" => conn.peer(),
        "source" => conn.local(),
        "event" => confirmation.to_string()
    );

    events.enqueue(confirmation)?;
    conn.start_recv(events.clone(), shutdown.clone())?;
    Ok(conn)
}
