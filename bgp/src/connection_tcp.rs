// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::connection::{BgpConnection, Connector};
use crate::error::Error;
use crate::log::{connection_log, connection_log_lite};
use crate::messages::{Header, Message, MessageType};
use crate::queue::EventSender;
use crate::session::FsmEvent;
use mg_common::lock;
use slog::Logger;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{sleep, spawn};
use std::time::{Duration, Instant};

const UNIT_CONNECTION: &str = "connection_tcp";

/// Production [`Connector`] backed by kernel TCP sockets.
pub struct TcpConnector {
    log: Logger,
}

impl TcpConnector {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }

    fn connect_socket(
        source: SocketAddr,
        peer: SocketAddr,
        timeout: Duration,
    ) -> Result<TcpStream, Error> {
        let sock = Socket::new(
            Domain::for_address(peer),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        sock.bind(&source.into())?;
        sock.connect_timeout(&peer.into(), timeout)?;
        Ok(sock.into())
    }
}

impl Connector for TcpConnector {
    type Connection = BgpConnectionTcp;

    fn dial(
        &self,
        source: SocketAddr,
        peer: SocketAddr,
        timeout: Duration,
        resolution: Duration,
        shutdown: &AtomicBool,
    ) -> Result<BgpConnectionTcp, Error> {
        // The connect runs on its own thread so this call can return as soon
        // as a stop is requested. An abandoned attempt ends on its own within
        // `timeout` and the stream is dropped with the channel.
        let (tx, rx) = channel();
        spawn(move || {
            let _ = tx.send(Self::connect_socket(source, peer, timeout));
        });

        loop {
            if shutdown.load(Ordering::Relaxed) {
                connection_log_lite!(self.log, debug, "dial cancelled";
                    "peer" => peer
                );
                return Err(Error::Cancelled);
            }
            match rx.recv_timeout(resolution) {
                Ok(Ok(stream)) => {
                    return BgpConnectionTcp::with_conn(
                        stream,
                        self.log.clone(),
                    );
                }
                Ok(Err(e)) => {
                    connection_log_lite!(self.log, warn, "dial failed: {e}";
                        "peer" => peer,
                        "error" => format!("{e}")
                    );
                    return Err(e);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Disconnected)
                }
            }
        }
    }

    fn accept(
        &self,
        listen: SocketAddr,
        remote: IpAddr,
        resolution: Duration,
        shutdown: &AtomicBool,
    ) -> Result<BgpConnectionTcp, Error> {
        let listener = BgpListenerTcp::bind(listen).inspect_err(|e| {
            connection_log_lite!(self.log, warn, "bind failed: {e}";
                "listen" => listen,
                "error" => format!("{e}")
            );
        })?;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                connection_log_lite!(self.log, debug, "accept cancelled";
                    "listen" => listen
                );
                return Err(Error::Cancelled);
            }
            let (stream, peer) = match listener.accept(resolution) {
                Ok(accepted) => accepted,
                Err(Error::Timeout) => continue,
                Err(e) => {
                    connection_log_lite!(self.log, warn, "accept failed: {e}";
                        "listen" => listen,
                        "error" => format!("{e}")
                    );
                    return Err(e);
                }
            };
            if peer.ip().to_canonical() != remote.to_canonical() {
                connection_log_lite!(self.log, warn,
                    "dropping connection from unknown peer {peer}";
                    "listen" => listen,
                    "expected" => remote.to_string()
                );
                continue;
            }
            return BgpConnectionTcp::with_conn(stream, self.log.clone());
        }
    }
}

pub struct BgpListenerTcp {
    addr: SocketAddr,
    listener: TcpListener,
}

impl BgpListenerTcp {
    pub fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let sock = Socket::new(
            Domain::for_address(addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        sock.set_reuse_address(true)?;
        sock.bind(&addr.into())?;
        sock.listen(1)?;
        let listener: TcpListener = sock.into();
        listener.set_nonblocking(true)?;
        Ok(Self { addr, listener })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap_or(self.addr)
    }

    /// Wait up to `timeout` for an inbound connection.
    pub fn accept(
        &self,
        timeout: Duration,
    ) -> Result<(TcpStream, SocketAddr), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    return Ok((stream, peer));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    sleep((deadline - now).min(ACCEPT_POLL_INTERVAL));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct BgpConnectionTcp {
    peer: SocketAddr,
    local: Option<SocketAddr>,
    conn: Mutex<TcpStream>,
    dropped: Arc<AtomicBool>,
    log: Logger,
}

impl BgpConnection for BgpConnectionTcp {
    fn send(&self, msg: Message) -> Result<(), Error> {
        connection_log!(self, trace, "sending {msg:?}");
        let buf = msg.to_frame()?;
        lock!(self.conn).write_all(&buf)?;
        Ok(())
    }

    fn start_recv(
        &self,
        events: EventSender,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), Error> {
        let mut stream = lock!(self.conn).try_clone()?;
        stream.set_read_timeout(Some(RECV_TIMEOUT))?;
        let dropped = self.dropped.clone();
        let peer = self.peer;
        let log = self.log.clone();

        connection_log!(self, info, "spawning recv loop");

        spawn(move || loop {
            let stop = || {
                dropped.load(Ordering::Relaxed)
                    || shutdown.load(Ordering::Relaxed)
            };
            let event = match Self::recv_msg(&mut stream, &stop) {
                Ok(Some(Message::Open(om))) => FsmEvent::BgpOpenReceived(om),
                Ok(Some(Message::KeepAlive)) => FsmEvent::KeepAliveReceived,
                Ok(Some(msg)) => {
                    connection_log_lite!(log, debug, "ignoring message";
                        "peer" => peer,
                        "type" => format!("{:?}", MessageType::from(&msg))
                    );
                    continue;
                }
                Ok(None) => break,
                Err(_) if stop() => break,
                Err(e) => {
                    connection_log_lite!(log, warn, "recv: {e}";
                        "peer" => peer,
                        "error" => format!("{e}")
                    );
                    let _ = events.enqueue(FsmEvent::Error(e.to_string()));
                    break;
                }
            };
            if let Err(e) = events.enqueue(event) {
                connection_log_lite!(log, warn,
                    "error sending event: {e}";
                    "peer" => peer
                );
                break;
            }
        });

        Ok(())
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn local(&self) -> Option<SocketAddr> {
        self.local
    }
}

impl Drop for BgpConnectionTcp {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::Relaxed);
        let _ = lock!(self.conn).shutdown(Shutdown::Both);
    }
}

/// Read timeout used by the receive loop so that it can notice a shutdown.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

impl BgpConnectionTcp {
    fn with_conn(conn: TcpStream, log: Logger) -> Result<Self, Error> {
        let peer = conn.peer_addr()?;
        let local = conn.local_addr().ok();
        Ok(Self {
            peer,
            local,
            conn: Mutex::new(conn),
            dropped: Arc::new(AtomicBool::new(false)),
            log,
        })
    }

    /// Fill `buf` completely. Returns `Ok(false)` if `stop` fired before the
    /// buffer was filled.
    fn read_full(
        stream: &mut TcpStream,
        buf: &mut [u8],
        stop: &dyn Fn() -> bool,
    ) -> Result<bool, Error> {
        let mut i = 0;
        while i < buf.len() {
            if stop() {
                return Ok(false);
            }
            match stream.read(&mut buf[i..]) {
                Ok(0) => {
                    return Err(Error::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    )))
                }
                Ok(n) => i += n,
                // The read timeout set on the stream was hit, go around and
                // check for shutdown.
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock
                        || e.kind() == ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Read one message. `Ok(None)` means the loop was asked to stop.
    fn recv_msg(
        stream: &mut TcpStream,
        stop: &dyn Fn() -> bool,
    ) -> Result<Option<Message>, Error> {
        let mut buf = [0u8; Header::WIRE_SIZE];
        if !Self::read_full(stream, &mut buf, stop)? {
            return Ok(None);
        }
        let hdr = Header::from_wire(&buf)?;

        let mut body = vec![0u8; hdr.body_len()];
        if !Self::read_full(stream, &mut body, stop)? {
            return Ok(None);
        }
        Ok(Some(Message::from_wire(&hdr, &body)?))
    }
}
