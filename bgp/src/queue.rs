// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-session event queue. Every state transition a session makes is
//! driven by an event taken off of this queue, in the order the events were
//! enqueued.

use crate::error::Error;
use crate::session::FsmEvent;
use std::sync::mpsc::{
    channel, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use std::time::Duration;

enum Signal {
    Event(FsmEvent),
    Stop,
}

/// An unbounded FIFO of [`FsmEvent`]s owned by a single session. Producers
/// on other threads enqueue through an [`EventSender`].
pub struct EventQueue {
    tx: Sender<Signal>,
    rx: Receiver<Signal>,
}

/// A cloneable producer handle for an [`EventQueue`].
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Signal>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Append an event to the tail of the queue, waking a blocked dequeue.
    pub fn enqueue(&self, event: FsmEvent) {
        // The queue holds its own receiver, so the channel cannot be
        // disconnected while `self` is alive.
        let _ = self.tx.send(Signal::Event(event));
    }

    /// Remove the event at the head of the queue, blocking until one is
    /// available. Returns [`Error::Stopped`] if a stop was requested.
    pub fn dequeue(&self) -> Result<FsmEvent, Error> {
        match self.rx.recv() {
            Ok(Signal::Event(event)) => Ok(event),
            Ok(Signal::Stop) => Err(Error::Stopped),
            Err(_) => Err(Error::Disconnected),
        }
    }

    /// Like [`EventQueue::dequeue`], but gives up with [`Error::Timeout`]
    /// after `timeout`.
    pub fn dequeue_timeout(
        &self,
        timeout: Duration,
    ) -> Result<FsmEvent, Error> {
        match self.rx.recv_timeout(timeout) {
            Ok(Signal::Event(event)) => Ok(event),
            Ok(Signal::Stop) => Err(Error::Stopped),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }

    /// Non-blocking dequeue. `Ok(None)` means the queue is empty.
    pub fn try_dequeue(&self) -> Result<Option<FsmEvent>, Error> {
        match self.rx.try_recv() {
            Ok(Signal::Event(event)) => Ok(Some(event)),
            Ok(Signal::Stop) => Err(Error::Stopped),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Disconnected),
        }
    }
}

impl EventSender {
    /// Append an event to the tail of the queue. Fails only if the owning
    /// session has gone away.
    pub fn enqueue(&self, event: FsmEvent) -> Result<(), Error> {
        self.tx
            .send(Signal::Event(event))
            .map_err(|_| Error::Disconnected)
    }

    /// Wake the consumer with a stop signal.
    pub(crate) fn stop(&self) -> Result<(), Error> {
        self.tx.send(Signal::Stop).map_err(|_| Error::Disconnected)
    }
}
