//! Acknowledgement waiters for in-flight requests.
//!
//! rumqttc assigns packet ids inside the event loop, so a caller cannot know
//! its pkid when it hands a request to the client. Waiters are queued in the
//! order requests enter the client's request channel; the event loop binds
//! the front waiter to the pkid of the next outgoing packet of the same kind
//! and completes it when the matching ack arrives.
//!
//! A caller that stops waiting leaves its slot behind with no one listening:
//! its request is still buffered in the client or already on the wire, and
//! the packet it produces must not be credited to a later caller. Only
//! publishes are resent after a reconnect. Packet ids are reused once the
//! client's id space wraps.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::LinkError;

pub(crate) type AckResult = Result<(), LinkError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum AckKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

/// Identity of one queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket(u64);

struct Waiter {
    ticket: Ticket,
    kind: AckKind,
    /// QoS 0 publishes have no ack; they complete once written.
    awaits_ack: bool,
    /// `None` once the caller gave up.
    tx: Option<oneshot::Sender<AckResult>>,
}

impl Waiter {
    fn complete(self, result: AckResult) {
        if let Some(tx) = self.tx {
            let _ = tx.send(result);
        }
    }
}

#[derive(Default)]
struct Inner {
    next_ticket: u64,
    queued: VecDeque<Waiter>,
    in_flight: HashMap<(AckKind, u16), Waiter>,
}

#[derive(Default)]
pub(crate) struct PendingAcks {
    inner: Mutex<Inner>,
}

impl PendingAcks {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a waiter. Must be called in the same order requests are handed
    /// to the client.
    pub(crate) fn enqueue(
        &self,
        kind: AckKind,
        awaits_ack: bool,
    ) -> (Ticket, oneshot::Receiver<AckResult>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        let ticket = Ticket(inner.next_ticket);
        inner.next_ticket += 1;
        inner.queued.push_back(Waiter {
            ticket,
            kind,
            awaits_ack,
            tx: Some(tx),
        });
        (ticket, rx)
    }

    /// Drop the most recently queued waiter after the client refused the
    /// request.
    pub(crate) fn cancel_last(&self) {
        self.lock().queued.pop_back();
    }

    /// The caller behind `ticket` stopped waiting. Its slot stays so the
    /// packet it eventually produces, and that packet's ack, are absorbed.
    pub(crate) fn abandon(&self, ticket: Ticket) {
        let mut inner = self.lock();
        let Inner {
            queued, in_flight, ..
        } = &mut *inner;
        if let Some(waiter) = queued
            .iter_mut()
            .chain(in_flight.values_mut())
            .find(|w| w.ticket == ticket)
        {
            waiter.tx = None;
        }
    }

    /// An outgoing packet of `kind` with `pkid` was written to the network.
    pub(crate) fn on_outgoing(&self, kind: AckKind, pkid: u16) {
        let mut inner = self.lock();
        let key = (kind, pkid);
        if kind == AckKind::Publish && pkid != 0 && inner.in_flight.contains_key(&key) {
            debug!(pkid, "Publish retransmission");
            return;
        }

        let Some(front) = inner.queued.front() else {
            debug!(pkid, ?kind, "Outgoing packet without a waiter");
            return;
        };
        if front.kind != kind {
            warn!(pkid, ?kind, expected = ?front.kind, "Outgoing packet does not match the next waiter");
            return;
        }

        let Some(waiter) = inner.queued.pop_front() else {
            return;
        };
        if !waiter.awaits_ack {
            waiter.complete(Ok(()));
            return;
        }
        // Subscribe and unsubscribe are never resent, so an entry still
        // holding this id belongs to a request whose ack never came.
        if let Some(stale) = inner.in_flight.insert(key, waiter) {
            debug!(pkid, ?kind, "Packet id reused, dropping the unanswered request");
            stale.complete(Err(LinkError::Timeout));
        }
    }

    /// The broker acknowledged `pkid`.
    pub(crate) fn on_ack(&self, kind: AckKind, pkid: u16, result: AckResult) {
        match self.lock().in_flight.remove(&(kind, pkid)) {
            Some(waiter) => waiter.complete(result),
            None => debug!(pkid, ?kind, "Ack without a waiter"),
        }
    }

    /// The network connection dropped. Subscribes and unsubscribes on the
    /// wire will never be answered; in-flight publishes are resent by the
    /// client and queued requests are still buffered in it, so both keep
    /// their waiters.
    pub(crate) fn connection_lost(&self) {
        let mut inner = self.lock();
        let lost: Vec<(AckKind, u16)> = inner
            .in_flight
            .keys()
            .filter(|(kind, _)| *kind != AckKind::Publish)
            .copied()
            .collect();
        for key in lost {
            if let Some(waiter) = inner.in_flight.remove(&key) {
                waiter.complete(Err(LinkError::ConnectionLost));
            }
        }
    }

    /// Fail every waiter; the client is gone.
    pub(crate) fn close(&self, error: &LinkError) {
        let mut inner = self.lock();
        let in_flight: Vec<Waiter> = inner.in_flight.drain().map(|(_, w)| w).collect();
        for waiter in in_flight.into_iter().chain(inner.queued.drain(..)) {
            waiter.complete(Err(error.clone()));
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.lock().queued.len()
    }
}
