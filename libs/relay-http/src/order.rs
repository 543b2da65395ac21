//! Submission-order serialization for clients with `guarantee_order`.
//!
//! Each request takes a [`Ticket`] synchronously when it is submitted. It
//! enters the pipeline once its number is being served and holds a [`Turn`]
//! until its response or error is produced. Tickets dropped before their turn
//! (cancellation, early failure) are skipped so later requests never wait on
//! them.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::HttpError;

#[derive(Debug)]
pub(crate) struct OrderGate {
    next_ticket: AtomicU64,
    serving: watch::Sender<u64>,
    /// Tickets given up before being served; guards every change of `serving`
    abandoned: Mutex<BTreeSet<u64>>,
}

impl OrderGate {
    pub(crate) fn new() -> Self {
        Self {
            next_ticket: AtomicU64::new(0),
            serving: watch::channel(0).0,
            abandoned: Mutex::new(BTreeSet::new()),
        }
    }

    pub(crate) fn take_ticket(self: &Arc<Self>) -> Ticket {
        Ticket {
            gate: Arc::clone(self),
            number: self.next_ticket.fetch_add(1, Ordering::SeqCst),
            served: false,
        }
    }

    fn release(&self, number: u64) {
        let mut abandoned = self.abandoned.lock();
        self.advance_past(&mut abandoned, number);
    }

    fn abandon(&self, number: u64) {
        let mut abandoned = self.abandoned.lock();
        if *self.serving.borrow() == number {
            self.advance_past(&mut abandoned, number);
        } else {
            abandoned.insert(number);
        }
    }

    fn advance_past(&self, abandoned: &mut BTreeSet<u64>, number: u64) {
        let mut next = number + 1;
        while abandoned.remove(&next) {
            next += 1;
        }
        tracing::trace!(released = number, serving = next, "order gate advanced");
        self.serving.send_replace(next);
    }
}

/// A place in line; abandoned when dropped before being served
#[derive(Debug)]
pub(crate) struct Ticket {
    gate: Arc<OrderGate>,
    number: u64,
    served: bool,
}

impl Ticket {
    /// Wait until this ticket is served.
    ///
    /// Returns `HttpError::Cancelled` if `cancel` fires first; the ticket is
    /// then given up.
    pub(crate) async fn wait_turn(mut self, cancel: &CancellationToken) -> Result<Turn, HttpError> {
        let number = self.number;
        let mut serving = self.gate.serving.subscribe();
        let reached = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            result = serving.wait_for(|current| *current == number) => result.is_ok(),
        };
        if !reached {
            return Err(HttpError::Cancelled);
        }

        self.served = true;
        Ok(Turn {
            gate: Arc::clone(&self.gate),
            number,
        })
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.served {
            tracing::trace!(ticket = self.number, "order ticket abandoned");
            self.gate.abandon(self.number);
        }
    }
}

/// Exclusive right to run; the next ticket is served when dropped
#[derive(Debug)]
pub(crate) struct Turn {
    gate: Arc<OrderGate>,
    number: u64,
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.gate.release(self.number);
    }
}
