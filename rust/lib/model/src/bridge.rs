//! Dispatch-result bridge.
//!
//! Every dispatch through the runtime opens a [`Ticket`] whose sender is
//! parked here until the action settles: with the effect's return value,
//! with `Null` when no effect ran, or with an error. The caller holds the
//! matching [`Dispatched`] future.
//!
//! Rejections nobody observes go to the unhandled-error channel: when the
//! future was dropped before the error arrived, or is dropped while still
//! holding an error it never yielded.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::error;

use crate::action::Ticket;
use crate::error::{ModelError, Result};
use crate::value::Value;

/// Single-use settle handle of one ticket.
pub(crate) type Settle = oneshot::Sender<Result<Value>>;

pub(crate) struct Bridge {
    next_ticket: AtomicU64,
    pending: Mutex<HashMap<Ticket, Settle>>,
    errors: broadcast::Sender<ModelError>,
}

impl Bridge {
    pub(crate) fn new(error_capacity: usize) -> Self {
        let (errors, _) = broadcast::channel(error_capacity.max(1));
        Self {
            next_ticket: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            errors,
        }
    }

    /// Open a ticket before the action reaches the store.
    pub(crate) fn open(&self, action_type: &str) -> (Ticket, Dispatched) {
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(ticket, tx);
        let dispatched = Dispatched {
            ticket,
            action_type: action_type.to_string(),
            rx: Some(rx),
            errors: self.errors.clone(),
        };
        (ticket, dispatched)
    }

    /// Take the sender for `ticket`. Each ticket can be claimed once.
    pub(crate) fn claim(&self, ticket: Ticket) -> Option<Settle> {
        self.pending.lock().remove(&ticket)
    }

    /// Settle a ticket. Errors without a ticket to carry them are reported.
    pub(crate) fn settle(&self, ticket: Option<Ticket>, result: Result<Value>) {
        match ticket.and_then(|t| self.claim(t)) {
            Some(tx) => deliver(Some(tx), result, &self.errors),
            None => {
                if let Err(err) = result {
                    report_unhandled(&self.errors, err);
                }
            }
        }
    }

    pub(crate) fn report_unhandled(&self, err: ModelError) {
        report_unhandled(&self.errors, err);
    }

    pub(crate) fn error_sender(&self) -> broadcast::Sender<ModelError> {
        self.errors.clone()
    }

    pub(crate) fn subscribe_errors(&self) -> broadcast::Receiver<ModelError> {
        self.errors.subscribe()
    }

    /// Tickets opened and not yet claimed.
    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every pending sender; their futures resolve to `Canceled`.
    pub(crate) fn cancel_all(&self) {
        self.pending.lock().clear();
    }
}

/// Send `result` through a claimed sender.
///
/// An error that cannot be delivered because the receiver is gone is
/// reported as unhandled.
pub(crate) fn deliver(
    tx: Option<Settle>,
    result: Result<Value>,
    errors: &broadcast::Sender<ModelError>,
) {
    let undelivered = match tx {
        Some(tx) => tx.send(result).err(),
        None => Some(result),
    };
    if let Some(Err(err)) = undelivered {
        report_unhandled(errors, err);
    }
}

pub(crate) fn report_unhandled(errors: &broadcast::Sender<ModelError>, err: ModelError) {
    error!(code = err.code(), "unhandled model error: {err}");
    // No receivers is fine: the log line above is the record.
    let _ = errors.send(err);
}

/// Future of a dispatched action.
///
/// Resolves with the effect's value, `Null` when the action had no effect,
/// or the error that rejected it. Dropping it is allowed; a rejection that
/// arrives afterwards is reported on the runtime's error channel.
#[must_use = "a dropped dispatch reports its rejection as unhandled"]
pub struct Dispatched {
    ticket: Ticket,
    action_type: String,
    rx: Option<oneshot::Receiver<Result<Value>>>,
    errors: broadcast::Sender<ModelError>,
}

impl Dispatched {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }
}

impl Future for Dispatched {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(Err(ModelError::Canceled(this.action_type.clone())));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.rx = None;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.rx = None;
                Poll::Ready(Err(ModelError::Canceled(this.action_type.clone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Dispatched {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        if let Ok(Err(err)) = rx.try_recv() {
            report_unhandled(&self.errors, err);
        }
    }
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched")
            .field("ticket", &self.ticket)
            .field("action_type", &self.action_type)
            .finish()
    }
}
