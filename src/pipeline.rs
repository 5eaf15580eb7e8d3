//! Ordered reply-to-request dispatch.
//!
//! Pending requests form a strict FIFO queue matching the order frames were
//! written to the transport; every decoded reply is routed to the queue
//! head. A batch submission enqueues one descriptor covering N commands and
//! completes once, with all N results in original order.
//!
//! Each pending request gets exactly one terminal outcome: a value or an
//! error through its promise channel, or (on disconnect) abandonment per
//! the configured [`DisconnectPolicy`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::error;

use crate::config::DisconnectPolicy;
use crate::error::{KvPipeError, Result};
use crate::resp::Reply;

/// A caller-supplied reply transform, applied before delivery.
pub type Transform = Box<dyn FnOnce(Reply) -> Reply + Send>;

/// Global hook observing server error replies and (under
/// [`DisconnectPolicy::FailPending`]) abandoned requests.
pub type ErrorHandler = Box<dyn FnMut(&KvPipeError) + Send>;

/// Shared slot for the registered error handler.
pub type SharedErrorHandler = Arc<Mutex<Option<ErrorHandler>>>;

pub(crate) type ReplyTx = oneshot::Sender<Result<Reply>>;
pub(crate) type BatchTx = oneshot::Sender<Result<Vec<Reply>>>;

/// A request awaiting its reply.
pub(crate) enum Pending {
    /// One command, one reply.
    Single {
        transform: Option<Transform>,
        tx: ReplyTx,
    },
    /// One of N commands sharing a single continuation; results accumulate
    /// and are delivered together once all N replies have arrived.
    Batch {
        expected: usize,
        acc: Vec<Reply>,
        tx: BatchTx,
    },
}

impl Pending {
    pub fn single(transform: Option<Transform>, tx: ReplyTx) -> Self {
        Self::Single { transform, tx }
    }

    pub fn batch(expected: usize, tx: BatchTx) -> Self {
        Self::Batch {
            expected,
            acc: Vec::with_capacity(expected),
            tx,
        }
    }
}

/// FIFO queue of pending requests plus the error hook.
pub(crate) struct Dispatcher {
    queue: VecDeque<Pending>,
    handler: SharedErrorHandler,
}

impl Dispatcher {
    pub fn new(handler: SharedErrorHandler) -> Self {
        Self {
            queue: VecDeque::new(),
            handler,
        }
    }

    /// Append a descriptor in send order. Must be called at the moment the
    /// command's frame is handed to the transport, never reordered.
    pub fn enqueue(&mut self, pending: Pending) {
        self.queue.push_back(pending);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Route one decoded reply to the queue head.
    ///
    /// A reply with no pending request is a protocol violation and fatal
    /// for the connection.
    pub fn on_reply(&mut self, reply: Reply) -> Result<()> {
        if self.queue.is_empty() {
            return Err(KvPipeError::Protocol(format!(
                "unsolicited {} reply with no pending request",
                reply.type_name()
            )));
        }

        // Server error replies still consume the queue head, but are
        // reported through the error hook as well.
        let server_err = match &reply {
            Reply::Error(msg) => {
                let err = KvPipeError::server(msg.clone());
                let handled = invoke_handler(&self.handler, &err);
                Some((err, handled))
            }
            _ => None,
        };

        let head_is_single = matches!(self.queue.front(), Some(Pending::Single { .. }));
        if head_is_single {
            let Some(Pending::Single { transform, tx }) = self.queue.pop_front() else {
                unreachable!("head variant checked above");
            };
            match server_err {
                Some((err, handled)) => {
                    if tx.send(Err(err)).is_err() && !handled {
                        // Nobody will ever observe this failure
                        error!("unhandled server error reply (no receiver, no error handler)");
                    }
                }
                None => {
                    let value = match transform {
                        Some(f) => f(reply),
                        None => reply,
                    };
                    let _ = tx.send(Ok(value));
                }
            }
            return Ok(());
        }

        let Some(Pending::Batch { expected, acc, .. }) = self.queue.front_mut() else {
            unreachable!("queue is non-empty and head is not Single");
        };
        // An errored member occupies its slot as nil so ordering holds.
        acc.push(if server_err.is_some() {
            Reply::Null
        } else {
            reply
        });
        if acc.len() == *expected {
            let Some(Pending::Batch { acc, tx, .. }) = self.queue.pop_front() else {
                unreachable!("head variant checked above");
            };
            let _ = tx.send(Ok(acc));
        }
        Ok(())
    }

    /// Report a connection-level failure through the error hook.
    pub fn report(&self, err: &KvPipeError) {
        invoke_handler(&self.handler, err);
    }

    /// Drain the queue on disconnect. In-flight requests are lost: they are
    /// either dropped silently or failed explicitly, never answered with
    /// replies belonging to later commands.
    pub fn abort_all(&mut self, policy: DisconnectPolicy) {
        let handler = self.handler.clone();
        for pending in self.queue.drain(..) {
            if policy == DisconnectPolicy::FailPending {
                invoke_handler(&handler, &KvPipeError::ConnectionReset);
                match pending {
                    Pending::Single { tx, .. } => {
                        let _ = tx.send(Err(KvPipeError::ConnectionReset));
                    }
                    Pending::Batch { tx, .. } => {
                        let _ = tx.send(Err(KvPipeError::ConnectionReset));
                    }
                }
            }
            // DropPending: descriptors (and their promise senders) just drop
        }
    }
}

/// Run the registered handler, if any. Returns whether one was invoked.
fn invoke_handler(handler: &SharedErrorHandler, err: &KvPipeError) -> bool {
    let mut guard = handler.lock();
    match guard.as_mut() {
        Some(f) => {
            f(err);
            true
        }
        None => false,
    }
}

// ── Tests ──────────────────────────────────────────────────────────
