//! Pipelined client and connection lifecycle management.
//!
//! One [`Client`] owns one connection, driven by a single spawned actor
//! task: outbound command submissions, inbound socket chunks, and the
//! reconnect timer are all serialized through one `select!` loop, so the
//! decoder and the pending-request queue are never touched concurrently.
//!
//! Lifecycle: `Connecting → Ready`, then either `Closing` (explicit
//! [`Client::close`], terminal, no reconnect) or `AwaitingReconnect` on an
//! unexpected transport close. After a fixed delay the actor re-runs
//! establishment against the same address, resets the decoder and the
//! pending queue, and re-issues AUTH / SELECT ahead of user traffic.
//! Requests in flight at the moment of a disconnect are lost, failed or
//! silently dropped per [`DisconnectPolicy`]. They are never answered with
//! replies belonging to later commands.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::config::{Config, DisconnectPolicy};
use crate::connection::{RawConnection, ReadHalf, WriteHalf};
use crate::error::{KvPipeError, Result};
use crate::pipeline::{Dispatcher, Pending, SharedErrorHandler, Transform};
use crate::resp::{encode_command, encode_command_str, encode_pipeline, Decoder, Reply};

/// Observable connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Transport establishment (or re-establishment) in progress.
    Connecting,
    /// Link usable; commands flow.
    Ready,
    /// Caller-initiated shutdown; terminal.
    Closing,
    /// Unexpected transport loss; the retry timer is armed.
    AwaitingReconnect,
}

/// Messages from the client handle to the connection actor.
enum Op {
    Write { frame: Vec<u8>, pending: Pending },
    Close,
}

/// Handle to one pipelined connection.
///
/// All submission methods are `&self`; calls are serialized by the actor
/// in the order it receives them.
pub struct Client {
    ops: mpsc::UnboundedSender<Op>,
    state: Arc<Mutex<LinkState>>,
    handler: SharedErrorHandler,
}

impl Client {
    /// Establish the connection and spawn its actor.
    ///
    /// A failure here is fatal: no retry is attempted before the link has
    /// been established at least once.
    pub async fn connect(config: Config) -> Result<Self> {
        let state = Arc::new(Mutex::new(LinkState::Connecting));
        let handler: SharedErrorHandler = Arc::new(Mutex::new(None));

        let conn = establish(&config).await?;
        debug!(addr = %config.addr(), "connected");

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let actor = Actor {
            config,
            ops: ops_rx,
            state: state.clone(),
            handler: handler.clone(),
        };
        tokio::spawn(actor.run(conn));

        Ok(Self {
            ops: ops_tx,
            state,
            handler,
        })
    }

    /// Establish from a `redis://` URL.
    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(Config::from_url(url)?).await
    }

    /// True while the link is established and commands flow.
    pub fn is_ready(&self) -> bool {
        *self.state.lock() == LinkState::Ready
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Register the error hook. It observes every server error reply and,
    /// under [`DisconnectPolicy::FailPending`], every request abandoned by
    /// a disconnect.
    pub fn set_error_handler(&self, f: impl FnMut(&KvPipeError) + Send + 'static) {
        *self.handler.lock() = Some(Box::new(f));
    }

    /// Submit one command (binary-safe arguments) and await its reply.
    pub async fn submit(&self, args: &[&[u8]]) -> Result<Reply> {
        if args.is_empty() {
            return Err(KvPipeError::Config(
                "command requires at least one argument".into(),
            ));
        }
        self.submit_frame(encode_command(args), None).await
    }

    /// Submit one command (string arguments) and await its reply.
    pub async fn submit_str(&self, args: &[&str]) -> Result<Reply> {
        if args.is_empty() {
            return Err(KvPipeError::Config(
                "command requires at least one argument".into(),
            ));
        }
        self.submit_frame(encode_command_str(args), None).await
    }

    /// Submit one command with a reply transform applied before delivery.
    pub async fn submit_with(&self, args: &[&str], transform: Transform) -> Result<Reply> {
        if args.is_empty() {
            return Err(KvPipeError::Config(
                "command requires at least one argument".into(),
            ));
        }
        self.submit_frame(encode_command_str(args), Some(transform))
            .await
    }

    /// Submit N commands as one pipelined batch: a single contiguous write,
    /// one result list in original order once all N replies have arrived.
    pub async fn submit_batch(&self, commands: &[Vec<String>]) -> Result<Vec<Reply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let frame = encode_pipeline(commands);
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(Op::Write {
                frame,
                pending: Pending::batch(commands.len(), tx),
            })
            .map_err(|_| KvPipeError::Closed)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(KvPipeError::ConnectionReset),
        }
    }

    /// Close the connection. No reconnection is attempted; requests still
    /// pending are abandoned without a reply. Subsequent submissions fail
    /// at the call site.
    pub fn close(&self) {
        let _ = self.ops.send(Op::Close);
    }

    async fn submit_frame(&self, frame: Vec<u8>, transform: Option<Transform>) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(Op::Write {
                frame,
                pending: Pending::single(transform, tx),
            })
            .map_err(|_| KvPipeError::Closed)?;
        match rx.await {
            Ok(result) => result,
            // Promise dropped: request was abandoned by a disconnect or close
            Err(_) => Err(KvPipeError::ConnectionReset),
        }
    }
}

// ── Connection actor ───────────────────────────────────────────────

async fn establish(config: &Config) -> Result<RawConnection> {
    RawConnection::connect_timeout(
        &config.addr(),
        Duration::from_millis(config.connect_timeout_ms),
    )
    .await
}

/// Why the serve loop ended.
enum Outcome {
    /// Unexpected transport close; reconnect.
    Disconnected,
    /// Caller-initiated close (or every handle dropped); terminal.
    Closed,
    /// Malformed inbound data; terminal, no recovery.
    Fatal(KvPipeError),
}

struct Actor {
    config: Config,
    ops: mpsc::UnboundedReceiver<Op>,
    state: Arc<Mutex<LinkState>>,
    handler: SharedErrorHandler,
}

impl Actor {
    async fn run(mut self, first: RawConnection) {
        let mut next = Some(first);
        // Commands received while the link was down, flushed after replay
        let mut stash: VecDeque<Op> = VecDeque::new();

        'link: loop {
            let conn = match next.take() {
                Some(conn) => conn,
                None => match self.reconnect(&mut stash).await {
                    Some(conn) => conn,
                    None => {
                        debug!("closed while awaiting reconnect");
                        *self.state.lock() = LinkState::Closing;
                        return;
                    }
                },
            };
            let (mut rd, mut wr) = conn.into_split();
            let mut dispatcher = Dispatcher::new(self.handler.clone());
            let mut decoder = Decoder::with_max_buf(self.config.max_buffer_size);

            // Session setup goes out ahead of any user traffic
            if let Err(e) = self.issue_setup(&mut wr, &mut dispatcher).await {
                warn!(error = %e, "setup write failed");
                *self.state.lock() = LinkState::AwaitingReconnect;
                continue 'link;
            }

            while let Some(op) = stash.pop_front() {
                let Op::Write { frame, pending } = op else {
                    *self.state.lock() = LinkState::Closing;
                    return;
                };
                if let Err(e) = wr.send_raw(&frame).await {
                    warn!(error = %e, "write failed while flushing deferred commands");
                    fail_pending(pending);
                    dispatcher.abort_all(self.config.on_disconnect);
                    *self.state.lock() = LinkState::AwaitingReconnect;
                    continue 'link;
                }
                dispatcher.enqueue(pending);
            }

            *self.state.lock() = LinkState::Ready;
            debug!(addr = %self.config.addr(), "link ready");

            match self.serve(&mut rd, &mut wr, &mut decoder, &mut dispatcher).await {
                Outcome::Disconnected => {
                    debug!(addr = %self.config.addr(), "link lost, scheduling reconnect");
                    *self.state.lock() = LinkState::AwaitingReconnect;
                    dispatcher.abort_all(self.config.on_disconnect);
                }
                Outcome::Closed => {
                    debug!("link closed by caller");
                    *self.state.lock() = LinkState::Closing;
                    return;
                }
                Outcome::Fatal(err) => {
                    error!(error = %err, "protocol violation, tearing down");
                    dispatcher.report(&err);
                    dispatcher.abort_all(DisconnectPolicy::FailPending);
                    *self.state.lock() = LinkState::Closing;
                    return;
                }
            }
        }
    }

    /// Steady-state loop: write submissions, decode inbound chunks, route
    /// replies. Returns when the link drops, the caller closes, or the
    /// stream is malformed.
    async fn serve(
        &mut self,
        rd: &mut ReadHalf,
        wr: &mut WriteHalf,
        decoder: &mut Decoder,
        dispatcher: &mut Dispatcher,
    ) -> Outcome {
        loop {
            tokio::select! {
                op = self.ops.recv() => match op {
                    Some(Op::Write { frame, pending }) => {
                        debug!(bytes = frame.len(), "sending frame");
                        if let Err(e) = wr.send_raw(&frame).await {
                            warn!(error = %e, "write failed");
                            // Never reached the transport, so it holds no
                            // queue slot; fail it directly
                            fail_pending(pending);
                            return Outcome::Disconnected;
                        }
                        dispatcher.enqueue(pending);
                    }
                    Some(Op::Close) | None => return Outcome::Closed,
                },
                chunk = rd.read_some() => match chunk {
                    Ok(bytes) => match decoder.feed(&bytes) {
                        Ok(replies) => {
                            for reply in replies {
                                if let Err(e) = dispatcher.on_reply(reply) {
                                    return Outcome::Fatal(e);
                                }
                            }
                        }
                        Err(e) => return Outcome::Fatal(e),
                    },
                    Err(e) => {
                        debug!(error = %e, "transport closed");
                        return Outcome::Disconnected;
                    }
                },
            }
        }
    }

    /// Wait out the retry delay, then re-run establishment. Commands
    /// arriving meanwhile are deferred; `None` means the caller closed.
    async fn reconnect(&mut self, stash: &mut VecDeque<Op>) -> Option<RawConnection> {
        loop {
            let delay = tokio::time::sleep(Duration::from_millis(self.config.reconnect_delay_ms));
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    _ = &mut delay => break,
                    op = self.ops.recv() => match op {
                        Some(op @ Op::Write { .. }) => stash.push_back(op),
                        Some(Op::Close) | None => return None,
                    },
                }
            }

            *self.state.lock() = LinkState::Connecting;
            debug!(addr = %self.config.addr(), "reconnecting");
            match establish(&self.config).await {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    // Arm the timer again; the next loop iteration retries
                    warn!(addr = %self.config.addr(), error = %e, "reconnect attempt failed");
                    *self.state.lock() = LinkState::AwaitingReconnect;
                }
            }
        }
    }

    /// Re-issue saved AUTH / SELECT as ordinary pipelined commands. Their
    /// replies are unobserved promises: failures surface through the error
    /// hook, not as a crash.
    async fn issue_setup(&self, wr: &mut WriteHalf, dispatcher: &mut Dispatcher) -> Result<()> {
        if let Some(password) = &self.config.password {
            let frame = match &self.config.username {
                Some(user) => encode_command_str(&["AUTH", user, password]),
                None => encode_command_str(&["AUTH", password]),
            };
            wr.send_raw(&frame).await?;
            let (tx, _rx) = oneshot::channel();
            dispatcher.enqueue(Pending::single(None, tx));
            debug!("issued AUTH ahead of user traffic");
        }
        if self.config.db != 0 {
            let frame = encode_command_str(&["SELECT", &self.config.db.to_string()]);
            wr.send_raw(&frame).await?;
            let (tx, _rx) = oneshot::channel();
            dispatcher.enqueue(Pending::single(None, tx));
            debug!(db = self.config.db, "issued SELECT ahead of user traffic");
        }
        Ok(())
    }
}

/// Fail a request that never made it onto the wire.
fn fail_pending(pending: Pending) {
    match pending {
        Pending::Single { tx, .. } => {
            let _ = tx.send(Err(KvPipeError::ConnectionReset));
        }
        Pending::Batch { tx, .. } => {
            let _ = tx.send(Err(KvPipeError::ConnectionReset));
        }
    }
}
