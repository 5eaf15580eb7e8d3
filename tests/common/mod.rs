//! Shared helpers for integration tests.
//!
//! Runs a scripted in-process TCP server speaking just enough RESP to
//! exercise the client: it parses inbound command frames, records them per
//! session, and answers each one according to a test-supplied script. Tests
//! never need a real server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use kvpipe::Config;

/// One inbound command, argument by argument.
pub type Command = Vec<Vec<u8>>;

/// What the scripted server does with one inbound command.
pub enum Action {
    /// Write these bytes back. May carry several replies in one write.
    Reply(Vec<u8>),
    /// Consume the command but send nothing, leaving it pending.
    Silence,
    /// Drop the connection without replying.
    Close,
}

/// Scripted server handle. Accepts connections sequentially for the whole
/// test; each accepted connection is one "session".
pub struct MockServer {
    pub addr: String,
    received: Arc<Mutex<Vec<Vec<Command>>>>,
    sessions: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn start<F>(mut respond: F) -> Self
    where
        F: FnMut(&Command) -> Action + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let received: Arc<Mutex<Vec<Vec<Command>>>> = Arc::new(Mutex::new(Vec::new()));
        let sessions = Arc::new(AtomicUsize::new(0));

        let log = received.clone();
        let count = sessions.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                count.fetch_add(1, Ordering::SeqCst);
                log.lock().push(Vec::new());

                let mut buf: Vec<u8> = Vec::new();
                'conn: loop {
                    let mut chunk = [0u8; 4096];
                    let n = match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break 'conn,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);

                    while let Some((command, consumed)) = parse_command(&buf) {
                        buf.drain(..consumed);
                        log.lock().last_mut().unwrap().push(command.clone());
                        match respond(&command) {
                            Action::Reply(bytes) => {
                                if socket.write_all(&bytes).await.is_err() {
                                    break 'conn;
                                }
                            }
                            Action::Silence => {}
                            Action::Close => {
                                socket.shutdown().await.ok();
                                break 'conn;
                            }
                        }
                    }
                }
            }
        });

        Self {
            addr,
            received,
            sessions,
        }
    }

    /// Number of connections accepted so far.
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Commands received on the n-th connection, in arrival order.
    pub fn commands(&self, session: usize) -> Vec<Command> {
        self.received.lock().get(session).cloned().unwrap_or_default()
    }

    pub fn total_commands(&self) -> usize {
        self.received.lock().iter().map(|s| s.len()).sum()
    }
}

/// Install a log subscriber for a test. Honors `RUST_LOG`, e.g.
/// `RUST_LOG=kvpipe=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// First argument of a command, uppercased.
pub fn verb(cmd: &Command) -> String {
    String::from_utf8_lossy(&cmd[0]).to_uppercase()
}

/// Config pointed at the mock server, with short timers so reconnect tests
/// finish quickly.
pub fn config_for(addr: &str) -> Config {
    let (host, port) = addr.rsplit_once(':').unwrap();
    Config {
        host: host.to_string(),
        port: port.parse().unwrap(),
        connect_timeout_ms: 1000,
        reconnect_delay_ms: 50,
        ..Config::default()
    }
}

// ── Minimal inbound-frame parsing ──────────────────────────────────

/// Try to parse one complete `*N` command frame of bulk strings from the
/// front of `buf`. Returns the arguments and the bytes consumed.
fn parse_command(buf: &[u8]) -> Option<(Command, usize)> {
    let (argc, mut pos) = read_int_line(buf, 0, b'*')?;
    let mut args = Vec::with_capacity(argc as usize);
    for _ in 0..argc {
        let (len, next) = read_int_line(buf, pos, b'$')?;
        pos = next;
        let len = len as usize;
        if buf.len() < pos + len + 2 {
            return None;
        }
        args.push(buf[pos..pos + len].to_vec());
        pos += len + 2;
    }
    Some((args, pos))
}

fn read_int_line(buf: &[u8], pos: usize, marker: u8) -> Option<(i64, usize)> {
    if buf.len() <= pos || buf[pos] != marker {
        return None;
    }
    let rel = buf[pos..].windows(2).position(|w| w == b"\r\n")?;
    let end = pos + rel;
    let text = std::str::from_utf8(&buf[pos + 1..end]).ok()?;
    Some((text.parse().ok()?, end + 2))
}
