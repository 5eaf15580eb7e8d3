//! Error taxonomy for the client.
//!
//! Transport failures, protocol violations, and server error replies are
//! kept as distinct variants so callers can match on the failure class.
//! [`KvPipeError::Incomplete`] is internal parser control flow ("need more
//! bytes") and never escapes the decoder.

use std::io;
use thiserror::Error;

/// Structured server error kinds, parsed from the leading code token of an
/// error reply (e.g. `WRONGTYPE Operation against …`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// LOADING the server is loading the dataset in memory
    Loading,
    /// READONLY cannot write against a read-only replica
    ReadOnly,
    /// BUSY the server is busy running a script
    Busy,
    /// NOAUTH authentication required
    NoAuth,
    /// Any other error code token
    Other(String),
}

impl ServerErrorKind {
    /// Parse the kind from a raw server error message.
    pub fn from_error_msg(msg: &str) -> Self {
        if msg.starts_with("WRONGTYPE") {
            Self::WrongType
        } else if msg.starts_with("LOADING") {
            Self::Loading
        } else if msg.starts_with("READONLY") {
            Self::ReadOnly
        } else if msg.starts_with("BUSY") {
            Self::Busy
        } else if msg.starts_with("NOAUTH") {
            Self::NoAuth
        } else if msg.starts_with("ERR") {
            Self::Err
        } else {
            let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
            Self::Other(prefix.to_string())
        }
    }
}

/// All error variants for kvpipe.
#[derive(Debug, Error)]
pub enum KvPipeError {
    /// TCP / IO level errors.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// Malformed wire data. Fatal for the connection; never retried.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The decoder needs more data; not a real error, used as control flow.
    #[error("incomplete frame")]
    Incomplete,

    /// The server answered a request with an error reply.
    #[error("server error: {message}")]
    Server {
        kind: ServerErrorKind,
        message: String,
    },

    /// Connect or IO deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The link dropped before a reply for this request arrived.
    #[error("connection lost before a reply arrived")]
    ConnectionReset,

    /// The client was closed; no further commands are accepted.
    #[error("client is closed")]
    Closed,

    /// Invalid configuration (bad URL, bad field value).
    #[error("config error: {0}")]
    Config(String),
}

impl KvPipeError {
    /// Create a server error from a raw error reply, auto-parsing the kind.
    pub fn server(msg: impl Into<String>) -> Self {
        let message = msg.into();
        let kind = ServerErrorKind::from_error_msg(&message);
        Self::Server { kind, message }
    }

    /// Kind of the server error, if this is one.
    pub fn server_kind(&self) -> Option<&ServerErrorKind> {
        match self {
            Self::Server { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, KvPipeError>;

// ── Tests ──────────────────────────────────────────────────────────
