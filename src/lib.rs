//! Asynchronous pipelined RESP client.
//!
//! Encodes commands into RESP frames, decodes the server's reply stream
//! incrementally (chunk boundaries may fall anywhere), matches replies to
//! in-flight requests in strict FIFO order, and keeps the connection alive
//! with automatic reconnection and AUTH / SELECT replay.
//!
//! ```no_run
//! use kvpipe::{Client, Config};
//!
//! # async fn demo() -> kvpipe::Result<()> {
//! let client = Client::connect(Config::default()).await?;
//! client.submit_str(&["SET", "foo", "bar"]).await?;
//! let reply = client.submit_str(&["GET", "foo"]).await?;
//! assert_eq!(reply.as_bytes(), Some(&b"bar"[..]));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod pipeline;
pub mod resp;

pub use client::{Client, LinkState};
pub use config::{Config, DisconnectPolicy};
pub use error::{KvPipeError, Result, ServerErrorKind};
pub use pipeline::Transform;
pub use resp::{encode_command, encode_command_str, encode_pipeline, Decoder, Reply};
