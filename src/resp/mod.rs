//! RESP wire protocol: command encoding and streaming reply decoding.

pub mod parser;
pub mod types;
pub mod writer;

pub use parser::Decoder;
pub use types::Reply;
pub use writer::{encode_command, encode_command_str, encode_pipeline};
