//! Raw transport layer.

pub mod tcp;

pub use tcp::{RawConnection, ReadHalf, WriteHalf};
