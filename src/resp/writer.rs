//! Command frame encoder.
//!
//! Serializes a command (name + ordered arguments) into the multi-bulk
//! array-of-bulk-strings wire format:
//! `*<N>\r\n$<len>\r\narg0\r\n$<len>\r\narg1\r\n…`
//!
//! Lengths are byte counts, so arguments may carry arbitrary binary data.

use itoa::Buffer;

/// Encode one command into its wire frame.
///
/// Each argument is written as a binary-safe bulk string. Caller data is
/// never mutated; the returned buffer is the complete frame.
///
/// # Example
/// ```ignore
/// let frame = encode_command(&[b"SET", b"key", b"value"]);
/// // → *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
/// ```
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    // Pre-calculate capacity so a frame is built with a single allocation
    let mut cap = 1 + 10 + 2; // '*' + max digits + \r\n
    for arg in args {
        cap += 1 + 10 + 2 + arg.len() + 2; // '$' + len + \r\n + data + \r\n
    }

    let mut buf = Vec::with_capacity(cap);
    let mut itoa_buf = Buffer::new();

    buf.push(b'*');
    buf.extend_from_slice(itoa_buf.format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");

    for arg in args {
        buf.push(b'$');
        buf.extend_from_slice(itoa_buf.format(arg.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }

    buf
}

/// Encode a command from string arguments (convenience wrapper).
pub fn encode_command_str(args: &[&str]) -> Vec<u8> {
    let byte_args: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
    encode_command(&byte_args)
}

/// Encode multiple commands into a single contiguous buffer for a
/// pipelined batch write: one allocation, one `write_all`.
pub fn encode_pipeline(commands: &[Vec<String>]) -> Vec<u8> {
    let mut cap = 0;
    for cmd_args in commands {
        cap += 1 + 10 + 2; // *N\r\n
        for arg in cmd_args {
            cap += 1 + 10 + 2 + arg.len() + 2; // $len\r\ndata\r\n
        }
    }

    let mut buf = Vec::with_capacity(cap);
    let mut itoa_buf = Buffer::new();

    for cmd_args in commands {
        buf.push(b'*');
        buf.extend_from_slice(itoa_buf.format(cmd_args.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");

        for arg in cmd_args {
            buf.push(b'$');
            buf.extend_from_slice(itoa_buf.format(arg.len()).as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(arg.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }

    buf
}

/// Helper macro for building command frames ergonomically.
///
/// Usage:
/// ```ignore
/// let frame = cmd!("SET", "mykey", "myvalue");
/// let frame = cmd!("GET", key_var);
/// ```
#[macro_export]
macro_rules! cmd {
    ($($arg:expr),+ $(,)?) => {{
        $crate::resp::writer::encode_command_str(&[$($arg),+])
    }};
}

// ── Tests ──────────────────────────────────────────────────────────
