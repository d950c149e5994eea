//! Error types for instruction encoding, decoding and the UDP endpoint.

use std::net::SocketAddr;
use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed layout of the instruction, or a
    /// field holds a value the layout cannot represent.
    #[error("Malformed {kind} instruction: {reason}")]
    MalformedInstruction {
        /// Instruction kind being decoded
        kind: &'static str,
        /// What was wrong with the buffer
        reason: String,
    },

    /// Instruction code outside the known set
    #[error("Unknown instruction code: {0:#04x}")]
    UnknownInstruction(u8),

    /// Peer speaks a different protocol version
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Encoded instruction would not fit in one datagram
    #[error("Payload too large: {length} bytes (maximum {max})")]
    PayloadTooLarge {
        /// Requested payload length
        length: usize,
        /// Largest payload that fits
        max: usize,
    },

    /// Server must only listen on loopback
    #[error("Refusing to bind protocol server to non-loopback address {0}")]
    NonLoopbackBind(SocketAddr),

    /// Failed to bind the UDP socket
    #[error("Failed to bind UDP socket to {addr}: {source}")]
    BindFailed {
        /// Address that failed to bind
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// No matching response arrived in time
    #[error("No response from {peer} after {millis} ms")]
    Timeout {
        /// Peer that did not answer
        peer: SocketAddr,
        /// How long we waited
        millis: u64,
    },

    /// Receive loop did not stop within the shutdown budget
    #[error("Server did not stop within {millis} ms")]
    ShutdownTimeout {
        /// Shutdown budget
        millis: u64,
    },

    /// Receive task ended abnormally
    #[error("Server task failed: {0}")]
    Shutdown(String),

    /// Binary read/write error
    #[error("Binary format error: {0}")]
    BinRw(String),

    /// I/O error on the socket
    #[error("Protocol I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedInstruction {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<binrw::Error> for ProtocolError {
    fn from(e: binrw::Error) -> Self {
        Self::BinRw(e.to_string())
    }
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
