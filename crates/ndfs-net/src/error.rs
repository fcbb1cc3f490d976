//! Error types for network operations.

/// Errors that can occur on the data plane or the coordinator RPC channel.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// An I/O error on the underlying socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to connect to a remote endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// First byte of a connection is not a known opcode.
    #[error("unknown opcode for incoming data stream: {0}")]
    UnknownOpcode(u8),

    /// Write header names an unknown payload encoding.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(u8),

    /// Write header carries an impossible target count.
    #[error("mislabelled incoming datastream: {0} targets")]
    InvalidTargetCount(i32),

    /// A length field on the wire is negative.
    #[error("negative length on the wire: {0}")]
    NegativeLength(i64),

    /// A length does not fit the signed 64-bit wire field.
    #[error("length too large for wire encoding: {0}")]
    LengthOverflow(u64),

    /// A string does not fit the 16-bit length prefix.
    #[error("string too long for wire encoding: {0} bytes")]
    StringTooLong(usize),

    /// A string on the wire is not valid UTF-8.
    #[error("invalid utf-8 string on the wire")]
    InvalidUtf8,

    /// An RPC frame exceeds the size limit.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The downstream node acknowledged with an unexpected marker.
    #[error("unexpected completion marker: {0:#x}")]
    UnexpectedCompletion(i64),

    /// The coordinator rejected a request.
    #[error("coordinator error: {0}")]
    Remote(String),

    /// The coordinator answered with the wrong response kind.
    #[error("unexpected coordinator response: {0}")]
    UnexpectedResponse(String),

    /// A write request names no target to send to.
    #[error("no targets given")]
    NoTargets,
}
