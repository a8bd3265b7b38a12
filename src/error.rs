//! Error types for JalaIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// JalaIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer refused, reset or dropped the connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Byte stream no longer lines up with frame boundaries
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Frame payload is not a valid packet record
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A control mode could not be entered
    #[error("Mode error: {0}")]
    Mode(String),

    /// Actuator channel has no configured output
    #[error("Actuator channel {0} is not configured")]
    Channel(usize),

    /// Configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown was requested while waiting
    #[error("Shutdown requested")]
    Shutdown,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Reasons a frame could not be extracted from the stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// No delimiter within the length-prefix byte budget
    #[error("no length delimiter within {scanned} bytes")]
    MissingDelimiter {
        /// Bytes inspected before giving up
        scanned: usize,
    },

    /// Length prefix is empty or not a decimal number
    #[error("invalid length prefix {0:?}")]
    InvalidLength(String),

    /// Declared payload is larger than allowed
    #[error("payload of {len} bytes exceeds limit of {max}")]
    Oversized {
        /// Declared payload length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Frame started but did not complete before the deadline
    #[error("frame incomplete after timeout ({available}/{expected} bytes)")]
    Timeout {
        /// Total frame length being waited for
        expected: usize,
        /// Bytes available when the deadline passed
        available: usize,
    },

    /// Peer closed the stream in the middle of a frame
    #[error("stream closed mid-frame ({available} bytes buffered)")]
    Truncated {
        /// Bytes buffered when EOF was seen
        available: usize,
    },
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// True for failures that are fixed by dropping the socket and reconnecting
    pub fn needs_reconnect(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Framing(_) => true,
            Error::Io(e) => is_transport_kind(e.kind()),
            _ => false,
        }
    }
}

/// Socket error kinds that mean the peer is gone
pub(crate) fn is_transport_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        kind,
        ConnectionRefused
            | ConnectionReset
            | ConnectionAborted
            | BrokenPipe
            | NotConnected
            | UnexpectedEof
            | AddrNotAvailable
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_classification() {
        assert!(Error::Transport("reset".into()).needs_reconnect());
        assert!(
            Error::Framing(FramingError::InvalidLength("x1".into())).needs_reconnect()
        );
        assert!(
            Error::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).needs_reconnect()
        );
        assert!(!Error::Mode("no camera".into()).needs_reconnect());
        assert!(!Error::Channel(3).needs_reconnect());
    }

    #[test]
    fn test_display() {
        let e = Error::Framing(FramingError::Oversized { len: 10, max: 5 });
        assert_eq!(
            e.to_string(),
            "Framing error: payload of 10 bytes exceeds limit of 5"
        );
        assert_eq!(
            Error::Channel(9).to_string(),
            "Actuator channel 9 is not configured"
        );
    }
}
