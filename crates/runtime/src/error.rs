//! Error types for the device runtime.
//!
//! Errors are `Clone` because one transport failure has to be served to every
//! caller waiting on the response mailbox.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a device.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Failed to establish the TCP connection.
    #[error("failed to connect to device at {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// The device actively refused the connection for the whole retry window.
    #[error("device at {addr} refused the connection")]
    ConnectionRefused { addr: String },

    /// The connection dropped while in use.
    #[error("connection to device lost: {0}")]
    ConnectionLost(String),

    /// A socket read or write timed out.
    #[error("socket operation timed out: {0}")]
    SocketTimeout(String),

    /// The device did not announce itself after accepting the connection.
    #[error("no device info received within {0:?} after connect")]
    Handshake(Duration),

    /// No response arrived for a request within its deadline.
    #[error("no response to request {id} within {timeout:?}")]
    ResponseTimeout { id: i64, timeout: Duration },

    /// A frame failed to encode or decode.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation attempted on a device that is not connected.
    #[error("device is not connected")]
    Closed,

    /// An internal channel closed unexpectedly.
    #[error("channel closed unexpectedly")]
    ChannelClosed,
}

impl Error {
    /// True for errors that mean the device is gone and the session with it
    /// cannot continue.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionRefused { .. }
                | Error::ConnectionLost(_)
                | Error::Closed
        )
    }

    /// True for timeout errors of any flavor.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::SocketTimeout(_) | Error::Handshake(_) | Error::ResponseTimeout { .. }
        )
    }
}

impl From<dtx_protocol::ProtocolError> for Error {
    fn from(err: dtx_protocol::ProtocolError) -> Self {
        Error::Protocol(err.to_string())
    }
}

/// Maps an I/O error observed on the device socket onto the runtime taxonomy.
pub(crate) fn classify_io(addr: &str, err: &io::Error) -> Error {
    use io::ErrorKind::*;
    match err.kind() {
        ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe | UnexpectedEof => {
            Error::ConnectionLost(err.to_string())
        }
        ConnectionRefused => Error::ConnectionRefused {
            addr: addr.to_string(),
        },
        TimedOut => Error::SocketTimeout(err.to_string()),
        _ => Error::ConnectionFailed {
            addr: addr.to_string(),
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_onto_the_taxonomy() {
        let lost = classify_io("h:1", &io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(lost.is_disconnect());
        let refused =
            classify_io("h:1", &io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(refused, Error::ConnectionRefused { .. }));
        let timed = classify_io("h:1", &io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(timed.is_timeout());
    }

    #[test]
    fn timeouts_are_not_disconnects() {
        let err = Error::ResponseTimeout {
            id: 7,
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert!(!err.is_disconnect());
    }
}
