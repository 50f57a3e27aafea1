use std::io;
use thiserror::Error as ThisError;

use crate::frame;

#[derive(Debug, ThisError)]
pub enum Error {
    /// An operation was attempted on a connection that is not connected.
    #[error("connection error: not connected")]
    NotConnected,
    /// The peer closed the socket.
    #[error("connection error: connection closed by peer")]
    ConnectionClosed,
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    /// A received frame does not have the shape the decode expected.
    #[error("protocol error: {0}")]
    Protocol(#[from] frame::Error),
    /// The caller supplied something that cannot be put on the wire.
    #[error("encoding error: {0}")]
    Encoding(String),
    /// The server answered with an error frame (strict decoding only).
    #[error("server error: {0}")]
    Server(String),
}

impl Error {
    /// Whether the error left the underlying connection unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::NotConnected | Error::ConnectionClosed | Error::Io(_)
        )
    }
}
