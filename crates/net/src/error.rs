//! Network errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed message; the connection stays usable
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Length prefix past the cap; the stream cannot be resynchronised
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: u32 },

    /// A request the room directory refused, sent back as an `error` event
    #[error("{0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,

    #[error(transparent)]
    Core(#[from] estima_core::Error),
}
