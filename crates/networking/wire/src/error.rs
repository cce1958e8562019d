use std::net::SocketAddr;

use thiserror::Error;

/// Errors reading or writing compile service frames.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error("truncated {message} payload: expected {expected} bytes, got {actual}")]
    Truncated {
        message: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("empty frame")]
    EmptyFrame,
    #[error("frame of {0} bytes exceeds the maximum")]
    FrameTooLarge(usize),
    #[error("invalid optimization level {0}")]
    BadOptLevel(u8),
    #[error("invalid completion status {0}")]
    BadStatus(u8),
    #[error("invalid method handle {0:#x}")]
    BadMethodHandle(u64),
    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),
    #[error("connection closed")]
    Closed,
    #[error("no request received within {0:?}")]
    ReadTimeout(std::time::Duration),
    #[error("server is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
