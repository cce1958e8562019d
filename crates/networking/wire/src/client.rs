//! Blocking client for one-off compile requests.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use aotserver_dispatch::{CompileRequest, CompletionStatus};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{Message, WireCodec};
use crate::error::WireError;

/// Send `request` and wait for its terminal status.
///
/// Returns [`WireError::Closed`] if the server cancels the stream.
pub fn compile(
    addr: impl ToSocketAddrs,
    request: &CompileRequest,
    timeout: Option<Duration>,
) -> Result<CompletionStatus, WireError> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(timeout)?;

    let mut out = BytesMut::new();
    WireCodec.encode(Message::CompileRequest(request.clone()), &mut out)?;
    stream.write_all(&out)?;
    stream.flush()?;

    read_status(&mut stream)
}

fn read_status(stream: &mut TcpStream) -> Result<CompletionStatus, WireError> {
    let mut buf = BytesMut::with_capacity(16);
    let mut chunk = [0u8; 64];
    loop {
        if let Some(message) = WireCodec.decode(&mut buf)? {
            return match message {
                Message::CompletionStatus(status) => Ok(status),
                other => Err(WireError::UnexpectedMessage(other.name())),
            };
        }
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Err(WireError::Closed);
        }
        buf.extend_from_slice(chunk.get(..read).unwrap_or_default());
    }
}
