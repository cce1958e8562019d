//! Server side of a single compile request stream.

use std::net::SocketAddr;

use aotserver_dispatch::{CompileRequest, CompletionStatus};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::codec::{Message, WireCodec};
use crate::error::WireError;

/// One client connection carrying one request and one response.
///
/// The stream is consumed by either [`ServerStream::finish`] or
/// [`ServerStream::cancel`], so a response can be written at most once.
#[derive(Debug)]
pub struct ServerStream {
    framed: Framed<TcpStream, WireCodec>,
    peer: SocketAddr,
}

impl ServerStream {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            framed: Framed::new(stream, WireCodec),
            peer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read and decode the request. Any error here means the stream must be
    /// cancelled.
    pub async fn read_request(&mut self) -> Result<CompileRequest, WireError> {
        match self.framed.next().await {
            Some(Ok(Message::CompileRequest(request))) => Ok(request),
            Some(Ok(other)) => Err(WireError::UnexpectedMessage(other.name())),
            Some(Err(err)) => Err(err),
            None => Err(WireError::Closed),
        }
    }

    /// Write the terminal status and close the connection.
    pub async fn finish(mut self, status: CompletionStatus) -> Result<(), WireError> {
        self.framed.send(Message::CompletionStatus(status)).await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }

    /// Close the connection without writing anything. The client sees the
    /// stream end before a status arrives.
    pub async fn cancel(self) {
        let mut stream = self.framed.into_inner();
        if let Err(err) = stream.shutdown().await {
            tracing::debug!(peer = %self.peer, %err, "Failed to shut down cancelled stream");
        }
    }
}
