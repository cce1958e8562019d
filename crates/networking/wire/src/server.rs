//! Accept loop for the compile service.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aotserver_dispatch::{CompletionSink, CompletionStatus, Dispatcher};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{ServerError, WireError};
use crate::stream::ServerStream;

/// How long a client may take to send its request after connecting.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serve compile requests until `shutdown` is cancelled, then wait for the
/// connections in flight to finish.
pub async fn serve(listener: TcpListener, dispatcher: Dispatcher, shutdown: CancellationToken) {
    serve_with_read_timeout(listener, dispatcher, shutdown, DEFAULT_READ_TIMEOUT).await;
}

/// Like [`serve`], cancelling streams whose request has not arrived within
/// `read_timeout`. Streams still waiting for their request are cancelled on
/// shutdown; requests already read run to completion.
pub async fn serve_with_read_timeout(
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    read_timeout: Duration,
) {
    let tracker = TaskTracker::new();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Compile service listening");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracker.spawn(handle_stream(
                        ServerStream::new(stream, peer),
                        dispatcher.clone(),
                        shutdown.clone(),
                        read_timeout,
                    ));
                }
                Err(err) => tracing::warn!(%err, "Failed to accept connection"),
            },
        }
    }

    tracker.close();
    tracing::info!(in_flight = tracker.len(), "Compile service stopping");
    tracker.wait().await;
}

async fn handle_stream(
    mut stream: ServerStream,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    read_timeout: Duration,
) {
    let peer = stream.peer();
    let read = tokio::select! {
        _ = shutdown.cancelled() => Err(WireError::ShuttingDown),
        read = tokio::time::timeout(read_timeout, stream.read_request()) => {
            read.unwrap_or_else(|_| Err(WireError::ReadTimeout(read_timeout)))
        }
    };
    let request = match read {
        Ok(request) => request,
        Err(err) => {
            dispatcher.metrics().cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%peer, %err, "Stream failed in compile dispatcher, cancelling");
            stream.cancel().await;
            return;
        }
    };
    tracing::debug!(
        %peer,
        class = %request.class_offset,
        method = %request.method_offset,
        opt_level = %request.opt_level,
        "Received compile request"
    );

    let (sink, completion) = CompletionSink::channel();
    let outcome = tokio::task::spawn_blocking(move || dispatcher.dispatch(&request, sink)).await;
    if let Err(err) = outcome {
        // The sink went down with the task and has reported failure.
        tracing::error!(%peer, %err, "Dispatch task failed");
    }

    let status = completion.await.unwrap_or(CompletionStatus::Failure);
    if let Err(err) = stream.finish(status).await {
        tracing::debug!(%peer, %status, %err, "Client went away before the status was written");
    }
}
