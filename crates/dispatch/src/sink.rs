//! Single-use completion channel back to the requesting client.
//!
//! A [`CompletionSink`] is created per request and consumed by
//! [`CompletionSink::finish`]; there is no way to send twice. Whoever holds
//! the sink owns the duty to report: the dispatcher on its synchronous
//! paths, the compilation engine once work has been queued.

use std::fmt;

use tokio::sync::oneshot;

/// Terminal status reported for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    /// The engine compiled the method and stored the code.
    Success,
    /// Compiled code already existed; nothing was done.
    NotNeeded,
    Failure,
}

impl CompletionStatus {
    pub const fn code(self) -> u8 {
        match self {
            CompletionStatus::Success => 0,
            CompletionStatus::NotNeeded => 1,
            CompletionStatus::Failure => 2,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CompletionStatus::Success),
            1 => Some(CompletionStatus::NotNeeded),
            2 => Some(CompletionStatus::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompletionStatus::Success => "compilationSuccess",
            CompletionStatus::NotNeeded => "compilationNotNeeded",
            CompletionStatus::Failure => "compilationFailure",
        })
    }
}

/// Receiving half of a completion channel, held by the transport.
pub type CompletionReceiver = oneshot::Receiver<CompletionStatus>;

/// Capability to report the terminal status of one request.
///
/// Dropping an unfinished sink reports [`CompletionStatus::Failure`] so a
/// lost sink (for example a compile worker that panicked) never leaves the
/// client waiting forever.
pub struct CompletionSink {
    tx: Option<oneshot::Sender<CompletionStatus>>,
}

impl CompletionSink {
    pub fn channel() -> (CompletionSink, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        (CompletionSink { tx: Some(tx) }, rx)
    }

    /// Report the terminal status, consuming the sink.
    ///
    /// Returns `false` if the receiving side is gone (the client hung up);
    /// the status is then dropped.
    pub fn finish(mut self, status: CompletionStatus) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(status).is_ok(),
            None => false,
        }
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

impl Drop for CompletionSink {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!("Completion sink dropped without a terminal status, reporting failure");
            // The receiver may already be gone; nothing else to do then.
            let _ = tx.send(CompletionStatus::Failure);
        }
    }
}

impl fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink")
            .field("pending", &self.tx.is_some())
            .finish()
    }
}
