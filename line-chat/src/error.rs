use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::registry::SessionId;

/// Failures surfaced by the chat library.
///
/// A peer closing its side of the socket is not an error: line reads report
/// it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Connect, accept, read or write failed on the underlying socket.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The listening socket could not be established or broke down.
    #[error("listener on {addr} failed: {source}")]
    ListenerFatal {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Write attempted after the connection was closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A peer sent more than `limit` bytes without a line terminator.
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// Outgoing text contained a line terminator.
    #[error("message contains a line terminator")]
    EmbeddedNewline,

    /// A session's outbound queue is gone; the session is tearing down.
    #[error("failed to deliver to session {0}")]
    SendFailure(SessionId),
}

impl ChatError {
    pub(crate) fn listener(addr: impl ToString, source: io::Error) -> Self {
        Self::ListenerFatal {
            addr: addr.to_string(),
            source,
        }
    }

    pub(crate) fn listener_at(addr: Option<SocketAddr>, source: io::Error) -> Self {
        match addr {
            Some(addr) => Self::listener(addr, source),
            None => Self::listener("<unknown>", source),
        }
    }

    /// True for a `ListenerFatal` error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ListenerFatal { .. })
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
