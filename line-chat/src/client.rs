use std::sync::Arc;

use tokio::{
    io::BufReader,
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, LineReader, LineWriter},
    display::{DisplaySink, Label},
    error::{ChatError, Result},
};

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// A chat participant connected to one server.
///
/// Received lines are pushed to the display from a background task; typed
/// lines go out through [`Client::send`].
pub struct Client {
    writer: Mutex<LineWriter<OwnedWriteHalf>>,
    display: Arc<dyn DisplaySink>,
    state: watch::Receiver<ConnectionState>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    reader_task: JoinHandle<()>,
}

impl Client {
    /// Connects to `addr` (a `host:port` string). On failure the display gets
    /// a single "Connection failed." line; there is no retry.
    pub async fn connect(addr: &str, display: Arc<dyn DisplaySink>) -> Result<Self> {
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);

        let connection = match Connection::connect(addr).await {
            Ok(connection) => connection,
            Err(err) => {
                let _ = state_tx.send(ConnectionState::Closed);
                warn!(%addr, error = %err, "connect failed");
                display.display(Label::Notice, "Connection failed.");
                return Err(err);
            }
        };

        let peer = connection.peer;
        let (reader, writer) = connection.into_split();
        let _ = state_tx.send(ConnectionState::Open);
        info!(%peer, "connected");
        display.display(Label::Notice, &format!("Connected to {addr}"));

        let state_tx = Arc::new(state_tx);
        let reader_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&display),
            Arc::clone(&state_tx),
        ));

        Ok(Self {
            writer: Mutex::new(writer),
            display,
            state,
            state_tx,
            reader_task,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the connection has reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Sends one line of user input.
    ///
    /// Surrounding whitespace is trimmed and empty input is ignored
    /// (`Ok(false)`, nothing displayed or written). Input with an interior
    /// line terminator is rejected with [`ChatError::EmbeddedNewline`] before
    /// anything is displayed. Otherwise the line is echoed to the display as
    /// "You" before the write is attempted, so the local echo does not depend
    /// on the network.
    pub async fn send(&self, input: &str) -> Result<bool> {
        let text = input.trim();
        if text.is_empty() {
            return Ok(false);
        }
        if text.contains(['\n', '\r']) {
            return Err(ChatError::EmbeddedNewline);
        }

        self.display.display(Label::You, text);

        if self.state() == ConnectionState::Closed {
            return Err(ChatError::ConnectionClosed);
        }
        self.writer.lock().await.write_line(text).await?;
        Ok(true)
    }

    /// Shuts the connection down and stops the background reader.
    pub async fn close(self) {
        let Client {
            writer,
            state_tx,
            reader_task,
            ..
        } = self;

        if let Err(error) = writer.lock().await.close().await {
            debug!(%error, "failed to shut down client writer cleanly");
        }
        reader_task.abort();
        let _ = reader_task.await;
        let _ = state_tx.send(ConnectionState::Closed);
    }
}

async fn read_loop(
    mut reader: LineReader<BufReader<OwnedReadHalf>>,
    display: Arc<dyn DisplaySink>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => display.display(Label::Server, &line),
            Ok(None) => break,
            Err(error) => {
                debug!(%error, "read from server failed");
                break;
            }
        }
    }

    let _ = state.send(ConnectionState::Closed);
    display.display(Label::Notice, "Disconnected from server.");
}
