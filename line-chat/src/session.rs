use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::BufReader,
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    select,
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    config::EchoPolicy,
    connection::{Connection, LineReader, LineWriter},
    display::{DisplaySink, Label},
    registry::{Inbox, SessionHandle, SessionId, SessionRegistry},
};

/// Everything a running session shares with the rest of the server.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub display: Arc<dyn DisplaySink>,
    pub echo: EchoPolicy,
    pub shutdown: watch::Receiver<bool>,
}

/// Why a session's read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its side of the socket.
    PeerClosed,
    /// A read failed; treated like a close.
    Failed,
    /// The server is shutting down.
    Shutdown,
}

/// Server-side half of one connected client.
///
/// The session is registered as soon as it is started and deregisters itself
/// when [`ClientSession::run`] returns. `run` consumes the session, so
/// teardown happens once on every exit path.
pub struct ClientSession {
    handle: SessionHandle,
    reader: LineReader<BufReader<OwnedReadHalf>>,
    writer_task: JoinHandle<()>,
}

impl ClientSession {
    /// Registers the connection and starts the task that writes queued lines
    /// to it.
    pub async fn start(connection: Connection, registry: &SessionRegistry) -> Self {
        let peer = connection.peer;
        let (reader, writer) = connection.into_split();
        let (handle, inbox) = registry.add(peer).await;
        let writer_task = tokio::spawn(drain_outbound(handle.id(), writer, inbox));

        Self {
            handle,
            reader,
            writer_task,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn peer(&self) -> SocketAddr {
        self.handle.peer()
    }

    /// Relays every line the client sends until it disconnects, a read fails,
    /// or shutdown is signalled, then tears the session down.
    pub async fn run(mut self, ctx: SessionContext) -> SessionEnd {
        let end = self.read_loop(&ctx).await;
        self.teardown(&ctx, end).await;
        end
    }

    async fn read_loop(&mut self, ctx: &SessionContext) -> SessionEnd {
        let mut shutdown = ctx.shutdown.clone();
        let id = self.id();
        let exclude = ctx.echo.exclusion(id);

        loop {
            select! {
                line = self.reader.read_line() => match line {
                    Ok(Some(line)) => {
                        ctx.display.display(Label::Client, &line);
                        let delivered = ctx.registry.broadcast(&line, exclude).await;
                        debug!(session = %id, delivered, "relayed line");
                    }
                    Ok(None) => return SessionEnd::PeerClosed,
                    Err(error) => {
                        debug!(session = %id, %error, "read failed");
                        return SessionEnd::Failed;
                    }
                },
                _ = shutdown_requested(&mut shutdown) => return SessionEnd::Shutdown,
            }
        }
    }

    async fn teardown(self, ctx: &SessionContext, end: SessionEnd) {
        let ClientSession {
            handle,
            reader,
            mut writer_task,
        } = self;
        let (id, peer) = (handle.id(), handle.peer());

        ctx.registry.remove(id).await;
        // Last sender for the outbound queue; the writer task exits once it
        // has flushed what is already queued.
        drop(handle);
        drop(reader);

        if end == SessionEnd::Shutdown {
            writer_task.abort();
            let _ = writer_task.await;
        } else {
            // A peer that stopped reading can park the flush forever; shutdown
            // still has to get through.
            let mut shutdown = ctx.shutdown.clone();
            select! {
                _ = &mut writer_task => {}
                _ = shutdown_requested(&mut shutdown) => {
                    debug!(session = %id, "abandoning queued lines for shutdown");
                    writer_task.abort();
                    let _ = writer_task.await;
                }
            }
        }

        info!(session = %id, %peer, reason = ?end, "client disconnected");
        ctx.display.display(Label::Notice, &format!("Client disconnected: {peer}"));
    }
}

/// Resolves once shutdown is signalled or the server side is gone.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn drain_outbound(id: SessionId, mut writer: LineWriter<OwnedWriteHalf>, mut inbox: Inbox) {
    while let Some(line) = inbox.recv().await {
        if let Err(error) = writer.write_line(&line).await {
            debug!(session = %id, %error, "send failed; dropping outbound queue");
            break;
        }
    }
    if let Err(error) = writer.close().await {
        debug!(session = %id, %error, "failed to shut down session writer");
    }
}
