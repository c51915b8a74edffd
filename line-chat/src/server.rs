use std::{future::Future, io, net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{EchoPolicy, ServerConfig},
    connection::Connection,
    display::{DisplaySink, Label},
    error::{ChatError, Result},
    registry::SessionRegistry,
    session::{ClientSession, SessionContext, SessionEnd},
};

pub struct Server {
    listener: TcpListener,
    echo: EchoPolicy,
    registry: Arc<SessionRegistry>,
    display: Arc<dyn DisplaySink>,
}

impl Server {
    /// Binds the configured address. A bind failure is reported to the
    /// display and returned as [`ChatError::ListenerFatal`].
    pub async fn bind(config: &ServerConfig, display: Arc<dyn DisplaySink>) -> Result<Self> {
        match TcpListener::bind(config.listen).await {
            Ok(listener) => Ok(Self::new(listener, config.echo, display)),
            Err(source) => {
                let err = ChatError::listener(config.listen, source);
                report_fatal(display.as_ref(), &err);
                Err(err)
            }
        }
    }

    pub fn new(listener: TcpListener, echo: EchoPolicy, display: Arc<dyn DisplaySink>) -> Self {
        Self {
            listener,
            echo,
            registry: Arc::new(SessionRegistry::new()),
            display,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Handle for the operator to speak to every connected client.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            registry: Arc::clone(&self.registry),
            display: Arc::clone(&self.display),
        }
    }

    /// Accepts connections until `shutdown` resolves or the listener fails.
    ///
    /// On return the listener is closed, every session has been told to stop,
    /// and all session tasks have finished.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            echo,
            registry,
            display,
        } = self;
        let addr = listener.local_addr().ok();
        tokio::pin!(shutdown);

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = SessionContext {
            registry: Arc::clone(&registry),
            display: Arc::clone(&display),
            echo,
            shutdown: stop_rx,
        };
        let mut sessions = JoinSet::new();

        if let Some(addr) = addr {
            info!(%addr, "server listening");
            display.display(Label::Notice, &format!("Server started on {addr}"));
        }

        let outcome = loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break Ok(());
                }
                accept_result = listener.accept() => {
                    let accepted = handle_accept_result(accept_result, &ctx, &mut sessions).await;
                    if let Err(err) = accepted {
                        break Err(ChatError::listener_at(addr, err));
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_exit(joined);
                }
            }
        };

        drop(listener);
        let _ = stop_tx.send(true);
        let closed = registry.close_all().await;
        debug!(closed, "closed outbound queues");
        while let Some(joined) = sessions.join_next().await {
            log_session_exit(joined);
        }

        if let Err(err) = &outcome {
            report_fatal(display.as_ref(), err);
        }
        outcome
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Lets the server operator broadcast lines of their own.
#[derive(Clone)]
pub struct ServerHandle {
    registry: Arc<SessionRegistry>,
    display: Arc<dyn DisplaySink>,
}

impl ServerHandle {
    /// Trims `input`; empty input is ignored and returns `None`. Otherwise the
    /// line is shown locally and sent to every session, returning the number
    /// of recipients.
    pub async fn say(&self, input: &str) -> Option<usize> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }
        self.display.display(Label::Server, text);
        Some(self.registry.broadcast(text, None).await)
    }
}

/// Registers an accepted connection and spawns its session. Transient accept
/// failures are logged and swallowed; anything else ends the accept loop.
async fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    ctx: &SessionContext,
    sessions: &mut JoinSet<SessionEnd>,
) -> io::Result<()> {
    let (stream, peer) = match result {
        Ok(accepted) => accepted,
        Err(err) if is_transient(&err) => {
            warn!(error = ?err, "failed to accept connection");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let connection = match Connection::from_stream(stream) {
        Ok(connection) => connection,
        Err(err) => {
            warn!(%peer, error = %err, "dropping connection");
            return Ok(());
        }
    };

    let session = ClientSession::start(connection, &ctx.registry).await;
    info!(%peer, session = %session.id(), "client connected");
    ctx.display.display(Label::Notice, &format!("Client connected: {peer}"));
    sessions.spawn(session.run(ctx.clone()));
    Ok(())
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

fn log_session_exit(joined: std::result::Result<SessionEnd, tokio::task::JoinError>) {
    match joined {
        Ok(end) => debug!(reason = ?end, "session task finished"),
        Err(err) => warn!(error = ?err, "session task panicked or was cancelled"),
    }
}

fn report_fatal(display: &dyn DisplaySink, err: &ChatError) {
    error!(error = %err, "listener failed");
    display.display(Label::Notice, &format!("Server error: {err}"));
}
