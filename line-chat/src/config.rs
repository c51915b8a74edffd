//! Runtime configuration shared by the server and client modes.
//!
//! Both sides agree on one well-known port. It defaults to 5000 and can be
//! moved for both at once with `LINE_CHAT_PORT`; an explicit address on the
//! command line wins over either.

use std::{env, net::SocketAddr};

use anyhow::{Context, Result};

use crate::registry::SessionId;

pub const DEFAULT_PORT: u16 = 5000;
pub const PORT_ENV: &str = "LINE_CHAT_PORT";

/// Port from `LINE_CHAT_PORT`, or [`DEFAULT_PORT`] when unset.
pub fn port_from_env() -> Result<u16> {
    parse_port(env::var(PORT_ENV).ok())
}

fn parse_port(raw: Option<String>) -> Result<u16> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{PORT_ENV}={raw:?} is not a valid port")),
        None => Ok(DEFAULT_PORT),
    }
}

/// Whether a client's own lines are relayed back to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Every registered session, the sender included, receives the line.
    #[default]
    EchoToSender,
    /// The sender is skipped; everyone else receives the line.
    ExcludeSender,
}

impl EchoPolicy {
    /// The session to leave out of a broadcast originating at `sender`.
    pub fn exclusion(self, sender: SessionId) -> Option<SessionId> {
        match self {
            EchoPolicy::EchoToSender => None,
            EchoPolicy::ExcludeSender => Some(sender),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub echo: EchoPolicy,
}

impl ServerConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            echo: EchoPolicy::default(),
        }
    }

    pub fn with_echo(mut self, echo: EchoPolicy) -> Self {
        self.echo = echo;
        self
    }

    /// Loopback on `port`.
    pub fn on_port(port: u16) -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// Loopback on the shared port.
    pub fn from_env() -> Result<Self> {
        Ok(Self::on_port(port_from_env()?))
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port`; host names are resolved at connect time.
    pub server: String,
}

impl ClientConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }

    pub fn on_port(port: u16) -> Self {
        Self::new(format!("localhost:{port}"))
    }

    /// `localhost` on the shared port.
    pub fn from_env() -> Result<Self> {
        Ok(Self::on_port(port_from_env()?))
    }
}
