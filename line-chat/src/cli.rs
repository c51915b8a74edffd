use std::net::SocketAddr;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::{ClientConfig, EchoPolicy, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server. Lines typed on stdin are sent to every client.
    Server(ServerArgs),
    /// Connect to a server and chat from stdin.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address to bind. Defaults to 127.0.0.1 on the shared port
    /// (LINE_CHAT_PORT or 5000). Use port 0 for an ephemeral port.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Do not relay a client's lines back to that client.
    #[arg(long)]
    pub no_echo: bool,
}

impl ServerArgs {
    pub fn into_config(self) -> Result<ServerConfig> {
        let config = match self.listen {
            Some(listen) => ServerConfig::new(listen),
            None => ServerConfig::from_env()?,
        };
        let echo = if self.no_echo {
            EchoPolicy::ExcludeSender
        } else {
            EchoPolicy::EchoToSender
        };
        Ok(config.with_echo(echo))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Server to connect to, as host:port. Defaults to localhost on the
    /// shared port.
    #[arg(long)]
    pub server: Option<String>,
}

impl ClientArgs {
    pub fn into_config(self) -> Result<ClientConfig> {
        match self.server {
            Some(server) => Ok(ClientConfig::new(server)),
            None => ClientConfig::from_env(),
        }
    }
}
