use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    select,
};
use tracing::{info, warn};

use line_chat::{
    Client, Server, ServerHandle,
    cli::{Cli, ClientArgs, Command, ServerArgs},
    display::{DisplaySink, StdoutDisplay},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args).await?,
        Command::Client(args) => run_client(args).await?,
    }

    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let config = args.into_config()?;
    let display: Arc<dyn DisplaySink> = Arc::new(StdoutDisplay);
    let server = Server::bind(&config, display).await?;

    tokio::spawn(relay_operator_input(server.handle()));

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err.into());
    }
    Ok(())
}

/// Broadcasts lines typed at the server. Ends quietly at stdin EOF; the
/// server keeps serving.
async fn relay_operator_input(handle: ServerHandle) {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match stdin.next_line().await {
            Ok(Some(line)) => {
                handle.say(&line).await;
            }
            Ok(None) => break,
            Err(error) => {
                warn!(?error, "failed to read operator input");
                break;
            }
        }
    }
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let config = args.into_config()?;
    let display: Arc<dyn DisplaySink> = Arc::new(StdoutDisplay);
    let client = Client::connect(&config.server, display)
        .await
        .with_context(|| format!("failed to connect to {}", config.server))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        select! {
            line = stdin.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(error) = client.send(&line).await {
                        warn!(%error, "failed to send message");
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(?error, "failed to read input");
                    break;
                }
            },
            _ = client.closed() => break,
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    info!("leaving chat");
    client.close().await;
    Ok(())
}
