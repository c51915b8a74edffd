use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin("line-chat");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    let mut alice = spawn_client(&binary, &addr).await?;
    let alice_joined =
        read_line_expect(&mut server_stdout, "waiting for alice to be accepted").await?;
    assert!(alice_joined.starts_with("*** Client connected: "));

    let mut bob = spawn_client(&binary, &addr).await?;
    let bob_joined = read_line_expect(&mut server_stdout, "waiting for bob to be accepted").await?;
    assert!(bob_joined.starts_with("*** Client connected: "));

    // Alice's own line shows up locally first, then comes back from the server.
    alice
        .send_line("hello")
        .await
        .context("alice send line")?;
    let alice_local = read_line_expect(&mut alice.stdout, "waiting for alice local echo").await?;
    assert_eq!(alice_local, "You: hello");
    let server_sees = read_line_expect(&mut server_stdout, "waiting for server transcript").await?;
    assert_eq!(server_sees, "Client: hello");
    let bob_hears_alice =
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "Server: hello");
    let alice_echo = read_line_expect(&mut alice.stdout, "waiting for alice echo").await?;
    assert_eq!(alice_echo, "Server: hello");

    // Blank input is dropped; the next real line is the one that arrives.
    bob.send_line("   ").await.context("bob send blank")?;
    bob.send_line("hi alice").await.context("bob send line")?;
    let bob_local = read_line_expect(&mut bob.stdout, "waiting for bob local echo").await?;
    assert_eq!(bob_local, "You: hi alice");
    let alice_hears_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice to hear bob").await?;
    assert_eq!(alice_hears_bob, "Server: hi alice");

    // Alice closes stdin; the server notes the departure.
    alice.close_stdin();
    ensure_success(&mut alice.child, "alice client").await?;
    let server_hears_bob =
        read_line_expect(&mut server_stdout, "waiting for server to see bob").await?;
    assert_eq!(server_hears_bob, "Client: hi alice");
    let alice_left =
        read_line_expect(&mut server_stdout, "waiting for alice disconnect").await?;
    assert!(alice_left.starts_with("*** Client disconnected: "));

    let bob_echo = read_line_expect(&mut bob.stdout, "waiting for bob echo").await?;
    assert_eq!(bob_echo, "Server: hi alice");

    // Killing the server ends Bob's session from the other side.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let bob_notice = read_line_expect(&mut bob.stdout, "waiting for bob notice").await?;
    assert_eq!(bob_notice, "*** Disconnected from server.");
    ensure_success(&mut bob.child, "bob client").await?;

    Ok(())
}

#[tokio::test]
async fn client_reports_connection_failure() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin("line-chat");
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?
    };

    let output = Command::new(&binary)
        .arg("client")
        .arg("--server")
        .arg(addr.to_string())
        .env("RUST_LOG", "off")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .context("failed to run client")?;

    assert!(!output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["*** Connection failed."]);
    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().context("client stdin already closed")?;
        stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    fn close_stdin(&mut self) {
        self.stdin.take();
    }
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("server banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(binary: &Path, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn client")?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin: Some(stdin),
        stdout: BufReader::new(stdout),
    };

    let banner = read_line_expect(&mut process.stdout, "waiting for connect banner").await?;
    if banner != format!("*** Connected to {addr}") {
        return Err(anyhow!("expected connect banner for {addr}, got '{banner}'"));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
