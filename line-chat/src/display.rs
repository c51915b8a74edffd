use std::{
    fmt,
    io::{self, Write},
};

use tokio::sync::mpsc;
use tracing::debug;

/// Who a transcript line is attributed to. Only used for presentation; the
/// wire carries bare text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// Echo of something the local user typed.
    You,
    /// A line received from a connected client (server side).
    Client,
    /// A line received from the server, or typed by the server operator.
    Server,
    /// Connection status and other informational lines.
    Notice,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::You => "You",
            Label::Client => "Client",
            Label::Server => "Server",
            Label::Notice => "***",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for the chat transcript.
///
/// Called from background tasks, so implementations must hand the line over
/// to whatever owns presentation instead of assuming they run on it.
pub trait DisplaySink: Send + Sync {
    fn display(&self, label: Label, text: &str);
}

/// Renders a transcript line the way the terminal shows it.
pub fn render(label: Label, text: &str) -> String {
    match label {
        Label::Notice => format!("*** {text}"),
        other => format!("{other}: {text}"),
    }
}

/// Writes the transcript to stdout, one line per entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutDisplay;

impl DisplaySink for StdoutDisplay {
    fn display(&self, label: Label, text: &str) {
        let mut stdout = io::stdout().lock();
        let written = writeln!(stdout, "{}", render(label, text)).and_then(|_| stdout.flush());
        if let Err(error) = written {
            debug!(?error, "failed to write transcript line");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    pub label: Label,
    pub text: String,
}

impl fmt::Display for DisplayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self.label, &self.text))
    }
}

/// Forwards transcript lines over a channel to the task that owns
/// presentation.
#[derive(Debug, Clone)]
pub struct ChannelDisplay {
    tx: mpsc::UnboundedSender<DisplayLine>,
}

impl ChannelDisplay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DisplaySink for ChannelDisplay {
    fn display(&self, label: Label, text: &str) {
        let line = DisplayLine {
            label,
            text: text.to_string(),
        };
        if self.tx.send(line).is_err() {
            debug!("transcript receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_render_as_prefixes() {
        assert_eq!(render(Label::Client, "hello"), "Client: hello");
        assert_eq!(render(Label::You, "hello"), "You: hello");
        assert_eq!(render(Label::Server, "hi"), "Server: hi");
        assert_eq!(render(Label::Notice, "Connection failed."), "*** Connection failed.");
    }

    #[tokio::test]
    async fn channel_display_forwards_in_order() {
        let (display, mut rx) = ChannelDisplay::new();
        display.display(Label::You, "one");
        display.display(Label::Server, "two");

        let first = rx.recv().await.expect("first line");
        let second = rx.recv().await.expect("second line");
        assert_eq!(first.to_string(), "You: one");
        assert_eq!(second.to_string(), "Server: two");
    }
}
