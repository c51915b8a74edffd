use std::net::SocketAddr;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::error::{ChatError, Result};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest line accepted from a peer, terminator excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Reading side of a line-oriented channel.
///
/// Once the peer closes (or a read fails) the reader is latched shut and
/// every later call reports end-of-stream. Invalid UTF-8 is decoded lossily
/// rather than treated as a failure.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    limit: usize,
    done: bool,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_LINE_BYTES)
    }

    pub fn with_limit(inner: R, limit: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            limit,
            done: false,
        }
    }

    /// Waits for the next full line. `Ok(None)` means end-of-stream.
    ///
    /// A final line without a terminator is still returned before the
    /// end-of-stream signal. A line longer than the limit fails with
    /// [`ChatError::LineTooLong`] and latches the reader.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }

        self.buf.clear();
        // Room for a full line plus a CRLF terminator.
        let mut bounded = (&mut self.inner).take(self.limit as u64 + 2);
        let bytes = match bounded.read_until(b'\n', &mut self.buf).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.done = true;
                return Err(err.into());
            }
        };
        if bytes == 0 {
            self.done = true;
            return Ok(None);
        }

        let content = self
            .buf
            .iter()
            .rposition(|b| !matches!(b, b'\n' | b'\r'))
            .map_or(0, |last| last + 1);
        if content > self.limit {
            self.done = true;
            return Err(ChatError::LineTooLong { limit: self.limit });
        }

        Ok(Some(String::from_utf8_lossy(&self.buf[..content]).into_owned()))
    }

    pub fn is_closed(&self) -> bool {
        self.done
    }
}

/// Writing side of a line-oriented channel.
pub struct LineWriter<W> {
    inner: W,
    closed: bool,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    /// Writes `text` followed by `\n` and flushes so the peer sees it at once.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        if self.closed {
            return Err(ChatError::ConnectionClosed);
        }
        if text.contains(LINE_ENDINGS) {
            return Err(ChatError::EmbeddedNewline);
        }

        let mut encoded = Vec::with_capacity(text.len() + 1);
        encoded.extend_from_slice(text.as_bytes());
        encoded.push(b'\n');

        if let Err(err) = write_and_flush(&mut self.inner, &encoded).await {
            self.closed = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Shuts the write direction down. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

async fn write_and_flush<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// A TCP stream carrying newline-delimited UTF-8 text.
pub struct Connection {
    pub reader: LineReader<BufReader<OwnedReadHalf>>,
    pub writer: LineWriter<OwnedWriteHalf>,
    pub peer: SocketAddr,
}

impl Connection {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: LineReader::new(BufReader::new(reader)),
            writer: LineWriter::new(writer),
            peer,
        })
    }

    pub fn into_split(
        self,
    ) -> (
        LineReader<BufReader<OwnedReadHalf>>,
        LineWriter<OwnedWriteHalf>,
    ) {
        (self.reader, self.writer)
    }
}
