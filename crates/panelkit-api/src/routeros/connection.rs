// RouterOS API connection
//
// Frames commands onto any async byte stream and reads replies back with a
// per-read timeout. Generic over the stream so tests can drive it with an
// in-memory duplex pipe.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::Error;
use crate::routeros::codec::SentenceDecoder;
use crate::routeros::sentence::{Attributes, Command, Reply};

/// Everything a command produced: its `!re` rows and the `!done` attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub rows: Vec<Attributes>,
    pub done: Attributes,
}

/// A framed RouterOS API stream.
pub struct Connection<S> {
    stream: S,
    buf: BytesMut,
    decoder: SentenceDecoder,
    read_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            decoder: SentenceDecoder::new(),
            read_timeout,
        }
    }

    /// Write one request sentence.
    pub async fn write_command(&mut self, cmd: &Command) -> Result<(), Error> {
        trace!(path = cmd.path(), "writing command");
        let bytes = cmd.encode()?;
        let limit = self.read_timeout;
        tokio::time::timeout(limit, async {
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| timeout_error(limit))??;
        Ok(())
    }

    /// Read and classify the next reply sentence.
    pub async fn read_reply(&mut self) -> Result<Reply, Error> {
        loop {
            if let Some(words) = self.decoder.decode(&mut self.buf)? {
                // The router never sends empty sentences; skip any stray terminator.
                if words.is_empty() {
                    continue;
                }
                return Reply::parse(words);
            }

            let limit = self.read_timeout;
            let read = tokio::time::timeout(limit, self.stream.read_buf(&mut self.buf))
                .await
                .map_err(|_| timeout_error(limit))??;
            if read == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Run one command to completion.
    ///
    /// Collects `!re` rows until `!done`. A `!trap` fails the command; the
    /// remaining replies up to `!done` are drained first so the stream stays
    /// aligned for the next command.
    pub async fn run(&mut self, cmd: &Command) -> Result<Response, Error> {
        debug!(path = cmd.path(), "routeros command");
        self.write_command(cmd).await?;

        let mut rows = Vec::new();
        let mut trap = None;
        loop {
            match self.read_reply().await? {
                Reply::Row(attrs) => rows.push(attrs),
                Reply::Done(done) => {
                    if let Some((message, category)) = trap {
                        return Err(Error::RouterTrap { message, category });
                    }
                    return Ok(Response { rows, done });
                }
                Reply::Trap { message, category } => {
                    debug!(path = cmd.path(), %message, "routeros trap");
                    trap.get_or_insert((message, category));
                }
                Reply::Fatal(message) => return Err(Error::RouterFatal(message)),
            }
        }
    }

    /// Shut the write half down. Dropping the connection also closes it.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

fn timeout_error(limit: Duration) -> Error {
    Error::Timeout {
        timeout_secs: limit.as_secs(),
    }
}
