//! Line protocol over TCP.
//!
//! Clients send newline-terminated commands (`\r\n` tolerated). Every reply
//! is the reply text followed by a single NUL byte.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::{Decoder, Encoder, Framed, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use crate::protocol::{Command, Reply};
use crate::session::Session;

/// Longest accepted command line, excluding the terminator.
pub const MAX_LINE: usize = 1024;

/// A session with no input for this long is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

fn line_error(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "command line too long")
        }
    }
}

/// Server side: decodes command lines, encodes NUL-terminated replies.
/// Blank lines are skipped.
pub struct ProtocolCodec {
    inner: LinesCodec,
}

impl Default for ProtocolCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE),
        }
    }
}

impl Decoder for ProtocolCodec {
    type Item = Command;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self.inner.decode(src).map_err(line_error)? {
            if let Some(cmd) = Command::parse(&line) {
                return Ok(Some(cmd));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // an unterminated last line still counts
        while let Some(line) = self.inner.decode_eof(src).map_err(line_error)? {
            if let Some(cmd) = Command::parse(&line) {
                return Ok(Some(cmd));
            }
        }
        Ok(None)
    }
}

impl Encoder<Reply> for ProtocolCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = item.to_string();
        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        dst.put_u8(0);
        Ok(())
    }
}

/// Client side: decodes NUL-terminated replies, encodes command lines.
#[derive(Debug, Default)]
pub struct ReplyCodec {
    /// How far `src` has already been scanned for a NUL.
    scanned: usize,
}

impl ReplyCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ReplyCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src[self.scanned..].iter().position(|&b| b == 0) else {
            self.scanned = src.len();
            return Ok(None);
        };
        let frame = src.split_to(self.scanned + pos + 1);
        self.scanned = 0;
        let text = std::str::from_utf8(&frame[..frame.len() - 1])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(text.to_string()))
    }
}

impl Encoder<&str> for ReplyCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Drive one session until logout, EOF, idle timeout, a transport error,
/// or until `transport` is cancelled by shutdown.
pub async fn process_connection<S>(
    stream: S,
    ctx: Arc<Context>,
    transport: CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, ProtocolCodec::new());
    framed.send(Reply::Welcome).await?;
    let mut session = Session::new(ctx);

    loop {
        let next = tokio::select! {
            biased;
            _ = transport.cancelled() => {
                debug!("transport closed by server");
                return Ok(());
            }
            next = tokio::time::timeout(IDLE_TIMEOUT, framed.next()) => next,
        };
        let cmd = match next {
            Err(_) => {
                info!("closing idle session");
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(cmd)) => cmd?,
        };

        let reply = session.handle(&cmd).await;
        // shutdown may have flushed the table while this command waited
        if transport.is_cancelled() {
            return Ok(());
        }
        let closes = reply.closes_session();
        framed.send(reply).await?;
        if closes {
            return Ok(());
        }
    }
}

async fn reject<S: AsyncWrite + Unpin>(stream: S) -> io::Result<()> {
    let mut framed = FramedWrite::new(stream, ProtocolCodec::new());
    framed.send(Reply::ServerFull).await
}

/// Accept loop. Each accepted connection takes a pool slot for its whole
/// lifetime; when none is free the client gets `serverfull` and is closed.
pub async fn serve(listener: TcpListener, ctx: Arc<Context>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("acceptor stopped");
                return;
            }
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let transport = CancellationToken::new();
                let slot = match ctx.pool.acquire(transport.clone()).await {
                    Ok(slot) => slot,
                    Err(e) => {
                        warn!("{e}, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        tokio::spawn(async move {
                            if let Err(e) = reject(socket).await {
                                debug!("reject {peer}: {e}");
                            }
                        });
                        continue;
                    }
                };

                info!("connection from {peer} (slot {slot})");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let ctx = ctx.clone();

                tokio::spawn(async move {
                    if let Err(e) = process_connection(socket, ctx.clone(), transport).await {
                        debug!("connection error from {peer}: {e}");
                    }
                    ctx.pool.release(slot).await;
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                    info!("{peer} disconnected");
                });
            }
        }
    }
}
