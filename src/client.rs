//! Line relay used by `lido-client`.

use std::io;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;

use crate::wire::ReplyCodec;

/// Forward `input` lines to the server on `stream` and write every reply to
/// `output`, one per line. Returns after `bye` or `serverfull`, or when the
/// server closes the connection. When `input` runs dry the write half is
/// shut down so the server closes once it has answered everything sent.
pub async fn relay<I, S, O>(input: I, stream: S, mut output: O) -> io::Result<()>
where
    I: AsyncBufRead + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, ReplyCodec::new());
    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            reply = framed.next() => {
                let Some(reply) = reply else { break };
                let text = reply?;
                output.write_all(text.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
                if text == "bye" || text == "serverfull" {
                    break;
                }
            }
            line = lines.next_line(), if input_open => match line? {
                Some(line) => framed.send(line.as_str()).await?,
                None => {
                    input_open = false;
                    framed.get_mut().shutdown().await?;
                }
            },
        }
    }
    output.flush().await
}
